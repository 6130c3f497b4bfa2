use crate::error::ConnectorError;
use async_trait::async_trait;
use model::records::row::RowData;

/// Origin of a stream of rows.
#[async_trait]
pub trait DataSource: Send {
    /// Prepares the source for reading.
    async fn open(&mut self) -> Result<(), ConnectorError>;

    /// Returns the next row, or `None` once the source is exhausted.
    async fn next_row(&mut self) -> Result<Option<RowData>, ConnectorError>;

    /// Releases resources held by the source.
    async fn close(&mut self) -> Result<(), ConnectorError>;
}
