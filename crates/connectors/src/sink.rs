use crate::error::ConnectorError;
use async_trait::async_trait;
use model::records::row::RowData;

/// Destination for a stream of rows.
///
/// Rows may be buffered; durability is only guaranteed once `close`
/// returns. Implementations release their connection on every close
/// path, including failed flushes.
#[async_trait]
pub trait DataSink: Send {
    /// Prepares the sink for writing.
    async fn open(&mut self) -> Result<(), ConnectorError>;

    /// Writes one row.
    async fn write(&mut self, row: &RowData) -> Result<(), ConnectorError>;

    /// Flushes buffered rows, commits and releases resources.
    async fn close(&mut self) -> Result<(), ConnectorError>;
}
