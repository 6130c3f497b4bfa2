//! Chunked row reads. A reader composes or adopts a base SELECT, pages
//! through it with the dialect's pagination clause and hands rows out
//! one at a time.

use crate::error::{ConnectorError, DbError};
use crate::source::DataSource;
use crate::sql::dialect::Dialect;
use crate::sql::driver::{close_connection, DbConnection};
use async_trait::async_trait;
use bigdecimal::ToPrimitive;
use model::core::value::{FieldValue, Value};
use model::records::row::RowData;
use std::collections::VecDeque;
use tracing::{debug, info};

pub const DEFAULT_FETCH_SIZE: usize = 1000;

/// What to read: either an explicit column/condition/order-by
/// composition or a caller-supplied query with its own count query.
#[derive(Debug, Clone)]
pub struct ReadSpec {
    pub columns: Vec<String>,
    pub conditions: Option<String>,
    pub order_by: Option<String>,
    pub fetch_size: usize,
    pub limit: Option<u64>,
    pub select_query: Option<String>,
    pub count_query: Option<String>,
}

impl Default for ReadSpec {
    fn default() -> Self {
        ReadSpec {
            columns: Vec::new(),
            conditions: None,
            order_by: None,
            fetch_size: DEFAULT_FETCH_SIZE,
            limit: None,
            select_query: None,
            count_query: None,
        }
    }
}

impl ReadSpec {
    /// The un-paginated SELECT this spec describes. A caller-supplied
    /// query is used as-is apart from a trailing semicolon, which would
    /// break the appended pagination clause.
    fn base_query(&self, table: &str, dialect: Dialect) -> Result<String, ConnectorError> {
        if let Some(query) = &self.select_query {
            return Ok(query.trim().trim_end_matches(';').trim_end().to_string());
        }
        if self.columns.is_empty() {
            return Err(ConnectorError::Config(
                "no columns or select query configured for reading".to_string(),
            ));
        }
        Ok(dialect.select_sql(
            table,
            &self.columns,
            self.conditions.as_deref(),
            self.order_by.as_deref(),
        ))
    }
}

/// Streams rows out of one table over a dedicated connection.
pub struct RowReader {
    conn: Option<Box<dyn DbConnection>>,
    table: String,
    dialect: Dialect,
    read: ReadSpec,
    base_query: Option<String>,
    columns: Vec<String>,
    buffer: VecDeque<Vec<Value>>,
    offset: u64,
    delivered: u64,
    exhausted: bool,
}

impl RowReader {
    pub fn new(conn: Box<dyn DbConnection>, table: &str, dialect: Dialect, read: ReadSpec) -> Self {
        RowReader {
            conn: Some(conn),
            table: table.to_string(),
            dialect,
            read,
            base_query: None,
            columns: Vec::new(),
            buffer: VecDeque::new(),
            offset: 0,
            delivered: 0,
            exhausted: false,
        }
    }

    fn conn(&mut self) -> Result<&mut (dyn DbConnection + 'static), ConnectorError> {
        self.conn
            .as_deref_mut()
            .ok_or(ConnectorError::Db(DbError::Closed))
    }

    /// Counts the rows the configured read would produce. A
    /// caller-supplied select query must bring its own count query since
    /// one cannot be derived from it.
    pub async fn count(&mut self) -> Result<u64, ConnectorError> {
        if self.read.select_query.is_some() && self.read.count_query.is_none() {
            return Err(ConnectorError::Config(
                "no count query for select query given".to_string(),
            ));
        }
        let sql = self.read.count_query.clone().unwrap_or_else(|| {
            self.dialect
                .count_sql(&self.table, self.read.conditions.as_deref())
        });
        info!("executing count: {}", sql);
        let conn = self.conn()?;
        let result = conn.query(&sql).await?;
        let count = match result.scalar() {
            Some(Value::Int(n)) => u64::try_from(*n).ok(),
            Some(Value::Decimal(d)) => d.to_u64(),
            _ => None,
        };
        count.ok_or_else(|| {
            ConnectorError::Config("count query did not return a numeric value".to_string())
        })
    }

    async fn fetch_chunk(&mut self) -> Result<(), ConnectorError> {
        let base = match &self.base_query {
            Some(base) => base.clone(),
            None => {
                return Err(ConnectorError::Config(
                    "source is not open".to_string(),
                ))
            }
        };
        let sql = self
            .dialect
            .paginate(&base, self.offset, self.read.fetch_size as u64);
        debug!("executing select: {}", sql);
        let conn = self.conn()?;
        let mut result = conn.query(&sql).await?;

        // Drop the row-number helper column that ROWNUM pagination adds.
        if let Some(idx) = result
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case("dbif_rno"))
        {
            result.columns.remove(idx);
            for row in &mut result.rows {
                if idx < row.len() {
                    row.remove(idx);
                }
            }
        }

        if !result.columns.is_empty() {
            self.columns = result.columns;
        }
        let fetched = result.rows.len();
        self.offset += fetched as u64;
        if fetched < self.read.fetch_size || !self.dialect.supports_pagination() {
            self.exhausted = true;
        }
        self.buffer.extend(result.rows);
        Ok(())
    }

    fn to_row(&self, values: Vec<Value>) -> RowData {
        let fields = self
            .columns
            .iter()
            .zip(values)
            .map(|(name, value)| match value {
                Value::Null => FieldValue::null(name),
                value => FieldValue::new(name, value),
            })
            .collect();
        RowData::new(&self.table, fields)
    }
}

#[async_trait]
impl DataSource for RowReader {
    async fn open(&mut self) -> Result<(), ConnectorError> {
        self.base_query = Some(self.read.base_query(&self.table, self.dialect)?);
        if self.dialect.read_autocommit() {
            let conn = self.conn()?;
            conn.set_auto_commit(true).await?;
        }
        Ok(())
    }

    async fn next_row(&mut self) -> Result<Option<RowData>, ConnectorError> {
        if let Some(limit) = self.read.limit {
            if self.delivered >= limit {
                return Ok(None);
            }
        }
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch_chunk().await?;
        }
        match self.buffer.pop_front() {
            Some(values) => {
                self.delivered += 1;
                Ok(Some(self.to_row(values)))
            }
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        if let Some(mut conn) = self.conn.take() {
            close_connection(conn.as_mut()).await?;
        }
        Ok(())
    }
}
