//! Batched prepared-statement writer. Rows accumulate into insert and
//! update parameter batches that execute once the configured threshold
//! is reached, with per-row outcome classification and rollback on
//! partial failure.

use crate::conf::SinkConfig;
use crate::error::ConnectorError;
use crate::sink::DataSink;
use crate::sql::dialect::Dialect;
use crate::sql::driver::{close_connection, close_quietly, BatchOutcome, DbConnection};
use crate::sql::schema;
use crate::sql::table::TableSpec;
use async_trait::async_trait;
use model::core::value::Value;
use model::records::row::RowData;
use std::mem;
use tracing::{debug, error, info};

/// The two prepared-statement batches a writer maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Insert,
    Update,
}

/// One row's worth of positional parameters, routed to a statement kind.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Insert(Vec<Value>),
    Update(Vec<Value>),
}

struct BatchSlot {
    sql: String,
    pending: Vec<Vec<Value>>,
}

fn batch_context(total: u64, current: usize, batch_size: usize) -> String {
    format!(
        "[totstmts: {}][crntstmts: {}][batch: {}]",
        total, current, batch_size
    )
}

/// Builds the error text for a failed batch: the state message, the full
/// driver message length, the batch context and the driver message
/// truncated to its first 75 characters.
fn failure_message(state: &str, context: &str, driver_message: &str) -> String {
    let truncated: String = driver_message.chars().take(75).collect();
    format!(
        "{} [msglength: {}]{} {}",
        state,
        driver_message.chars().count(),
        context,
        truncated
    )
}

/// Accumulates insert/update parameter batches against one dedicated
/// connection and executes them at the batch-size threshold. `close`
/// consumes the writer, flushes both kinds and releases the connection
/// on every path.
pub struct BatchWriter {
    conn: Box<dyn DbConnection>,
    insert: BatchSlot,
    update: Option<BatchSlot>,
    batch_size: usize,
    total_added: u64,
}

impl BatchWriter {
    pub fn new(
        conn: Box<dyn DbConnection>,
        insert_sql: String,
        update_sql: Option<String>,
        batch_size: usize,
    ) -> Self {
        BatchWriter {
            conn,
            insert: BatchSlot {
                sql: insert_sql,
                pending: Vec::new(),
            },
            update: update_sql.map(|sql| BatchSlot {
                sql,
                pending: Vec::new(),
            }),
            batch_size: batch_size.max(1),
            total_added: 0,
        }
    }

    /// Total rows accepted over the writer's lifetime.
    pub fn statements_added(&self) -> u64 {
        self.total_added
    }

    pub async fn write(&mut self, op: WriteOp) -> Result<(), ConnectorError> {
        match op {
            WriteOp::Insert(params) => self.insert.pending.push(params),
            WriteOp::Update(params) => match self.update.as_mut() {
                Some(slot) => slot.pending.push(params),
                None => {
                    return Err(ConnectorError::Batch(
                        "no update statement configured for update row".to_string(),
                    ))
                }
            },
        }
        self.total_added += 1;
        if self.total_added % self.batch_size as u64 == 0 {
            self.flush(StatementKind::Insert).await?;
            self.flush(StatementKind::Update).await?;
        }
        Ok(())
    }

    /// Executes the pending batch of the given kind. A batch with zero
    /// pending statements is a complete no-op. The pending state is
    /// cleared whether execution succeeds or fails.
    pub async fn flush(&mut self, kind: StatementKind) -> Result<(), ConnectorError> {
        let (sql, batch) = {
            let slot = match kind {
                StatementKind::Insert => &mut self.insert,
                StatementKind::Update => match self.update.as_mut() {
                    Some(slot) => slot,
                    None => return Ok(()),
                },
            };
            if slot.pending.is_empty() {
                return Ok(());
            }
            (slot.sql.clone(), mem::take(&mut slot.pending))
        };
        let submitted = batch.len();
        info!(
            "executing batch {}",
            batch_context(self.total_added, submitted, self.batch_size)
        );

        let outcomes = match self.conn.execute_batch(&sql, &batch).await {
            Ok(outcomes) => outcomes,
            Err(error) => {
                return self
                    .batch_failure("unable to execute update batch", submitted, &error.to_string())
                    .await;
            }
        };

        let mut affected: u64 = 0;
        let mut has_count = true;
        for outcome in &outcomes {
            match outcome {
                BatchOutcome::Affected(n) => affected += n,
                BatchOutcome::SuccessNoInfo => has_count = false,
                BatchOutcome::Failed => {
                    return self
                        .batch_failure(
                            "update failed",
                            submitted,
                            "driver flagged failed statements in batch",
                        )
                        .await;
                }
            }
        }
        if has_count {
            info!("records: {}", affected);
        } else {
            debug!("affected row count unavailable for batch");
        }

        // No matching rows is still a success, but a result-count mismatch
        // means statements were silently dropped.
        if outcomes.len() != submitted {
            let state = format!(
                "update did not update same number of statements executed in batch, batch: {} updated: {}",
                submitted,
                outcomes.len()
            );
            return self.batch_failure(&state, submitted, "").await;
        }

        if let Err(error) = self.conn.commit().await {
            return self
                .batch_failure("unable to execute update batch", submitted, &error.to_string())
                .await;
        }
        Ok(())
    }

    /// Rolls the failed batch back, clears rollback-only connection state
    /// with a follow-up commit and surfaces the diagnostic message.
    async fn batch_failure(
        &mut self,
        state: &str,
        current: usize,
        driver_message: &str,
    ) -> Result<(), ConnectorError> {
        let context = batch_context(self.total_added, current, self.batch_size);
        let message = failure_message(state, &context, driver_message);
        error!("{}", message);
        if let Err(error) = self.conn.rollback().await {
            error!("unable to rollback batch: {}", error);
        } else if let Err(error) = self.conn.commit().await {
            error!("unable to rollback batch: {}", error);
        }
        Err(ConnectorError::Batch(message))
    }

    /// Flushes the insert batch, then the update batch, then releases the
    /// connection. The connection is released even when a flush fails and
    /// the flush error still propagates.
    pub async fn close(mut self) -> Result<(), ConnectorError> {
        let flushed = match self.flush(StatementKind::Insert).await {
            Ok(()) => self.flush(StatementKind::Update).await,
            Err(error) => Err(error),
        };
        match flushed {
            Ok(()) => {
                close_connection(self.conn.as_mut()).await?;
                Ok(())
            }
            Err(error) => {
                close_quietly(self.conn.as_mut()).await;
                Err(error)
            }
        }
    }
}

/// Generic batched sink over a [`BatchWriter`]. Rows route to UPDATE when
/// every update-by key carries a non-null value, otherwise to INSERT.
pub struct SqlSink {
    conn: Option<Box<dyn DbConnection>>,
    writer: Option<BatchWriter>,
    spec: TableSpec,
    dialect: Dialect,
    config: SinkConfig,
}

impl SqlSink {
    pub fn new(
        conn: Box<dyn DbConnection>,
        spec: TableSpec,
        dialect: Dialect,
        config: SinkConfig,
    ) -> Self {
        SqlSink {
            conn: Some(conn),
            writer: None,
            spec,
            dialect,
            config,
        }
    }

    fn route(&self, row: &RowData) -> WriteOp {
        let update = !self.config.update_by.is_empty()
            && self.config.update_by.iter().all(|k| row.has_value(k));
        if update {
            let mut params = Vec::with_capacity(self.spec.column_names.len());
            for column in &self.spec.column_names {
                if self
                    .config
                    .update_by
                    .iter()
                    .any(|k| k.eq_ignore_ascii_case(column))
                {
                    continue;
                }
                params.push(row.get_value(column));
            }
            for key in &self.config.update_by {
                params.push(row.get_value(key));
            }
            WriteOp::Update(params)
        } else {
            let params = self
                .spec
                .column_names
                .iter()
                .map(|column| row.get_value(column))
                .collect();
            WriteOp::Insert(params)
        }
    }
}

#[async_trait]
impl DataSink for SqlSink {
    /// Verifies the target table on the write connection, then prepares
    /// the insert/update statements and hands the connection to the
    /// batch writer.
    async fn open(&mut self) -> Result<(), ConnectorError> {
        {
            let conn = self
                .conn
                .as_deref_mut()
                .ok_or_else(|| ConnectorError::Batch("sink already closed".to_string()))?;
            if !schema::table_exists(conn, &self.spec).await? {
                schema::create_table_checked(conn, &self.spec, self.dialect).await?;
            }
        }
        let insert_sql = self.dialect.insert_sql(
            &self.spec.name,
            &self.spec.column_names,
            self.config.replace_on_insert,
        );
        let update_sql = if self.config.update_by.is_empty() {
            None
        } else {
            Some(self.dialect.update_sql(
                &self.spec.name,
                &self.spec.column_names,
                &self.config.update_by,
            ))
        };
        let conn = self
            .conn
            .take()
            .ok_or_else(|| ConnectorError::Batch("sink already closed".to_string()))?;
        self.writer = Some(BatchWriter::new(
            conn,
            insert_sql,
            update_sql,
            self.config.batch_size,
        ));
        Ok(())
    }

    async fn write(&mut self, row: &RowData) -> Result<(), ConnectorError> {
        let op = self.route(row);
        match self.writer.as_mut() {
            Some(writer) => writer.write(op).await,
            None => Err(ConnectorError::Batch("sink is not open".to_string())),
        }
    }

    async fn close(&mut self) -> Result<(), ConnectorError> {
        if let Some(writer) = self.writer.take() {
            return writer.close().await;
        }
        if let Some(mut conn) = self.conn.take() {
            close_quietly(conn.as_mut()).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{batch_context, failure_message};

    #[test]
    fn test_batch_context_format() {
        assert_eq!(
            batch_context(13, 3, 1000),
            "[totstmts: 13][crntstmts: 3][batch: 1000]"
        );
    }

    #[test]
    fn test_failure_message_truncates_driver_text() {
        let driver_message = "x".repeat(100);
        let message = failure_message(
            "unable to execute update batch",
            "[totstmts: 13][crntstmts: 3][batch: 10]",
            &driver_message,
        );
        assert!(message.starts_with(
            "unable to execute update batch [msglength: 100][totstmts: 13][crntstmts: 3][batch: 10] "
        ));
        assert!(message.ends_with(&"x".repeat(75)));
        assert!(!message.ends_with(&"x".repeat(76)));
    }

    #[test]
    fn test_failure_message_short_text_kept_whole() {
        let message = failure_message("update failed", "[totstmts: 1][crntstmts: 1][batch: 5]", "boom");
        assert_eq!(
            message,
            "update failed [msglength: 4][totstmts: 1][crntstmts: 1][batch: 5] boom"
        );
    }
}
