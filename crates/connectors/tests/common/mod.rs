#![allow(dead_code)]

use async_trait::async_trait;
use connectors::error::DbError;
use connectors::sql::driver::{
    BatchOutcome, ConnectParams, DbConnection, DbDriver, DriverRegistry, RowSet,
};
use connectors::sql::table::TableSpec;
use model::core::value::{FieldValue, Value};
use model::records::row::RowData;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Scripted reply for one `execute_batch` call. With no script the driver
/// reports one affected row per submitted parameter set.
pub enum BatchReply {
    PerRow,
    Outcomes(Vec<BatchOutcome>),
    Fail(String),
}

/// Shared state behind every connection the memory driver hands out, so
/// tests can observe what short-lived connections did after the fact.
#[derive(Default)]
pub struct MemoryState {
    pub tables: Vec<String>,
    pub statements: Vec<String>,
    pub queries: Vec<String>,
    pub metadata_lookups: Vec<String>,
    pub batches: Vec<(String, Vec<Vec<Value>>)>,
    pub batch_replies: VecDeque<BatchReply>,
    pub query_replies: VecDeque<RowSet>,
    pub autocommit_calls: Vec<bool>,
    pub commits: usize,
    pub rollbacks: usize,
    pub closes: usize,
    pub count_result: u64,
    pub copy_result: u64,
    pub metadata_unsupported: bool,
    pub fail_create: bool,
    /// CREATE TABLE succeeds but leaves no table behind, like an engine
    /// that silently drops the statement.
    pub create_is_noop: bool,
    pub fail_drop: bool,
    pub fail_commit_once: bool,
}

pub struct MemoryDriver {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDriver {
    pub fn new(state: Arc<Mutex<MemoryState>>) -> Self {
        MemoryDriver { state }
    }
}

#[async_trait]
impl DbDriver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn accepts_url(&self, url: &str) -> bool {
        url.starts_with("memory://")
    }

    async fn connect(&self, _params: &ConnectParams) -> Result<Box<dyn DbConnection>, DbError> {
        Ok(Box::new(MemoryConnection {
            state: self.state.clone(),
            open: true,
        }))
    }
}

pub struct MemoryConnection {
    state: Arc<Mutex<MemoryState>>,
    open: bool,
}

fn first_word(text: &str) -> String {
    text.split_whitespace().next().unwrap_or("").to_string()
}

#[async_trait]
impl DbConnection for MemoryConnection {
    async fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        let mut state = self.state.lock().unwrap();
        state.statements.push(sql.to_string());
        if let Some(rest) = sql.strip_prefix("CREATE TABLE ") {
            if state.fail_create {
                return Err(DbError::Other("create rejected".to_string()));
            }
            if state.create_is_noop {
                return Ok(0);
            }
            let name = first_word(rest);
            if !state.tables.contains(&name) {
                state.tables.push(name);
            }
            return Ok(0);
        }
        if let Some(rest) = sql.strip_prefix("DROP TABLE ") {
            if state.fail_drop {
                return Err(DbError::Other("drop rejected".to_string()));
            }
            let name = first_word(rest);
            state.tables.retain(|t| t != &name);
            return Ok(0);
        }
        if sql.starts_with("COPY ") {
            return Ok(state.copy_result);
        }
        Ok(1)
    }

    async fn query(&mut self, sql: &str) -> Result<RowSet, DbError> {
        let mut state = self.state.lock().unwrap();
        state.queries.push(sql.to_string());
        // Existence probes succeed only for tables the state knows about.
        if sql.contains(" where 1 = 0") {
            let table = sql
                .split(" from ")
                .nth(1)
                .map(first_word)
                .unwrap_or_default();
            return if state.tables.contains(&table) {
                Ok(RowSet::default())
            } else {
                Err(DbError::Other(format!("relation {table} does not exist")))
            };
        }
        if let Some(reply) = state.query_replies.pop_front() {
            return Ok(reply);
        }
        if sql.contains("COUNT(") {
            return Ok(RowSet {
                columns: vec!["count".to_string()],
                rows: vec![vec![Value::Int(state.count_result as i64)]],
            });
        }
        Ok(RowSet::default())
    }

    async fn execute_batch(
        &mut self,
        sql: &str,
        batch: &[Vec<Value>],
    ) -> Result<Vec<BatchOutcome>, DbError> {
        let mut state = self.state.lock().unwrap();
        state.batches.push((sql.to_string(), batch.to_vec()));
        match state.batch_replies.pop_front() {
            None | Some(BatchReply::PerRow) => Ok(vec![BatchOutcome::Affected(1); batch.len()]),
            Some(BatchReply::Outcomes(outcomes)) => Ok(outcomes),
            Some(BatchReply::Fail(message)) => Err(DbError::Other(message)),
        }
    }

    async fn table_names(&mut self, name: &str) -> Result<Vec<String>, DbError> {
        let mut state = self.state.lock().unwrap();
        state.metadata_lookups.push(name.to_string());
        if state.metadata_unsupported {
            return Err(DbError::Unsupported("table metadata"));
        }
        Ok(state
            .tables
            .iter()
            .filter(|t| t.as_str() == name)
            .cloned()
            .collect())
    }

    async fn set_auto_commit(&mut self, enabled: bool) -> Result<(), DbError> {
        self.state.lock().unwrap().autocommit_calls.push(enabled);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_commit_once {
            state.fail_commit_once = false;
            return Err(DbError::Other("commit rejected".to_string()));
        }
        state.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.state.lock().unwrap().rollbacks += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DbError> {
        self.open = false;
        self.state.lock().unwrap().closes += 1;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        !self.open
    }
}

pub fn shared_state() -> Arc<Mutex<MemoryState>> {
    Arc::new(Mutex::new(MemoryState::default()))
}

pub fn memory_registry(state: &Arc<Mutex<MemoryState>>) -> DriverRegistry {
    let mut registry = DriverRegistry::empty();
    registry.register(Arc::new(MemoryDriver::new(state.clone())));
    registry
}

pub fn memory_params() -> ConnectParams {
    ConnectParams::new("memory://unit")
}

/// Three-column spec shared across the flow tests: an int key, a lower
/// case word and its upper case form.
pub fn testing_spec() -> TableSpec {
    TableSpec::new(
        "testingtable",
        vec!["num".to_string(), "lwr".to_string(), "upr".to_string()],
        vec![
            "int".to_string(),
            "varchar(256)".to_string(),
            "varchar(256)".to_string(),
        ],
        vec!["num".to_string(), "lwr".to_string()],
    )
}

pub fn testing_row(num: i64, lwr: &str, upr: &str) -> RowData {
    RowData::new(
        "testingtable",
        vec![
            FieldValue::new("num", Value::Int(num)),
            FieldValue::new("lwr", Value::String(lwr.to_string())),
            FieldValue::new("upr", Value::String(upr.to_string())),
        ],
    )
}
