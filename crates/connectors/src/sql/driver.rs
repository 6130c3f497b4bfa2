use crate::error::{ConnectorError, DbError};
use crate::sql::drivers::{mysql::MySqlDriver, postgres::PostgresDriver};
use async_trait::async_trait;
use model::core::value::Value;
use std::sync::Arc;
use tracing::warn;

/// Per-row result of a batch execution, mirroring what JDBC-style drivers
/// report: an affected-row count, success with the count unknown, or the
/// driver's failed-row marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Affected(u64),
    SuccessNoInfo,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    /// First value of the first row, for single-cell results like counts.
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectParams {
    pub url: String,
    pub driver: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl ConnectParams {
    pub fn new(url: &str) -> Self {
        ConnectParams {
            url: url.to_string(),
            ..Default::default()
        }
    }

    pub fn with_driver(mut self, driver: &str) -> Self {
        self.driver = Some(driver.to_string());
        self
    }

    pub fn with_credentials(mut self, user: &str, password: &str) -> Self {
        self.user = Some(user.to_string());
        self.password = Some(password.to_string());
        self
    }
}

/// One live database connection. Implementations own their transport and
/// are never shared between tasks; a writer or reader keeps one for its
/// whole lifetime.
#[async_trait]
pub trait DbConnection: Send {
    async fn execute(&mut self, sql: &str) -> Result<u64, DbError>;

    async fn query(&mut self, sql: &str) -> Result<RowSet, DbError>;

    /// Executes one prepared statement once per parameter set, inside the
    /// current transaction, and reports one outcome per executed set. A
    /// driver that aborts mid-batch returns the error instead.
    async fn execute_batch(
        &mut self,
        sql: &str,
        batch: &[Vec<Value>],
    ) -> Result<Vec<BatchOutcome>, DbError>;

    /// Metadata lookup for tables named exactly `name`. Drivers without
    /// introspection answer `DbError::Unsupported` and callers fall back to
    /// probing.
    async fn table_names(&mut self, name: &str) -> Result<Vec<String>, DbError>;

    async fn set_auto_commit(&mut self, enabled: bool) -> Result<(), DbError>;

    async fn commit(&mut self) -> Result<(), DbError>;

    async fn rollback(&mut self) -> Result<(), DbError>;

    async fn close(&mut self) -> Result<(), DbError>;

    fn is_closed(&self) -> bool;
}

#[async_trait]
pub trait DbDriver: Send + Sync {
    fn name(&self) -> &'static str;

    fn accepts_url(&self, url: &str) -> bool;

    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn DbConnection>, DbError>;
}

/// Named driver registry. Connections for writers come out with autocommit
/// already disabled; read paths opt back in per dialect policy.
#[derive(Clone)]
pub struct DriverRegistry {
    drivers: Vec<Arc<dyn DbDriver>>,
}

impl DriverRegistry {
    pub fn empty() -> Self {
        DriverRegistry { drivers: Vec::new() }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(MySqlDriver));
        registry.register(Arc::new(PostgresDriver));
        registry
    }

    pub fn register(&mut self, driver: Arc<dyn DbDriver>) {
        self.drivers.push(driver);
    }

    pub fn driver_names(&self) -> Vec<&'static str> {
        self.drivers.iter().map(|d| d.name()).collect()
    }

    pub async fn open(&self, params: &ConnectParams) -> Result<Box<dyn DbConnection>, ConnectorError> {
        let driver = match params.driver.as_deref() {
            Some(name) => self.drivers.iter().find(|d| d.name() == name),
            None => self.drivers.iter().find(|d| d.accepts_url(&params.url)),
        };
        let Some(driver) = driver else {
            let available = self.driver_names().join(", ");
            warn!(url = %params.url, "no suitable driver, registered drivers: [{available}]");
            return Err(ConnectorError::NoSuitableDriver {
                url: params.url.clone(),
                available,
            });
        };
        let mut conn = driver.connect(params).await.map_err(|e| {
            let code = e
                .sql_code()
                .map(|c| format!(" (SQL error code: {c})"))
                .unwrap_or_default();
            ConnectorError::Connect {
                url: params.url.clone(),
                code,
                source: e,
            }
        })?;
        conn.set_auto_commit(false).await?;
        Ok(conn)
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Commit pending work and close. No-op on an already-closed connection.
pub async fn close_connection(conn: &mut dyn DbConnection) -> Result<(), DbError> {
    if conn.is_closed() {
        return Ok(());
    }
    conn.commit().await?;
    conn.close().await
}

/// Close on an already-failed path; close-time errors are logged so they
/// never mask the error that got us here.
pub async fn close_quietly(conn: &mut dyn DbConnection) {
    if let Err(e) = close_connection(conn).await {
        warn!(error = %e, "error closing connection");
    }
}
