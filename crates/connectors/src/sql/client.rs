//! High-level handle for one relational table: schema operations, ad-hoc
//! statements, and sink/source construction with sink-mode preparation.

use crate::conf::{Props, SinkConfig, SinkMode};
use crate::error::ConnectorError;
use crate::sink::DataSink;
use crate::source::DataSource;
use crate::sql::dialect::Dialect;
use crate::sql::driver::{
    close_connection, close_quietly, ConnectParams, DbConnection, DriverRegistry, RowSet,
};
use crate::sql::reader::{ReadSpec, RowReader};
use crate::sql::redshift::RedshiftSink;
use crate::sql::schema;
use crate::sql::table::TableSpec;
use crate::sql::writer::SqlSink;
use model::core::field::Field;
use tracing::{debug, warn};

/// Closes the short-lived connection behind a schema call. On the error
/// path the close itself stays quiet so it cannot mask the failure.
async fn finish<T>(
    mut conn: Box<dyn DbConnection>,
    result: Result<T, ConnectorError>,
) -> Result<T, ConnectorError> {
    match result {
        Ok(value) => {
            close_connection(conn.as_mut()).await?;
            Ok(value)
        }
        Err(error) => {
            close_quietly(conn.as_mut()).await;
            Err(error)
        }
    }
}

/// Binds connection parameters, a table spec and a dialect. Every
/// operation opens its own short-lived connection; sinks and sources get
/// a dedicated connection for their whole lifetime.
pub struct SqlTable {
    registry: DriverRegistry,
    params: ConnectParams,
    spec: TableSpec,
    dialect: Dialect,
}

impl SqlTable {
    pub fn new(params: ConnectParams, spec: TableSpec, dialect: Dialect) -> Self {
        Self::with_registry(DriverRegistry::with_defaults(), params, spec, dialect)
    }

    /// Same as [`SqlTable::new`] but with a caller-assembled driver
    /// registry, for engines without a bundled driver.
    pub fn with_registry(
        registry: DriverRegistry,
        params: ConnectParams,
        spec: TableSpec,
        dialect: Dialect,
    ) -> Self {
        debug!("creating table handle for {} ({})", spec.name, dialect);
        SqlTable {
            registry,
            params,
            spec,
            dialect,
        }
    }

    pub fn from_props(props: &Props, dialect: Dialect) -> Result<Self, ConnectorError> {
        Ok(Self::new(
            ConnectParams::from_props(props)?,
            TableSpec::from_props(props)?,
            dialect,
        ))
    }

    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Connection parameters with the dialect's default driver filled in
    /// when none was configured and the registry carries it. URL matching
    /// stays in charge otherwise.
    fn effective_params(&self) -> ConnectParams {
        let mut params = self.params.clone();
        if params.driver.is_none() {
            if let Some(name) = self.dialect.default_driver() {
                if self.registry.driver_names().contains(&name) {
                    params.driver = Some(name.to_string());
                }
            }
        }
        params
    }

    async fn connect(&self) -> Result<Box<dyn DbConnection>, ConnectorError> {
        self.registry.open(&self.effective_params()).await
    }

    pub async fn exists(&self) -> Result<bool, ConnectorError> {
        let mut conn = self.connect().await?;
        let result = schema::table_exists(conn.as_mut(), &self.spec).await;
        finish(conn, result).await
    }

    /// Creates the table, reporting whether it is present afterwards.
    pub async fn create(&self) -> Result<bool, ConnectorError> {
        let mut conn = self.connect().await?;
        let result = schema::create_table(conn.as_mut(), &self.spec, self.dialect).await;
        finish(conn, result).await
    }

    /// Drops the table, reporting whether it is absent afterwards.
    pub async fn drop(&self) -> Result<bool, ConnectorError> {
        let mut conn = self.connect().await?;
        let result = schema::drop_table(conn.as_mut(), &self.spec).await;
        finish(conn, result).await
    }

    /// Completes the spec from the given fields when needed, then creates
    /// the table unless it already exists.
    pub async fn ensure(&mut self, fields: &[Field]) -> Result<(), ConnectorError> {
        let mapper = self.dialect.type_mapper();
        let mut conn = self.connect().await?;
        let result =
            schema::ensure_table(conn.as_mut(), &mut self.spec, fields, &mapper, self.dialect)
                .await;
        finish(conn, result).await
    }

    pub async fn execute_update(&self, sql: &str) -> Result<u64, ConnectorError> {
        let mut conn = self.connect().await?;
        let result = schema::execute_update(conn.as_mut(), sql).await;
        finish(conn, result).await
    }

    pub async fn execute_query(&self, sql: &str, max_rows: i64) -> Result<RowSet, ConnectorError> {
        let mut conn = self.connect().await?;
        let result = schema::execute_query(conn.as_mut(), sql, max_rows).await;
        finish(conn, result).await
    }

    async fn prepare_mode(
        &self,
        conn: &mut dyn DbConnection,
        mode: SinkMode,
    ) -> Result<(), ConnectorError> {
        match mode {
            SinkMode::Replace => {
                if schema::table_exists(conn, &self.spec).await? {
                    schema::drop_table(conn, &self.spec).await?;
                }
                schema::create_table_checked(conn, &self.spec, self.dialect).await
            }
            SinkMode::Update | SinkMode::Keep | SinkMode::Append => {
                if !schema::table_exists(conn, &self.spec).await? {
                    schema::create_table_checked(conn, &self.spec, self.dialect).await?;
                }
                Ok(())
            }
        }
    }

    /// Prepares the target table per the sink mode, then hands back an
    /// opened sink ready for rows: the staged Redshift sink when the
    /// dialect asks for it, the generic batched sink otherwise.
    pub async fn open_sink(&self, config: SinkConfig) -> Result<Box<dyn DataSink>, ConnectorError> {
        if !self.spec.has_required_info() {
            return Err(ConnectorError::Config(
                "table spec is incomplete, column names and defs are required for writing"
                    .to_string(),
            ));
        }
        let mut conn = self.connect().await?;
        let prepared = self.prepare_mode(conn.as_mut(), config.mode).await;
        finish(conn, prepared).await?;

        let staged = self.dialect == Dialect::Redshift && !config.redshift.use_direct_insert;
        let mut sink: Box<dyn DataSink> = if staged {
            Box::new(RedshiftSink::staged(
                self.registry.clone(),
                self.effective_params(),
                self.spec.clone(),
                config.redshift,
            ))
        } else {
            let conn = self.connect().await?;
            Box::new(SqlSink::new(conn, self.spec.clone(), self.dialect, config))
        };
        if let Err(error) = sink.open().await {
            if let Err(close_error) = sink.close().await {
                warn!("error closing unopened sink: {}", close_error);
            }
            return Err(error);
        }
        Ok(sink)
    }

    /// Opens a source streaming this table's rows per the read spec.
    pub async fn open_source(&self, read: ReadSpec) -> Result<Box<dyn DataSource>, ConnectorError> {
        let conn = self.connect().await?;
        let mut source: Box<dyn DataSource> =
            Box::new(RowReader::new(conn, &self.spec.name, self.dialect, read));
        if let Err(error) = source.open().await {
            if let Err(close_error) = source.close().await {
                warn!("error closing unopened source: {}", close_error);
            }
            return Err(error);
        }
        Ok(source)
    }

    /// Counts the rows the read spec would produce.
    pub async fn count_rows(&self, read: ReadSpec) -> Result<u64, ConnectorError> {
        let conn = self.connect().await?;
        let mut reader = RowReader::new(conn, &self.spec.name, self.dialect, read);
        let result = reader.count().await;
        match result {
            Ok(count) => {
                reader.close().await?;
                Ok(count)
            }
            Err(error) => {
                if let Err(close_error) = reader.close().await {
                    warn!("error closing reader: {}", close_error);
                }
                Err(error)
            }
        }
    }
}
