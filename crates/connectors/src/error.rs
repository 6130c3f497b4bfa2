use thiserror::Error;

/// Errors raised at the database driver boundary.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("driver error: {0}")]
    Driver(#[from] sqlx::Error),

    #[error("connection is closed")]
    Closed,

    #[error("{0} is not supported by this driver")]
    Unsupported(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for drivers that do not sit on sqlx.
    #[error("{0}")]
    Other(String),
}

impl DbError {
    /// Vendor SQL error code, when the driver exposes one.
    pub fn sql_code(&self) -> Option<String> {
        match self {
            DbError::Driver(sqlx::Error::Database(e)) => e.code().map(|c| c.to_string()),
            _ => None,
        }
    }
}

/// Caller-facing error surface of the connector layer.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("{0}")]
    Config(String),

    #[error("cannot map type {0} to a sql type")]
    UnmappableType(String),

    #[error("no suitable driver for {url}, registered drivers: [{available}]")]
    NoSuitableDriver { url: String, available: String },

    #[error("unable to connect to {url}{code}: {source}")]
    Connect {
        url: String,
        /// Preformatted ` (SQL error code: N)` suffix, empty when the
        /// driver reported none.
        code: String,
        source: DbError,
    },

    #[error("table {table}: {source}")]
    Schema { table: String, source: DbError },

    #[error("{0}")]
    Batch(String),

    #[error("string contains characters not allowed in a Redshift load, original string: \"{0}\"")]
    InvalidCodepoint(String),

    #[error(transparent)]
    Db(#[from] DbError),
}
