//! Construction from flat string-keyed configuration. Everything a
//! caller can set from the outside funnels through [`Props`] and the
//! `from_props` builders, so misconfiguration surfaces before any
//! connection is opened.

use crate::error::ConnectorError;
use crate::sql::driver::ConnectParams;
use crate::sql::reader::{ReadSpec, DEFAULT_FETCH_SIZE};
use crate::sql::redshift::{AwsCredentials, RedshiftConfig};
use crate::sql::table::TableSpec;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_SEPARATOR: &str = ":";
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Well-known property keys.
pub mod keys {
    pub const DB_URL: &str = "db.url";
    pub const DB_DRIVER: &str = "db.driver";
    pub const DB_USER: &str = "db.user";
    pub const DB_PASSWORD: &str = "db.password";

    pub const TABLE_NAME: &str = "table.name";
    pub const TABLE_COLUMNS: &str = "table.columns";
    pub const TABLE_DEFS: &str = "table.defs";
    pub const TABLE_PRIMARY_KEYS: &str = "table.primarykeys";
    pub const TABLE_EXISTS_QUERY: &str = "table.existsquery";

    pub const SINK_MODE: &str = "sink.mode";
    pub const BATCH_SIZE: &str = "batch.size";
    pub const UPDATE_BY: &str = "update.by";
    pub const INSERT_REPLACE: &str = "insert.replace";

    pub const REDSHIFT_DISTKEY: &str = "redshift.distkey";
    pub const REDSHIFT_SORTKEYS: &str = "redshift.sortkeys";
    pub const REDSHIFT_COPY_OPTIONS: &str = "redshift.copyoptions";
    pub const REDSHIFT_STAGING_DIR: &str = "redshift.stagingdir";
    pub const REDSHIFT_ACCESS_KEY: &str = "redshift.accesskey";
    pub const REDSHIFT_SECRET_KEY: &str = "redshift.secretkey";
    pub const REDSHIFT_DELIMITER: &str = "redshift.delimiter";
    pub const REDSHIFT_QUOTE: &str = "redshift.quote";
    pub const REDSHIFT_KEEP_STAGING: &str = "redshift.keepstaging";
    pub const REDSHIFT_DIRECT_INSERT: &str = "redshift.directinsert";

    pub const READ_COLUMNS: &str = "read.columns";
    pub const READ_CONDITIONS: &str = "read.conditions";
    pub const READ_ORDER_BY: &str = "read.orderby";
    pub const READ_FETCH_SIZE: &str = "read.fetchsize";
    pub const READ_LIMIT: &str = "read.limit";
    pub const READ_SELECT_QUERY: &str = "read.selectquery";
    pub const READ_COUNT_QUERY: &str = "read.countquery";
}

/// Flat string properties with typed getters. List values are joined
/// with a configurable separator, `:` unless overridden. Empty values
/// count as unset.
#[derive(Debug, Clone)]
pub struct Props {
    values: HashMap<String, String>,
    separator: String,
}

impl Default for Props {
    fn default() -> Self {
        Props::new()
    }
}

impl Props {
    pub fn new() -> Self {
        Props {
            values: HashMap::new(),
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }

    pub fn from_map(values: HashMap<String, String>) -> Self {
        Props {
            values,
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }

    pub fn with_separator(mut self, separator: &str) -> Self {
        self.separator = separator.to_string();
        self
    }

    pub fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn get_list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(raw) => raw
                .split(&self.separator)
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        }
    }

    fn parsed<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConnectorError> {
        match self.get(key) {
            Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
                ConnectorError::Config(format!("invalid value for {key}: {raw}"))
            }),
            None => Ok(None),
        }
    }

    pub fn get_usize(&self, key: &str, default: usize) -> Result<usize, ConnectorError> {
        Ok(self.parsed::<usize>(key)?.unwrap_or(default))
    }

    pub fn get_u64(&self, key: &str) -> Result<Option<u64>, ConnectorError> {
        self.parsed::<u64>(key)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, ConnectorError> {
        match self.get(key) {
            Some(raw) => match raw.to_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(ConnectorError::Config(format!(
                    "invalid value for {key}: {raw}"
                ))),
            },
            None => Ok(default),
        }
    }

    pub fn require(&self, key: &str) -> Result<&str, ConnectorError> {
        self.get(key)
            .ok_or_else(|| ConnectorError::Config(format!("no {key} given")))
    }
}

/// Policy for an existing target table at job start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkMode {
    /// Drop and recreate the table before writing.
    Replace,
    /// Reuse the table; rows may route to UPDATE.
    Update,
    #[default]
    Keep,
    Append,
}

impl FromStr for SinkMode {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "REPLACE" => Ok(SinkMode::Replace),
            "UPDATE" => Ok(SinkMode::Update),
            "KEEP" => Ok(SinkMode::Keep),
            "APPEND" => Ok(SinkMode::Append),
            _ => Err(ConnectorError::Config(format!("unknown sink mode: {s}"))),
        }
    }
}

impl fmt::Display for SinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SinkMode::Replace => "REPLACE",
            SinkMode::Update => "UPDATE",
            SinkMode::Keep => "KEEP",
            SinkMode::Append => "APPEND",
        };
        write!(f, "{name}")
    }
}

/// Everything a sink needs beyond the table itself.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub mode: SinkMode,
    pub batch_size: usize,
    pub update_by: Vec<String>,
    /// MySQL only: emit the ON DUPLICATE KEY UPDATE clause.
    pub replace_on_insert: bool,
    pub redshift: RedshiftConfig,
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig {
            mode: SinkMode::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            update_by: Vec::new(),
            replace_on_insert: false,
            redshift: RedshiftConfig::default(),
        }
    }
}

impl SinkConfig {
    pub fn from_props(props: &Props) -> Result<Self, ConnectorError> {
        let mode = match props.get(keys::SINK_MODE) {
            Some(raw) => raw.parse()?,
            None => SinkMode::default(),
        };
        let batch_size = props.get_usize(keys::BATCH_SIZE, DEFAULT_BATCH_SIZE)?;
        if batch_size == 0 {
            return Err(ConnectorError::Config(
                "batch.size must be at least 1".to_string(),
            ));
        }
        Ok(SinkConfig {
            mode,
            batch_size,
            update_by: props.get_list(keys::UPDATE_BY),
            replace_on_insert: props.get_bool(keys::INSERT_REPLACE, false)?,
            redshift: RedshiftConfig::from_props(props)?,
        })
    }
}

impl RedshiftConfig {
    pub fn from_props(props: &Props) -> Result<Self, ConnectorError> {
        let mut config = RedshiftConfig::default();
        if let Some(dir) = props.get(keys::REDSHIFT_STAGING_DIR) {
            config.staging_dir = PathBuf::from(dir);
        }
        config.credentials = match (
            props.get(keys::REDSHIFT_ACCESS_KEY),
            props.get(keys::REDSHIFT_SECRET_KEY),
        ) {
            (Some(access), Some(secret)) => Some(AwsCredentials::new(access, secret)),
            _ => AwsCredentials::from_env(),
        };
        let mut copy_options = Vec::new();
        for raw in props.get_list(keys::REDSHIFT_COPY_OPTIONS) {
            copy_options.push(raw.parse()?);
        }
        config.copy_options = copy_options;
        if let Some(delimiter) = props.get(keys::REDSHIFT_DELIMITER) {
            config.delimiter = delimiter.to_string();
        }
        if let Some(quote) = props.get(keys::REDSHIFT_QUOTE) {
            config.quote = quote.to_string();
        }
        config.keep_staging = props.get_bool(keys::REDSHIFT_KEEP_STAGING, false)?;
        config.use_direct_insert = props.get_bool(keys::REDSHIFT_DIRECT_INSERT, true)?;
        Ok(config)
    }
}

impl ConnectParams {
    pub fn from_props(props: &Props) -> Result<Self, ConnectorError> {
        Ok(ConnectParams {
            url: props.require(keys::DB_URL)?.to_string(),
            driver: props.get(keys::DB_DRIVER).map(str::to_string),
            user: props.get(keys::DB_USER).map(str::to_string),
            password: props.get(keys::DB_PASSWORD).map(str::to_string),
        })
    }
}

impl TableSpec {
    pub fn from_props(props: &Props) -> Result<Self, ConnectorError> {
        let name = props
            .get(keys::TABLE_NAME)
            .ok_or_else(|| ConnectorError::Config("no tablename given".to_string()))?;
        let mut spec = TableSpec::named(name);
        spec.column_names = props.get_list(keys::TABLE_COLUMNS);
        spec.column_defs = props.get_list(keys::TABLE_DEFS);
        spec.primary_keys = props.get_list(keys::TABLE_PRIMARY_KEYS);
        spec.exists_query = props.get(keys::TABLE_EXISTS_QUERY).map(str::to_string);
        spec.distribution_key = props.get(keys::REDSHIFT_DISTKEY).map(str::to_string);
        spec.sort_keys = props.get_list(keys::REDSHIFT_SORTKEYS);
        Ok(spec)
    }
}

impl ReadSpec {
    pub fn from_props(props: &Props) -> Result<Self, ConnectorError> {
        let order_by = props.get_list(keys::READ_ORDER_BY);
        let fetch_size = props.get_usize(keys::READ_FETCH_SIZE, DEFAULT_FETCH_SIZE)?;
        if fetch_size == 0 {
            return Err(ConnectorError::Config(
                "read.fetchsize must be at least 1".to_string(),
            ));
        }
        let read = ReadSpec {
            columns: props.get_list(keys::READ_COLUMNS),
            conditions: props.get(keys::READ_CONDITIONS).map(str::to_string),
            order_by: if order_by.is_empty() {
                None
            } else {
                Some(order_by.join(", "))
            },
            fetch_size,
            limit: props.get_u64(keys::READ_LIMIT)?,
            select_query: props.get(keys::READ_SELECT_QUERY).map(str::to_string),
            count_query: props.get(keys::READ_COUNT_QUERY).map(str::to_string),
        };
        if read.select_query.is_some() && read.count_query.is_none() {
            return Err(ConnectorError::Config(
                "no count query for select query given".to_string(),
            ));
        }
        Ok(read)
    }
}
