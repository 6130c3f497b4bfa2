//! Redshift staged loading. Rows are encoded to a local delimited
//! staging file while the sink is open; close issues a single COPY
//! statement over a short-lived connection and removes the staging file.
//!
//! Direct (non-staged) Redshift writes go through the generic batched
//! sink instead, so this module only carries the staged path and the
//! COPY command plumbing shared by both.

use crate::error::{ConnectorError, DbError};
use crate::sink::DataSink;
use crate::sql::dialect::Dialect;
use crate::sql::driver::{
    close_connection, close_quietly, ConnectParams, DbConnection, DriverRegistry,
};
use crate::sql::schema;
use crate::sql::table::TableSpec;
use async_trait::async_trait;
use model::core::value::Value;
use model::records::row::RowData;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_DELIMITER: &str = ",";
pub const DEFAULT_QUOTE: &str = "\"";
pub const DEFAULT_STAGING_DIR: &str = "/tmp";

/// AWS key pair embedded into the COPY command's CREDENTIALS clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key: String,
    pub secret_key: String,
}

impl AwsCredentials {
    pub fn new(access_key: &str, secret_key: &str) -> Self {
        AwsCredentials {
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        }
    }

    /// Reads the standard `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY`
    /// variables, returning `None` unless both are set and non-empty.
    pub fn from_env() -> Option<Self> {
        let access_key = std::env::var("AWS_ACCESS_KEY_ID").ok()?;
        let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok()?;
        if access_key.trim().is_empty() || secret_key.trim().is_empty() {
            return None;
        }
        Some(AwsCredentials::new(&access_key, &secret_key))
    }
}

/// COPY tuning options, rendered into the command's option list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOption {
    FixedWidth(String),
    Delimiter(String),
    /// CSV input, optionally with a QUOTE character.
    Csv(Option<String>),
    Encrypted,
    Gzip,
    Lzop,
    RemoveQuotes,
    ExplicitIds,
    AcceptInvChars(String),
    MaxError(String),
    DateFormat(String),
    TimeFormat(String),
    IgnoreHeader(String),
    AcceptAnyDate,
    IgnoreBlankLines,
    TruncateColumns,
    FillRecord,
    TrimBlanks,
    NoLoad,
    Null(String),
    EmptyAsNull,
    BlanksAsNull,
    CompRows(String),
    CompUpdate(String),
    StatUpdate(String),
    Escape,
    RoundEc,
}

impl fmt::Display for CopyOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyOption::FixedWidth(spec) => write!(f, "FIXEDWIDTH '{spec}'"),
            CopyOption::Delimiter(d) => write!(f, "DELIMITER '{d}'"),
            CopyOption::Csv(Some(quote)) => write!(f, "CSV QUOTE '{quote}'"),
            CopyOption::Csv(None) => write!(f, "CSV"),
            CopyOption::Encrypted => write!(f, "ENCRYPTED"),
            CopyOption::Gzip => write!(f, "GZIP"),
            CopyOption::Lzop => write!(f, "LZOP"),
            CopyOption::RemoveQuotes => write!(f, "REMOVEQUOTES"),
            CopyOption::ExplicitIds => write!(f, "EXPLICIT_IDS"),
            CopyOption::AcceptInvChars(c) => write!(f, "ACCEPTINVCHARS '{c}'"),
            CopyOption::MaxError(n) => write!(f, "MAXERROR {n}"),
            CopyOption::DateFormat(fmt_) => write!(f, "DATEFORMAT '{fmt_}'"),
            CopyOption::TimeFormat(fmt_) => write!(f, "TIMEFORMAT '{fmt_}'"),
            CopyOption::IgnoreHeader(n) => write!(f, "IGNOREHEADER {n}"),
            CopyOption::AcceptAnyDate => write!(f, "ACCEPTANYDATE"),
            CopyOption::IgnoreBlankLines => write!(f, "IGNOREBLANKLINES"),
            CopyOption::TruncateColumns => write!(f, "TRUNCATECOLUMNS"),
            CopyOption::FillRecord => write!(f, "FILLRECORD"),
            CopyOption::TrimBlanks => write!(f, "TRIMBLANKS"),
            CopyOption::NoLoad => write!(f, "NOLOAD"),
            CopyOption::Null(s) => write!(f, "NULL '{s}'"),
            CopyOption::EmptyAsNull => write!(f, "EMPTYASNULL"),
            CopyOption::BlanksAsNull => write!(f, "BLANKSASNULL"),
            CopyOption::CompRows(n) => write!(f, "COMPROWS {n}"),
            CopyOption::CompUpdate(v) => write!(f, "COMPUPDATE {v}"),
            CopyOption::StatUpdate(v) => write!(f, "STATUPDATE {v}"),
            CopyOption::Escape => write!(f, "ESCAPE"),
            CopyOption::RoundEc => write!(f, "ROUNDEC"),
        }
    }
}

fn required_arg(name: &str, arg: Option<String>) -> Result<String, ConnectorError> {
    arg.ok_or_else(|| ConnectorError::Config(format!("copy option {name} requires an argument")))
}

fn flag_option(
    name: &str,
    arg: Option<String>,
    option: CopyOption,
) -> Result<CopyOption, ConnectorError> {
    if arg.is_some() {
        return Err(ConnectorError::Config(format!(
            "copy option {name} takes no argument"
        )));
    }
    Ok(option)
}

impl FromStr for CopyOption {
    type Err = ConnectorError;

    /// Parses `NAME` or `NAME=ARG` forms, as they appear in
    /// configuration properties.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, arg) = match s.split_once('=') {
            Some((name, arg)) => (name.trim(), Some(arg.trim().to_string())),
            None => (s.trim(), None),
        };
        let upper = name.to_uppercase();
        match upper.as_str() {
            "FIXEDWIDTH" => Ok(CopyOption::FixedWidth(required_arg(&upper, arg)?)),
            "DELIMITER" => Ok(CopyOption::Delimiter(required_arg(&upper, arg)?)),
            "CSV" => Ok(CopyOption::Csv(arg)),
            "ENCRYPTED" => flag_option(&upper, arg, CopyOption::Encrypted),
            "GZIP" => flag_option(&upper, arg, CopyOption::Gzip),
            "LZOP" => flag_option(&upper, arg, CopyOption::Lzop),
            "REMOVEQUOTES" => flag_option(&upper, arg, CopyOption::RemoveQuotes),
            "EXPLICIT_IDS" => flag_option(&upper, arg, CopyOption::ExplicitIds),
            "ACCEPTINVCHARS" => Ok(CopyOption::AcceptInvChars(required_arg(&upper, arg)?)),
            "MAXERROR" => Ok(CopyOption::MaxError(required_arg(&upper, arg)?)),
            "DATEFORMAT" => Ok(CopyOption::DateFormat(required_arg(&upper, arg)?)),
            "TIMEFORMAT" => Ok(CopyOption::TimeFormat(required_arg(&upper, arg)?)),
            "IGNOREHEADER" => Ok(CopyOption::IgnoreHeader(required_arg(&upper, arg)?)),
            "ACCEPTANYDATE" => flag_option(&upper, arg, CopyOption::AcceptAnyDate),
            "IGNOREBLANKLINES" => flag_option(&upper, arg, CopyOption::IgnoreBlankLines),
            "TRUNCATECOLUMNS" => flag_option(&upper, arg, CopyOption::TruncateColumns),
            "FILLRECORD" => flag_option(&upper, arg, CopyOption::FillRecord),
            "TRIMBLANKS" => flag_option(&upper, arg, CopyOption::TrimBlanks),
            "NOLOAD" => flag_option(&upper, arg, CopyOption::NoLoad),
            "NULL" => Ok(CopyOption::Null(required_arg(&upper, arg)?)),
            "EMPTYASNULL" => flag_option(&upper, arg, CopyOption::EmptyAsNull),
            "BLANKSASNULL" => flag_option(&upper, arg, CopyOption::BlanksAsNull),
            "COMPROWS" => Ok(CopyOption::CompRows(required_arg(&upper, arg)?)),
            "COMPUPDATE" => Ok(CopyOption::CompUpdate(required_arg(&upper, arg)?)),
            "STATUPDATE" => Ok(CopyOption::StatUpdate(required_arg(&upper, arg)?)),
            "ESCAPE" => flag_option(&upper, arg, CopyOption::Escape),
            "ROUNDEC" => flag_option(&upper, arg, CopyOption::RoundEc),
            _ => Err(ConnectorError::Config(format!("unknown copy option: {s}"))),
        }
    }
}

/// Puts the defaults every staged load relies on in place: a DELIMITER
/// option matching the encoder and REMOVEQUOTES to undo its quoting.
pub fn ensure_copy_defaults(options: &mut Vec<CopyOption>, delimiter: &str) {
    if !options
        .iter()
        .any(|o| matches!(o, CopyOption::Delimiter(_)))
    {
        options.push(CopyOption::Delimiter(delimiter.to_string()));
    }
    if !options.iter().any(|o| matches!(o, CopyOption::RemoveQuotes)) {
        options.push(CopyOption::RemoveQuotes);
    }
}

/// Renders the COPY command for a staged load.
pub fn build_copy_command(
    table: &str,
    location: &str,
    credentials: Option<&AwsCredentials>,
    options: &[CopyOption],
) -> String {
    let auth = credentials
        .map(|c| {
            format!(
                " CREDENTIALS 'aws_access_key_id={};aws_secret_access_key={}' ",
                c.access_key, c.secret_key
            )
        })
        .unwrap_or_default();
    let rendered: Vec<String> = options.iter().map(|o| o.to_string()).collect();
    format!(
        "COPY {} from '{}' {} {} ;",
        table,
        location,
        auth,
        rendered.join(" ")
    )
}

/// Codepoints Redshift refuses to load: the UTF-16 surrogate range and
/// the Unicode non-characters U+FDD0..U+FDEF and U+FFFE/U+FFFF.
pub fn is_excluded_codepoint(codepoint: u32) -> bool {
    (0xD800..=0xDFFF).contains(&codepoint)
        || (0xFDD0..=0xFDEF).contains(&codepoint)
        || (0xFFFE..=0xFFFF).contains(&codepoint)
}

/// Writes rows as delimited text lines the COPY command can read back.
/// String values are screened for excluded codepoints, escaped and
/// quoted; nulls render as empty fields; everything else renders in its
/// plain lexical form.
#[derive(Debug, Clone)]
pub struct DelimitedEncoder {
    delimiter: String,
    quote: String,
}

impl Default for DelimitedEncoder {
    fn default() -> Self {
        DelimitedEncoder {
            delimiter: DEFAULT_DELIMITER.to_string(),
            quote: DEFAULT_QUOTE.to_string(),
        }
    }
}

impl DelimitedEncoder {
    pub fn new(delimiter: &str, quote: &str) -> Self {
        DelimitedEncoder {
            delimiter: delimiter.to_string(),
            quote: quote.to_string(),
        }
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    fn escape(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        for ch in value.chars() {
            if ch == '\\' || ch == '"' || ch == '\'' {
                out.push('\\');
            }
            out.push(ch);
        }
        out
    }

    pub fn encode_row(&self, values: &[Value]) -> Result<String, ConnectorError> {
        let mut line = String::new();
        for (i, value) in values.iter().enumerate() {
            if i != 0 {
                line.push_str(&self.delimiter);
            }
            match value {
                Value::Null => {}
                Value::String(s) => {
                    if s.chars().any(|c| is_excluded_codepoint(c as u32)) {
                        return Err(ConnectorError::InvalidCodepoint(s.clone()));
                    }
                    line.push_str(&self.quote);
                    line.push_str(&self.escape(s));
                    line.push_str(&self.quote);
                }
                other => line.push_str(&other.to_string()),
            }
        }
        Ok(line)
    }
}

/// Staged-load settings carried alongside the generic sink config.
#[derive(Debug, Clone)]
pub struct RedshiftConfig {
    pub staging_dir: PathBuf,
    pub credentials: Option<AwsCredentials>,
    pub copy_options: Vec<CopyOption>,
    pub delimiter: String,
    pub quote: String,
    /// Keeps the staging file around after the COPY for debugging.
    pub keep_staging: bool,
    /// Row-wise INSERTs through the generic batched sink instead of a
    /// staged COPY.
    pub use_direct_insert: bool,
}

impl Default for RedshiftConfig {
    fn default() -> Self {
        RedshiftConfig {
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
            credentials: None,
            copy_options: Vec::new(),
            delimiter: DEFAULT_DELIMITER.to_string(),
            quote: DEFAULT_QUOTE.to_string(),
            keep_staging: false,
            use_direct_insert: true,
        }
    }
}

/// Staged Redshift sink: encodes rows to a staging file, then loads the
/// file with one COPY statement on close.
pub struct RedshiftSink {
    registry: DriverRegistry,
    params: ConnectParams,
    spec: TableSpec,
    config: RedshiftConfig,
    encoder: DelimitedEncoder,
    staging_path: PathBuf,
    writer: Option<BufWriter<File>>,
    rows_staged: u64,
}

impl RedshiftSink {
    pub fn staged(
        registry: DriverRegistry,
        params: ConnectParams,
        spec: TableSpec,
        config: RedshiftConfig,
    ) -> Self {
        let encoder = DelimitedEncoder::new(&config.delimiter, &config.quote);
        let staging_path = config
            .staging_dir
            .join(format!("{}-{}", spec.name, Uuid::new_v4()));
        RedshiftSink {
            registry,
            params,
            spec,
            config,
            encoder,
            staging_path,
            writer: None,
            rows_staged: 0,
        }
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    async fn open_connection(&self) -> Result<Box<dyn DbConnection>, ConnectorError> {
        self.registry.open(&self.params).await
    }

    async fn run_copy(&mut self) -> Result<(), ConnectorError> {
        let delimiter = self.encoder.delimiter().to_string();
        ensure_copy_defaults(&mut self.config.copy_options, &delimiter);
        let location = self.staging_path.display().to_string();
        let command = build_copy_command(
            &self.spec.name,
            &location,
            self.config.credentials.as_ref(),
            &self.config.copy_options,
        );
        let mut conn = self.open_connection().await?;
        match schema::execute_update(conn.as_mut(), &command).await {
            Ok(count) => {
                if count != 0 {
                    info!("copy return code: {} ( expected: 0 )", count);
                }
                close_connection(conn.as_mut()).await?;
                Ok(())
            }
            Err(error) => {
                close_quietly(conn.as_mut()).await;
                Err(error)
            }
        }
    }

    fn remove_staging(&self) {
        if self.config.keep_staging {
            info!("keeping staging file: {}", self.staging_path.display());
            return;
        }
        if self.staging_path.exists() {
            if let Err(error) = fs::remove_file(&self.staging_path) {
                warn!(
                    "unable to remove staging file {}: {}",
                    self.staging_path.display(),
                    error
                );
            }
        }
    }
}

#[async_trait]
impl DataSink for RedshiftSink {
    /// Forces the target table into existence, then opens the staging
    /// file.
    async fn open(&mut self) -> Result<(), ConnectorError> {
        let mut conn = self.open_connection().await?;
        let ensured = match schema::table_exists(conn.as_mut(), &self.spec).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                schema::create_table_checked(conn.as_mut(), &self.spec, Dialect::Redshift).await
            }
            Err(error) => Err(error),
        };
        close_quietly(conn.as_mut()).await;
        ensured?;

        fs::create_dir_all(&self.config.staging_dir).map_err(DbError::from)?;
        info!("creating staging file: {}", self.staging_path.display());
        let file = File::create(&self.staging_path).map_err(DbError::from)?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    async fn write(&mut self, row: &RowData) -> Result<(), ConnectorError> {
        let values: Vec<Value> = self
            .spec
            .column_names
            .iter()
            .map(|column| row.get_value(column))
            .collect();
        let line = self.encoder.encode_row(&values)?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| ConnectorError::Batch("sink is not open".to_string()))?;
        writeln!(writer, "{line}").map_err(DbError::from)?;
        self.rows_staged += 1;
        Ok(())
    }

    /// Finalizes the staging file, loads it with COPY and removes it.
    /// The staging file is cleaned up even when the load fails.
    async fn close(&mut self) -> Result<(), ConnectorError> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        writer.flush().map_err(DbError::from)?;
        drop(writer);

        info!(
            "loading {} staged rows into {}",
            self.rows_staged, self.spec.name
        );
        let result = self.run_copy().await;
        self.remove_staging();
        result
    }
}
