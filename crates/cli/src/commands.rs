use crate::error::CliError;
use crate::output;
use clap::{Args, Subcommand};
use connectors::conf::{keys, Props, SinkConfig};
use connectors::sql::client::SqlTable;
use connectors::sql::dialect::Dialect;
use model::core::value::{FieldValue, Value};
use model::records::row::RowData;
use std::str::FromStr;
use tracing::info;

/// Connection and table flags shared by every subcommand. Each flag
/// mirrors a property key, and `--set` covers the rest of them.
#[derive(Args)]
pub struct ConnectionArgs {
    #[arg(long, help = "Database connection URL")]
    pub url: String,

    #[arg(long, help = "Driver name (inferred from the URL scheme if omitted)")]
    pub driver: Option<String>,

    #[arg(long, help = "Database user")]
    pub user: Option<String>,

    #[arg(long, help = "Database password")]
    pub password: Option<String>,

    #[arg(long, default_value = "generic", help = "SQL dialect: generic, mysql, redshift, teradata, oracle")]
    pub dialect: String,

    #[arg(long, help = "Target table name")]
    pub table: String,

    #[arg(long, help = "Column names, ':' separated")]
    pub columns: Option<String>,

    #[arg(long, help = "Column type defs, ':' separated, aligned with --columns")]
    pub defs: Option<String>,

    #[arg(long, help = "Primary key columns, ':' separated")]
    pub primary_keys: Option<String>,

    #[arg(long = "set", value_name = "KEY=VALUE", help = "Any other property, repeatable")]
    pub extra: Vec<String>,
}

impl ConnectionArgs {
    pub fn dialect(&self) -> Result<Dialect, CliError> {
        Ok(Dialect::from_str(&self.dialect)?)
    }

    pub fn props(&self) -> Result<Props, CliError> {
        let mut props = Props::new()
            .set(keys::DB_URL, self.url.clone())
            .set(keys::TABLE_NAME, self.table.clone());
        if let Some(driver) = &self.driver {
            props = props.set(keys::DB_DRIVER, driver.clone());
        }
        if let Some(user) = &self.user {
            props = props.set(keys::DB_USER, user.clone());
        }
        if let Some(password) = &self.password {
            props = props.set(keys::DB_PASSWORD, password.clone());
        }
        if let Some(columns) = &self.columns {
            props = props.set(keys::TABLE_COLUMNS, columns.clone());
        }
        if let Some(defs) = &self.defs {
            props = props.set(keys::TABLE_DEFS, defs.clone());
        }
        if let Some(primary_keys) = &self.primary_keys {
            props = props.set(keys::TABLE_PRIMARY_KEYS, primary_keys.clone());
        }
        for raw in &self.extra {
            let (key, value) = raw.split_once('=').ok_or_else(|| {
                CliError::InvalidArguments(format!("--set expects KEY=VALUE, got: {raw}"))
            })?;
            props = props.set(key, value.to_string());
        }
        Ok(props)
    }

    pub fn table(&self) -> Result<SqlTable, CliError> {
        Ok(SqlTable::from_props(&self.props()?, self.dialect()?)?)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Test whether the target table exists
    Exists {
        #[command(flatten)]
        conn: ConnectionArgs,
    },
    /// Create the target table from the configured columns
    Create {
        #[command(flatten)]
        conn: ConnectionArgs,
    },
    /// Drop the target table
    Drop {
        #[command(flatten)]
        conn: ConnectionArgs,
    },
    /// Run a query and print the rows as JSON
    Query {
        #[command(flatten)]
        conn: ConnectionArgs,

        #[arg(long, help = "SQL query to run")]
        sql: String,

        #[arg(
            long,
            default_value_t = -1,
            help = "Row cap: -1 for unlimited, 0 to discard results"
        )]
        max_rows: i64,

        #[arg(long, help = "Write the JSON to this file instead of stdout")]
        output: Option<String>,
    },
    /// Run an update statement and print the affected-row count
    Exec {
        #[command(flatten)]
        conn: ConnectionArgs,

        #[arg(long, help = "SQL statement to run")]
        sql: String,
    },
    /// Stream a CSV file into the table through the batch sink
    Load {
        #[command(flatten)]
        conn: ConnectionArgs,

        #[arg(long, help = "CSV file to load")]
        file: String,

        #[arg(
            long,
            help = "Treat the first CSV record as data; column names then come from --columns"
        )]
        no_header: bool,
    },
}

pub async fn run(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Exists { conn } => {
            let exists = conn.table()?.exists().await?;
            println!("{exists}");
        }
        Commands::Create { conn } => {
            let created = conn.table()?.create().await?;
            info!("created table: {}", created);
        }
        Commands::Drop { conn } => {
            let dropped = conn.table()?.drop().await?;
            info!("dropped table: {}", dropped);
        }
        Commands::Query {
            conn,
            sql,
            max_rows,
            output,
        } => {
            let rows = conn.table()?.execute_query(&sql, max_rows).await?;
            match output {
                Some(path) => output::write_rows(&rows, path).await?,
                None => output::print_rows(&rows)?,
            }
        }
        Commands::Exec { conn, sql } => {
            let affected = conn.table()?.execute_update(&sql).await?;
            println!("{affected}");
        }
        Commands::Load {
            conn,
            file,
            no_header,
        } => {
            let table = conn.table()?;
            let config = SinkConfig::from_props(&conn.props()?)?;
            let loaded = load_csv(&table, config, &file, !no_header).await?;
            info!("loaded {} rows into {}", loaded, table.spec().name);
        }
    }
    Ok(())
}

/// Least-surprise cell typing for CSV input: integers and floats keep
/// their numeric form, empty cells become NULL, everything else stays
/// text.
fn parse_cell(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::Float(f);
    }
    Value::String(raw.to_string())
}

async fn load_csv(
    table: &SqlTable,
    config: SinkConfig,
    path: &str,
    header: bool,
) -> Result<u64, CliError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(header)
        .from_path(path)?;

    let columns: Vec<String> = if header {
        reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect()
    } else {
        table.spec().column_names.clone()
    };
    if columns.is_empty() {
        return Err(CliError::InvalidArguments(
            "no column names available, pass --columns or a CSV header".to_string(),
        ));
    }

    let entity = table.spec().name.clone();
    let mut sink = table.open_sink(config).await?;
    let mut loaded: u64 = 0;
    for record in reader.records() {
        let record = record?;
        let fields: Vec<FieldValue> = columns
            .iter()
            .zip(record.iter())
            .map(|(name, raw)| match parse_cell(raw) {
                Value::Null => FieldValue::null(name),
                value => FieldValue::new(name, value),
            })
            .collect();
        if let Err(error) = sink.write(&RowData::new(&entity, fields)).await {
            if let Err(close_error) = sink.close().await {
                tracing::warn!("error closing sink after failed write: {close_error}");
            }
            return Err(error.into());
        }
        loaded += 1;
    }
    sink.close().await?;
    Ok(loaded)
}
