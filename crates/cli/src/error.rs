use connectors::error::ConnectorError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to run the database operation: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Failed to read the input file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse the input file as CSV: {0}")]
    CsvParse(#[from] csv::Error),

    #[error("Failed to serialize rows to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}
