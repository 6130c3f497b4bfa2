use crate::error::CliError;
use connectors::sql::driver::RowSet;
use model::core::value::Value;
use serde_json::{json, Map};

/// Lossy JSON form of a cell value. Numbers and booleans keep their
/// type, everything else prints through its lexical form.
fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Int(i) => json!(i),
        Value::Float(f) => json!(f),
        Value::Boolean(b) => json!(b),
        other => json!(other.to_string()),
    }
}

fn rows_json(rows: &RowSet) -> Result<String, CliError> {
    let objects: Vec<serde_json::Value> = rows
        .rows
        .iter()
        .map(|row| {
            let mut object = Map::new();
            for (column, value) in rows.columns.iter().zip(row) {
                object.insert(column.clone(), to_json(value));
            }
            serde_json::Value::Object(object)
        })
        .collect();
    Ok(serde_json::to_string_pretty(&objects)?)
}

pub async fn write_rows(rows: &RowSet, path: String) -> Result<(), CliError> {
    let rows_json = rows_json(rows)?;
    tokio::fs::write(path, rows_json).await?;
    Ok(())
}

pub fn print_rows(rows: &RowSet) -> Result<(), CliError> {
    let rows_json = rows_json(rows)?;
    println!("{rows_json}");
    Ok(())
}
