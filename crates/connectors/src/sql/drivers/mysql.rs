use crate::error::DbError;
use crate::sql::driver::{BatchOutcome, ConnectParams, DbConnection, DbDriver, RowSet};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures_util::TryStreamExt;
use model::core::value::Value;
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, MySql, Row, TypeInfo};
use std::str::FromStr;

pub struct MySqlDriver;

#[async_trait]
impl DbDriver for MySqlDriver {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn accepts_url(&self, url: &str) -> bool {
        url.starts_with("mysql://")
    }

    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn DbConnection>, DbError> {
        let mut options = MySqlConnectOptions::from_str(&params.url)?;
        if let Some(user) = &params.user {
            options = options.username(user);
        }
        if let Some(password) = &params.password {
            options = options.password(password);
        }
        let conn = MySqlConnection::connect_with(&options).await?;
        Ok(Box::new(MySqlDbConnection { conn: Some(conn) }))
    }
}

struct MySqlDbConnection {
    conn: Option<MySqlConnection>,
}

impl MySqlDbConnection {
    fn conn(&mut self) -> Result<&mut MySqlConnection, DbError> {
        self.conn.as_mut().ok_or(DbError::Closed)
    }
}

fn bind_values<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &'q [Value],
) -> Query<'q, MySql, MySqlArguments> {
    for p in params {
        query = match p {
            Value::Int(i) => query.bind(*i),
            Value::Float(v) => query.bind(*v),
            Value::Decimal(d) => query.bind(d),
            Value::String(s) => query.bind(s),
            Value::Boolean(b) => query.bind(*b),
            Value::Uuid(u) => query.bind(*u),
            Value::Bytes(b) => query.bind(b),
            Value::Date(d) => query.bind(*d),
            Value::Time(t) => query.bind(*t),
            Value::Timestamp(t) => query.bind(*t),
            Value::Null => query.bind(None::<String>),
        };
    }
    query
}

/// Unsigned columns can hold values past `i64::MAX`; those keep their
/// exact value as a decimal instead of wrapping.
fn unsigned_to_value(v: u64) -> Value {
    match i64::try_from(v) {
        Ok(i) => Value::Int(i),
        Err(_) => Value::Decimal(BigDecimal::from(v)),
    }
}

fn decode_row(row: &MySqlRow) -> Result<Vec<Value>, DbError> {
    let mut values = Vec::with_capacity(row.columns().len());
    for column in row.columns() {
        let idx = column.ordinal();
        let value = match column.type_info().name() {
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
                row.try_get::<Option<i64>, _>(idx)?.map(Value::Int)
            }
            "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
            | "BIGINT UNSIGNED" => row
                .try_get::<Option<u64>, _>(idx)?
                .map(unsigned_to_value),
            "FLOAT" | "DOUBLE" => row.try_get::<Option<f64>, _>(idx)?.map(Value::Float),
            "DECIMAL" => row
                .try_get::<Option<BigDecimal>, _>(idx)?
                .map(Value::Decimal),
            "BOOLEAN" => row.try_get::<Option<bool>, _>(idx)?.map(Value::Boolean),
            "DATE" => row.try_get::<Option<NaiveDate>, _>(idx)?.map(Value::Date),
            "TIME" => row.try_get::<Option<NaiveTime>, _>(idx)?.map(Value::Time),
            "DATETIME" => row
                .try_get::<Option<NaiveDateTime>, _>(idx)?
                .map(|v| Value::Timestamp(DateTime::from_naive_utc_and_offset(v, Utc))),
            "TIMESTAMP" => row
                .try_get::<Option<DateTime<Utc>>, _>(idx)?
                .map(Value::Timestamp),
            "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" => {
                row.try_get::<Option<Vec<u8>>, _>(idx)?.map(Value::Bytes)
            }
            _ => row.try_get::<Option<String>, _>(idx)?.map(Value::String),
        };
        values.push(value.unwrap_or(Value::Null));
    }
    Ok(values)
}

#[async_trait]
impl DbConnection for MySqlDbConnection {
    async fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        let conn = self.conn()?;
        let result = sqlx::query(sql).execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }

    async fn query(&mut self, sql: &str) -> Result<RowSet, DbError> {
        let conn = self.conn()?;
        let rows: Vec<MySqlRow> = sqlx::query(sql).fetch(&mut *conn).try_collect().await?;
        let columns = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(decode_row(row)?);
        }
        Ok(RowSet { columns, rows: out })
    }

    async fn execute_batch(
        &mut self,
        sql: &str,
        batch: &[Vec<Value>],
    ) -> Result<Vec<BatchOutcome>, DbError> {
        let conn = self.conn()?;
        let mut outcomes = Vec::with_capacity(batch.len());
        for params in batch {
            let result = bind_values(sqlx::query(sql), params)
                .execute(&mut *conn)
                .await?;
            outcomes.push(BatchOutcome::Affected(result.rows_affected()));
        }
        Ok(outcomes)
    }

    async fn table_names(&mut self, name: &str) -> Result<Vec<String>, DbError> {
        let conn = self.conn()?;
        let rows = sqlx::query(include_str!("sql/mysql_table_names.sql"))
            .bind(name)
            .fetch_all(&mut *conn)
            .await?;
        let mut names = Vec::with_capacity(rows.len());
        for row in &rows {
            names.push(row.try_get::<String, _>(0)?);
        }
        Ok(names)
    }

    async fn set_auto_commit(&mut self, enabled: bool) -> Result<(), DbError> {
        let sql = if enabled {
            "SET autocommit = 1"
        } else {
            "SET autocommit = 0"
        };
        self.execute(sql).await.map(|_| ())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.execute("COMMIT").await.map(|_| ())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.execute("ROLLBACK").await.map(|_| ())
    }

    async fn close(&mut self) -> Result<(), DbError> {
        if let Some(conn) = self.conn.take() {
            conn.close().await?;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.conn.is_none()
    }
}
