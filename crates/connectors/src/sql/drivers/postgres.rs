use crate::error::DbError;
use crate::sql::driver::{BatchOutcome, ConnectParams, DbConnection, DbDriver, RowSet};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures_util::TryStreamExt;
use model::core::value::Value;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, Postgres, Row, TypeInfo};
use std::str::FromStr;
use uuid::Uuid;

pub struct PostgresDriver;

#[async_trait]
impl DbDriver for PostgresDriver {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn accepts_url(&self, url: &str) -> bool {
        url.starts_with("postgres://") || url.starts_with("postgresql://")
    }

    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn DbConnection>, DbError> {
        let mut options = PgConnectOptions::from_str(&params.url)?;
        if let Some(user) = &params.user {
            options = options.username(user);
        }
        if let Some(password) = &params.password {
            options = options.password(password);
        }
        let conn = PgConnection::connect_with(&options).await?;
        Ok(Box::new(PgDbConnection {
            conn: Some(conn),
            auto_commit: true,
            in_tx: false,
        }))
    }
}

/// Rewrites `?` placeholders into the `$1`, `$2`, ... form the server
/// expects. Question marks inside quoted literals and identifiers are
/// left alone.
fn substitute_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut index = 0;
    let mut in_single = false;
    let mut in_double = false;
    for ch in sql.chars() {
        match ch {
            '\'' if !in_double => {
                in_single = !in_single;
                out.push(ch);
            }
            '"' if !in_single => {
                in_double = !in_double;
                out.push(ch);
            }
            '?' if !in_single && !in_double => {
                index += 1;
                out.push('$');
                out.push_str(&index.to_string());
            }
            _ => out.push(ch),
        }
    }
    out
}

struct PgDbConnection {
    conn: Option<PgConnection>,
    auto_commit: bool,
    in_tx: bool,
}

impl PgDbConnection {
    fn conn(&mut self) -> Result<&mut PgConnection, DbError> {
        self.conn.as_mut().ok_or(DbError::Closed)
    }

    /// Opens a transaction before the first statement when autocommit is
    /// off. The server has no session-level autocommit switch, so the
    /// connection tracks it here instead.
    async fn ensure_tx(&mut self) -> Result<(), DbError> {
        if !self.auto_commit && !self.in_tx {
            let conn = self.conn()?;
            sqlx::query("BEGIN").execute(&mut *conn).await?;
            self.in_tx = true;
        }
        Ok(())
    }
}

fn bind_values<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [Value],
) -> Query<'q, Postgres, PgArguments> {
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

fn decode_row(row: &PgRow) -> Result<Vec<Value>, DbError> {
    let mut values = Vec::with_capacity(row.columns().len());
    for column in row.columns() {
        let idx = column.ordinal();
        let value = match column.type_info().name() {
            "INT2" | "INT4" | "INT8" => row.try_get::<Option<i64>, _>(idx)?.map(Value::Int),
            "FLOAT4" | "FLOAT8" => row.try_get::<Option<f64>, _>(idx)?.map(Value::Float),
            "NUMERIC" => row
                .try_get::<Option<BigDecimal>, _>(idx)?
                .map(Value::Decimal),
            "BOOL" => row.try_get::<Option<bool>, _>(idx)?.map(Value::Boolean),
            "UUID" => row.try_get::<Option<Uuid>, _>(idx)?.map(Value::Uuid),
            "DATE" => row.try_get::<Option<NaiveDate>, _>(idx)?.map(Value::Date),
            "TIME" => row.try_get::<Option<NaiveTime>, _>(idx)?.map(Value::Time),
            "TIMESTAMP" => row
                .try_get::<Option<NaiveDateTime>, _>(idx)?
                .map(|v| Value::Timestamp(DateTime::from_naive_utc_and_offset(v, Utc))),
            "TIMESTAMPTZ" => row
                .try_get::<Option<DateTime<Utc>>, _>(idx)?
                .map(Value::Timestamp),
            "BYTEA" => row.try_get::<Option<Vec<u8>>, _>(idx)?.map(Value::Bytes),
            _ => row.try_get::<Option<String>, _>(idx)?.map(Value::String),
        };
        values.push(value.unwrap_or(Value::Null));
    }
    Ok(values)
}

#[async_trait]
impl DbConnection for PgDbConnection {
    async fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        self.ensure_tx().await?;
        let conn = self.conn()?;
        let result = sqlx::query(sql).execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }

    async fn query(&mut self, sql: &str) -> Result<RowSet, DbError> {
        self.ensure_tx().await?;
        let conn = self.conn()?;
        let rows: Vec<PgRow> = sqlx::query(sql).fetch(&mut *conn).try_collect().await?;
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
        self.ensure_tx().await?;
        let rewritten = substitute_placeholders(sql);
        let conn = self.conn()?;
        let mut outcomes = Vec::with_capacity(batch.len());
        for params in batch {
            let result = bind_values(sqlx::query(&rewritten), params)
                .execute(&mut *conn)
                .await?;
            outcomes.push(BatchOutcome::Affected(result.rows_affected()));
        }
        Ok(outcomes)
    }

    async fn table_names(&mut self, name: &str) -> Result<Vec<String>, DbError> {
        self.ensure_tx().await?;
        let conn = self.conn()?;
        let rows = sqlx::query(include_str!("sql/postgres_table_names.sql"))
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
        if enabled && self.in_tx {
            self.commit().await?;
        }
        self.auto_commit = enabled;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        if self.in_tx {
            let conn = self.conn()?;
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            self.in_tx = false;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        if self.in_tx {
            let conn = self.conn()?;
            sqlx::query("ROLLBACK").execute(&mut *conn).await?;
            self.in_tx = false;
        }
        Ok(())
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
