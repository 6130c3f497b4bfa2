//! Schema-level operations executed over a [`DbConnection`]: existence
//! checks, CREATE/DROP, and ad-hoc statement execution.

use crate::error::{ConnectorError, DbError};
use crate::sql::dialect::Dialect;
use crate::sql::driver::{DbConnection, RowSet};
use crate::sql::table::TableSpec;
use crate::sql::types::TypeMapper;
use model::core::field::Field;
use tracing::{debug, info, warn};

/// Tests whether the table named by `spec` exists.
///
/// Asks the connection's metadata for an exact name match first, then
/// retries with the upper-cased name since some engines fold unquoted
/// identifiers. When the driver cannot list tables at all, falls back to
/// running the existence probe query.
pub async fn table_exists(
    conn: &mut dyn DbConnection,
    spec: &TableSpec,
) -> Result<bool, ConnectorError> {
    debug!("testing if table exists: {}", spec.name);
    match conn.table_names(&spec.name).await {
        Ok(names) => {
            if names.iter().any(|n| n == &spec.name) {
                return Ok(true);
            }
            let upper = spec.name.to_uppercase();
            let names = conn
                .table_names(&upper)
                .await
                .map_err(|source| ConnectorError::Schema {
                    table: spec.name.clone(),
                    source,
                })?;
            Ok(names.iter().any(|n| n == &upper))
        }
        Err(DbError::Unsupported(_)) => probe_existence(conn, spec).await,
        Err(source) => Err(ConnectorError::Schema {
            table: spec.name.clone(),
            source,
        }),
    }
}

/// Existence fallback for drivers without table metadata. A spec whose
/// exists query is the unsupported sentinel is assumed to exist rather
/// than risking a destructive create.
async fn probe_existence(
    conn: &mut dyn DbConnection,
    spec: &TableSpec,
) -> Result<bool, ConnectorError> {
    let Some(sql) = spec.exists_statement() else {
        return Ok(true);
    };
    info!("testing if table exists with query: {}", sql);
    Ok(conn.query(&sql).await.is_ok())
}

/// Renders and executes the CREATE TABLE statement, then reports whether
/// the table is present afterwards.
pub async fn create_table(
    conn: &mut dyn DbConnection,
    spec: &TableSpec,
    dialect: Dialect,
) -> Result<bool, ConnectorError> {
    let sql = spec.create_statement(dialect);
    info!("creating table: {}", sql);
    conn.execute(&sql)
        .await
        .map_err(|source| ConnectorError::Schema {
            table: spec.name.clone(),
            source,
        })?;
    conn.commit().await.map_err(|source| ConnectorError::Schema {
        table: spec.name.clone(),
        source,
    })?;
    table_exists(conn, spec).await
}

/// Like [`create_table`], but a table still absent after the CREATE is
/// an error rather than a `false` return.
pub async fn create_table_checked(
    conn: &mut dyn DbConnection,
    spec: &TableSpec,
    dialect: Dialect,
) -> Result<(), ConnectorError> {
    if !create_table(conn, spec, dialect).await? {
        return Err(ConnectorError::Schema {
            table: spec.name.clone(),
            source: DbError::Other("table missing after create".to_string()),
        });
    }
    Ok(())
}

/// Executes DROP TABLE, tolerating failures: some engines mis-report
/// existence and then reject the drop, so errors downgrade to a warning
/// and a `false` return. Reports whether the table is absent afterwards.
pub async fn drop_table(
    conn: &mut dyn DbConnection,
    spec: &TableSpec,
) -> Result<bool, ConnectorError> {
    let sql = spec.drop_statement();
    info!("dropping table: {}", spec.name);
    let dropped = match conn.execute(&sql).await {
        Ok(_) => conn.commit().await.is_ok(),
        Err(_) => false,
    };
    if !dropped {
        warn!("unable to drop table: {}", spec.name);
        return Ok(false);
    }
    Ok(!table_exists(conn, spec).await?)
}

/// Creates the table when absent, deriving missing column data from the
/// given fields first.
pub async fn ensure_table(
    conn: &mut dyn DbConnection,
    spec: &mut TableSpec,
    fields: &[Field],
    mapper: &TypeMapper,
    dialect: Dialect,
) -> Result<(), ConnectorError> {
    if !spec.has_required_info() {
        spec.complete_from_fields(fields, mapper, dialect)?;
    }
    if table_exists(conn, spec).await? {
        return Ok(());
    }
    create_table_checked(conn, spec, dialect).await
}

/// Runs a single update statement and commits, returning the affected-row
/// count.
pub async fn execute_update(
    conn: &mut dyn DbConnection,
    sql: &str,
) -> Result<u64, ConnectorError> {
    info!("executing update: {}", sql);
    let count = conn.execute(sql).await?;
    conn.commit().await?;
    Ok(count)
}

/// Runs a query and commits. `max_rows` of -1 returns every row, 0
/// executes the statement but discards the results, any other value caps
/// the returned rows.
pub async fn execute_query(
    conn: &mut dyn DbConnection,
    sql: &str,
    max_rows: i64,
) -> Result<RowSet, ConnectorError> {
    info!("executing query: {}", sql);
    let mut result = conn.query(sql).await?;
    if max_rows >= 0 {
        result.rows.truncate(max_rows as usize);
    }
    conn.commit().await?;
    Ok(result)
}
