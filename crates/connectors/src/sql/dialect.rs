use crate::error::ConnectorError;
use crate::sql::table::TableSpec;
use crate::sql::types::TypeMapper;
use std::fmt;
use std::str::FromStr;

/// Vendor dialect, fixed at construction time. Every vendor difference the
/// layer knows about hangs off this value: SQL text shapes, pagination,
/// autocommit policy for reads, type-mapping overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Generic,
    MySql,
    Redshift,
    Teradata,
    Oracle,
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Generic => "generic",
            Dialect::MySql => "mysql",
            Dialect::Redshift => "redshift",
            Dialect::Teradata => "teradata",
            Dialect::Oracle => "oracle",
        }
    }

    /// Driver this dialect normally runs on. `None` leaves resolution to
    /// the registry's URL matching.
    pub fn default_driver(&self) -> Option<&'static str> {
        match self {
            Dialect::MySql => Some("mysql"),
            Dialect::Redshift => Some("postgres"),
            _ => None,
        }
    }

    pub fn type_mapper(&self) -> TypeMapper {
        match self {
            Dialect::Teradata => TypeMapper::teradata(),
            _ => TypeMapper::generic(),
        }
    }

    /// Teradata export sessions must run with autocommit on; everything
    /// else reads inside a transaction like it writes.
    pub fn read_autocommit(&self) -> bool {
        matches!(self, Dialect::Teradata)
    }

    /// Redshift tables carry no primary-key clause; distribution and sort
    /// keys replace it.
    pub fn uses_primary_keys(&self) -> bool {
        !matches!(self, Dialect::Redshift)
    }

    pub fn supports_pagination(&self) -> bool {
        !matches!(self, Dialect::Teradata)
    }

    /// Trailing storage clause on CREATE TABLE, outside the column list.
    pub fn storage_decoration(&self, spec: &TableSpec) -> Option<String> {
        if !matches!(self, Dialect::Redshift) {
            return None;
        }
        let distribution = spec
            .distribution_key
            .as_ref()
            .map(|key| format!(" DISTKEY ({key}) "))
            .unwrap_or_default();
        let sort = if spec.sort_keys.is_empty() {
            String::new()
        } else {
            format!(" SORTKEY ({}) ", spec.sort_keys.join(","))
        };
        if distribution.is_empty() && sort.is_empty() {
            None
        } else {
            Some(format!("{distribution}{sort}"))
        }
    }

    /// Dialect fixups after descriptor completion. Teradata rejects
    /// nullable text primary keys, so their defs gain `not null`.
    pub fn post_complete(&self, spec: &mut TableSpec) {
        if !matches!(self, Dialect::Teradata) {
            return;
        }
        for key in spec.primary_keys.clone() {
            if let Some(idx) = spec.column_names.iter().position(|c| c == &key) {
                if spec.column_defs[idx].eq_ignore_ascii_case("varchar(256)") {
                    spec.column_defs[idx] = "varchar(256) not null".to_string();
                }
            }
        }
    }

    pub fn insert_sql(&self, table: &str, columns: &[String], replace_on_insert: bool) -> String {
        let mut sql = String::from("INSERT INTO ");
        sql.push_str(table);
        sql.push_str(" (");
        sql.push_str(&columns.join(","));
        sql.push_str(") VALUES (");
        sql.push_str(&vec!["?"; columns.len()].join(","));
        sql.push(')');
        if replace_on_insert && matches!(self, Dialect::MySql) {
            sql.push_str(" ON DUPLICATE KEY UPDATE ");
            let assignments: Vec<String> = columns
                .iter()
                .map(|c| format!("{c}=VALUES({c})"))
                .collect();
            sql.push_str(&assignments.join(","));
        }
        sql
    }

    /// SET covers every column not used as an update key; keys close the
    /// statement as the WHERE clause, in update-by order. Key matching is
    /// case-insensitive, like row-field lookup, so the placeholder count
    /// always agrees with the parameters the sink binds.
    pub fn update_sql(&self, table: &str, columns: &[String], update_by: &[String]) -> String {
        let mut sql = String::from("UPDATE ");
        sql.push_str(table);
        sql.push_str(" SET ");
        let assignments: Vec<String> = columns
            .iter()
            .filter(|c| !update_by.iter().any(|k| k.eq_ignore_ascii_case(c)))
            .map(|c| format!("{c} = ?"))
            .collect();
        sql.push_str(&assignments.join(","));
        sql.push_str(" WHERE ");
        let conditions: Vec<String> = update_by.iter().map(|k| format!("{k} = ?")).collect();
        sql.push_str(&conditions.join(" and "));
        sql
    }

    pub fn select_sql(
        &self,
        table: &str,
        columns: &[String],
        conditions: Option<&str>,
        order_by: Option<&str>,
    ) -> String {
        let mut sql = String::from("SELECT ");
        sql.push_str(&columns.join(", "));
        sql.push_str(" FROM ");
        sql.push_str(table);
        if let Some(conditions) = conditions {
            if !conditions.is_empty() {
                sql.push_str(" WHERE (");
                sql.push_str(conditions);
                sql.push(')');
            }
        }
        if let Some(order_by) = order_by {
            if !order_by.is_empty() {
                sql.push_str(" ORDER BY ");
                sql.push_str(order_by);
            }
        }
        sql
    }

    pub fn count_sql(&self, table: &str, conditions: Option<&str>) -> String {
        let mut sql = format!("SELECT COUNT(*) FROM {table}");
        if let Some(conditions) = conditions {
            if !conditions.is_empty() {
                sql.push_str(" WHERE (");
                sql.push_str(conditions);
                sql.push(')');
            }
        }
        sql
    }

    /// Window a base query for one read chunk. Teradata has no LIMIT or
    /// OFFSET, so the base query comes back untouched and the caller reads
    /// everything in one chunk.
    pub fn paginate(&self, base: &str, offset: u64, len: u64) -> String {
        match self {
            Dialect::Teradata => base.to_string(),
            Dialect::Oracle => format!(
                "SELECT * FROM (SELECT a.*,ROWNUM dbif_rno FROM ( {base} ) a WHERE rownum <= {} ) WHERE dbif_rno >= {}",
                offset + len,
                offset + 1
            ),
            _ => format!("{base} LIMIT {len} OFFSET {offset}"),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Dialect {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "generic" => Ok(Dialect::Generic),
            "mysql" => Ok(Dialect::MySql),
            "redshift" => Ok(Dialect::Redshift),
            "teradata" => Ok(Dialect::Teradata),
            "oracle" => Ok(Dialect::Oracle),
            other => Err(ConnectorError::Config(format!(
                "unknown dialect: {other}"
            ))),
        }
    }
}
