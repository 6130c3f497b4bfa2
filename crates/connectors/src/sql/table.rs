use crate::error::ConnectorError;
use crate::sql::dialect::Dialect;
use crate::sql::types::TypeMapper;
use model::core::field::Field;

/// Sentinel for engines whose existence cannot be probed with a query at
/// all. A spec carrying this template answers `can_query_existence` with
/// false instead of producing SQL.
pub const EXISTS_QUERY_UNSUPPORTED: &str = "__TABLE_EXISTS_QUERY_UNSUPPORTED__";

const DEFAULT_EXISTS_QUERY: &str = "select 1 from %s where 1 = 0";

/// Immutable description of a target table. `column_names` and
/// `column_defs` align by index; `distribution_key`/`sort_keys` only mean
/// something to Redshift.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSpec {
    pub name: String,
    pub column_names: Vec<String>,
    pub column_defs: Vec<String>,
    pub primary_keys: Vec<String>,
    /// Optional existence-check template with one `%s` slot for the table
    /// name. `None` falls back to the default probe.
    pub exists_query: Option<String>,
    pub distribution_key: Option<String>,
    pub sort_keys: Vec<String>,
}

impl TableSpec {
    pub fn new(
        name: &str,
        column_names: Vec<String>,
        column_defs: Vec<String>,
        primary_keys: Vec<String>,
    ) -> Self {
        TableSpec {
            name: name.to_string(),
            column_names,
            column_defs,
            primary_keys,
            ..Default::default()
        }
    }

    pub fn named(name: &str) -> Self {
        TableSpec {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn has_required_info(&self) -> bool {
        !self.name.is_empty()
            && !self.column_names.is_empty()
            && !self.column_defs.is_empty()
            && self.column_names.len() == self.column_defs.len()
    }

    /// Fills missing column names and defs from the inferred field list,
    /// leaving anything already present untouched. Calling it on a complete
    /// spec changes nothing.
    pub fn complete_from_fields(
        &mut self,
        fields: &[Field],
        mapper: &TypeMapper,
        dialect: Dialect,
    ) -> Result<(), ConnectorError> {
        if self.column_names.is_empty() {
            self.column_names = fields.iter().map(|f| f.name.clone()).collect();
        }
        if self.column_defs.is_empty() {
            let mut defs = Vec::with_capacity(fields.len());
            for field in fields {
                defs.push(mapper.sql_type_for(&field.field_type)?.to_string());
            }
            self.column_defs = defs;
        }
        dialect.post_complete(self);
        if !self.has_required_info() {
            return Err(ConnectorError::Config(
                "could not derive a table spec from the given fields".to_string(),
            ));
        }
        Ok(())
    }

    pub fn create_statement(&self, dialect: Dialect) -> String {
        let mut parts: Vec<String> = self
            .column_names
            .iter()
            .zip(self.column_defs.iter())
            .map(|(name, def)| format!("{name} {def}"))
            .collect();
        if dialect.uses_primary_keys() && !self.primary_keys.is_empty() {
            parts.push(format!("PRIMARY KEY( {} )", self.primary_keys.join(", ")));
        }
        let body = parts.join(", ");
        match dialect.storage_decoration(self) {
            Some(decoration) => format!("CREATE TABLE {} ( {} ) {}", self.name, body, decoration),
            None => format!("CREATE TABLE {} ( {} )", self.name, body),
        }
    }

    pub fn drop_statement(&self) -> String {
        format!("DROP TABLE {}", self.name)
    }

    pub fn can_query_existence(&self) -> bool {
        self.exists_query.as_deref() != Some(EXISTS_QUERY_UNSUPPORTED)
    }

    /// Existence probe with the table name substituted in, or `None` when
    /// probing is marked unsupported.
    pub fn exists_statement(&self) -> Option<String> {
        if !self.can_query_existence() {
            return None;
        }
        let template = self.exists_query.as_deref().unwrap_or(DEFAULT_EXISTS_QUERY);
        Some(template.replacen("%s", &self.name, 1))
    }
}
