use crate::error::ConnectorError;
use lazy_static::lazy_static;
use model::core::field::FieldType;
use std::collections::HashMap;

lazy_static! {
    /// Wrapper-name table for coercible types. Resolution is by name so the
    /// mapper never needs a compile-time dependency on whatever module
    /// defines the wrapper.
    static ref NATIVE_TYPES: HashMap<&'static str, FieldType> = {
        let mut map = HashMap::new();
        map.insert("sql-date", FieldType::Date);
        map.insert("sql-datetime", FieldType::Date);
        map.insert("sql-time", FieldType::Time);
        map.insert("sql-timestamp", FieldType::Timestamp);
        map
    };
}

/// Maps semantic field types to SQL column type strings. One mapper exists
/// per dialect; construct it through [`Dialect::type_mapper`] rather than
/// sharing a global table.
///
/// [`Dialect::type_mapper`]: crate::sql::dialect::Dialect::type_mapper
#[derive(Debug, Clone)]
pub struct TypeMapper {
    entries: HashMap<FieldType, &'static str>,
}

impl TypeMapper {
    pub fn generic() -> Self {
        let mut entries = HashMap::new();
        entries.insert(FieldType::Int { nullable: true }, "int");
        entries.insert(FieldType::Int { nullable: false }, "int not null");
        entries.insert(FieldType::Long { nullable: true }, "int");
        entries.insert(FieldType::Long { nullable: false }, "int not null");
        entries.insert(FieldType::Text, "varchar(256)");
        entries.insert(FieldType::Time, "time");
        entries.insert(FieldType::Date, "date");
        entries.insert(FieldType::Timestamp, "timestamp");
        TypeMapper { entries }
    }

    /// Teradata variant: text columns are not nullable, the engine rejects
    /// them as primary keys otherwise.
    pub fn teradata() -> Self {
        let mut mapper = Self::generic();
        mapper.entries.insert(FieldType::Text, "varchar(256) not null");
        mapper
    }

    /// Strips the coercible wrapper off a field type. Unrecognized wrappers
    /// deliberately land on text, that is the documented fallback and not
    /// an error path.
    pub fn resolve_native(field_type: &FieldType) -> FieldType {
        match field_type {
            FieldType::Coercible(wrapper) => NATIVE_TYPES
                .get(wrapper.as_str())
                .cloned()
                .unwrap_or(FieldType::Text),
            other => other.clone(),
        }
    }

    pub fn sql_type_for(&self, field_type: &FieldType) -> Result<&'static str, ConnectorError> {
        if let Some(sql) = self.entries.get(field_type) {
            return Ok(sql);
        }
        let native = Self::resolve_native(field_type);
        if native != *field_type {
            if let Some(sql) = self.entries.get(&native) {
                return Ok(sql);
            }
        }
        Err(ConnectorError::UnmappableType(field_type.to_string()))
    }
}
