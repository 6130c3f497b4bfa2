use crate::core::value::{FieldValue, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowData {
    pub entity: String,
    pub field_values: Vec<FieldValue>,
}

impl RowData {
    pub fn new(entity: &str, field_values: Vec<FieldValue>) -> Self {
        RowData {
            entity: entity.to_string(),
            field_values,
        }
    }

    pub fn from_pairs(entity: &str, pairs: Vec<(&str, Value)>) -> Self {
        RowData {
            entity: entity.to_string(),
            field_values: pairs
                .into_iter()
                .map(|(name, value)| FieldValue::new(name, value))
                .collect(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.field_values
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(field))
    }

    /// Missing fields and explicit nulls both come back as `Value::Null`;
    /// statement binding does not distinguish the two.
    pub fn get_value(&self, field: &str) -> Value {
        self.get(field)
            .and_then(|f| f.value.clone())
            .unwrap_or(Value::Null)
    }

    pub fn has_value(&self, field: &str) -> bool {
        !self.get_value(field).is_null()
    }
}
