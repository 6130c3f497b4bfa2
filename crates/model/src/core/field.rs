use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic scalar type of a pipeline field, before any SQL dialect gets
/// involved. Nullability is part of the type because it decides the column
/// def (`int` vs `int not null`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Int { nullable: bool },
    Long { nullable: bool },
    Text,
    Time,
    Date,
    Timestamp,
    Boolean,
    /// A logical SQL type backed by some other runtime representation.
    /// Carries the wrapper name as data so resolution needs no compile-time
    /// dependency on the module that defines the wrapper.
    Coercible(String),
}

impl FieldType {
    pub fn coercible(wrapper: &str) -> Self {
        FieldType::Coercible(wrapper.to_string())
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Int { nullable: true } => write!(f, "int"),
            FieldType::Int { nullable: false } => write!(f, "int not null"),
            FieldType::Long { nullable: true } => write!(f, "long"),
            FieldType::Long { nullable: false } => write!(f, "long not null"),
            FieldType::Text => write!(f, "text"),
            FieldType::Time => write!(f, "time"),
            FieldType::Date => write!(f, "date"),
            FieldType::Timestamp => write!(f, "timestamp"),
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Coercible(wrapper) => write!(f, "coercible({wrapper})"),
        }
    }
}

/// A named field in the inferred schema of a row stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
}

impl Field {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Field {
            name: name.to_string(),
            field_type,
        }
    }
}
