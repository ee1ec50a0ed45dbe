//! Contracts the translator consumes from the host data model.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{SheetError, SheetResult};
use crate::xml::is_valid_name;

/// Typed cell value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Text written into a row payload. `Null` becomes an empty cell.
    pub fn to_wire_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(value) => value.to_string(),
            Self::Integer(value) => value.to_string(),
            Self::Float(value) => value.to_string(),
            Self::Text(value) => value.clone(),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            (Self::Bool(a), Self::Bool(b)) => a.partial_cmp(b),
            (Self::Integer(a), Self::Integer(b)) => a.partial_cmp(b),
            (Self::Integer(a), Self::Float(b)) => (*a as f64).partial_cmp(b),
            (Self::Float(a), Self::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            other => f.write_str(&other.to_wire_string()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Row attribute set: wire field name to typed value.
pub type Record = BTreeMap<String, Value>;

pub type FieldNamingConvention = fn(&str) -> String;

/// Drops every non-alphanumeric character and lower-cases the rest.
pub fn normalize_field_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

pub trait Property {
    fn name(&self) -> &str;

    /// Converts raw cell text into this property's value type.
    fn typecast(&self, raw: &str) -> Value;

    fn is_key(&self) -> bool {
        false
    }

    fn is_serial(&self) -> bool {
        false
    }
}

pub trait Model {
    fn storage_name(&self) -> &str;

    /// Properties in declared order; this order fixes the header columns.
    fn properties(&self) -> Vec<&dyn Property>;

    fn field_naming_convention(&self) -> FieldNamingConvention {
        normalize_field_name
    }

    fn field(&self, property: &dyn Property) -> String {
        (self.field_naming_convention())(property.name())
    }

    fn key(&self) -> Vec<&dyn Property> {
        self.properties()
            .into_iter()
            .filter(|property| property.is_key())
            .collect()
    }

    /// Column names, rejecting fields that cannot be element names and
    /// properties that collapse onto the same field.
    fn checked_column_names(&self) -> SheetResult<Vec<String>> {
        let mut seen: Vec<(String, &str)> = Vec::new();
        for property in self.properties() {
            let field = self.field(property);
            if !is_valid_name(&field) {
                return Err(SheetError::Configuration(format!(
                    "property '{}' of '{}' maps to unusable field name '{field}'",
                    property.name(),
                    self.storage_name()
                )));
            }
            if let Some((_, other)) = seen.iter().find(|(existing, _)| *existing == field) {
                return Err(SheetError::Configuration(format!(
                    "properties '{other}' and '{}' of '{}' both map to field '{field}'",
                    property.name(),
                    self.storage_name()
                )));
            }
            seen.push((field, property.name()));
        }
        Ok(seen.into_iter().map(|(field, _)| field).collect())
    }
}

pub trait Resource {
    fn model(&self) -> &dyn Model;

    fn attribute_get(&self, name: &str) -> Value;

    /// Stores a freshly assigned serial identifier.
    fn set_serial(&mut self, serial: i64);

    /// Current attributes keyed by wire field name, in property order.
    fn field_attributes(&self) -> Vec<(String, Value)> {
        let model = self.model();
        model
            .properties()
            .into_iter()
            .map(|property| (model.field(property), self.attribute_get(property.name())))
            .collect()
    }
}

pub trait Query {
    fn model(&self) -> &dyn Model;

    fn fields(&self) -> Vec<&dyn Property>;

    /// Applies predicates, ordering and paging to the fetched records.
    fn filter_records(&self, records: Vec<Record>) -> Vec<Record>;
}
