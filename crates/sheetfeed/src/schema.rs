//! Concrete table schema, row and query types implementing the model
//! contracts. Used by the command-line host and the test suites.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::{SheetError, SheetResult};
use crate::model::{Model, Property, Query, Record, Resource, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Serial,
    Integer,
    Float,
    Boolean,
    Text,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ColumnType,
    #[serde(default)]
    pub key: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind,
            key: false,
        }
    }

    pub fn serial(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Serial)
    }

    pub fn keyed(mut self) -> Self {
        self.key = true;
        self
    }

    /// Brings an arbitrary value into this column's type.
    pub fn coerce(&self, value: Value) -> Value {
        match (&self.kind, &value) {
            (_, Value::Null) => Value::Null,
            (ColumnType::Text, Value::Text(_)) => value,
            _ => self.typecast(&value.to_wire_string()),
        }
    }
}

impl Property for Column {
    fn name(&self) -> &str {
        &self.name
    }

    fn typecast(&self, raw: &str) -> Value {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        match self.kind {
            ColumnType::Serial | ColumnType::Integer => trimmed
                .parse::<i64>()
                .map(Value::Integer)
                .unwrap_or_else(|_| Value::Text(raw.to_string())),
            ColumnType::Float => trimmed
                .parse::<f64>()
                .map(Value::Float)
                .unwrap_or_else(|_| Value::Text(raw.to_string())),
            ColumnType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "yes" => Value::Bool(true),
                "false" | "f" | "0" | "no" => Value::Bool(false),
                _ => Value::Text(raw.to_string()),
            },
            ColumnType::Text => Value::Text(raw.to_string()),
        }
    }

    fn is_key(&self) -> bool {
        self.key || self.kind == ColumnType::Serial
    }

    fn is_serial(&self) -> bool {
        self.kind == ColumnType::Serial
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    #[serde(rename = "name")]
    pub storage_name: String,
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn new(storage_name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            storage_name: storage_name.into(),
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Rejects schemas that cannot be stored: no name, no columns, or
    /// columns whose field names are unusable or collide.
    pub fn validate(&self) -> SheetResult<()> {
        if self.storage_name.trim().is_empty() {
            return Err(SheetError::Configuration("table name is empty".to_string()));
        }
        if self.columns.is_empty() {
            return Err(SheetError::Configuration(format!(
                "table '{}' declares no columns",
                self.storage_name
            )));
        }
        self.checked_column_names().map(|_| ())
    }

    fn require_column(&self, name: &str) -> SheetResult<&Column> {
        self.column(name).ok_or_else(|| {
            SheetError::Configuration(format!(
                "table '{}' has no column '{name}'",
                self.storage_name
            ))
        })
    }
}

impl Model for TableSchema {
    fn storage_name(&self) -> &str {
        &self.storage_name
    }

    fn properties(&self) -> Vec<&dyn Property> {
        self.columns
            .iter()
            .map(|column| column as &dyn Property)
            .collect()
    }
}

/// One resource of a [`TableSchema`], keyed by column name.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    schema: Arc<TableSchema>,
    values: BTreeMap<String, Value>,
}

impl Row {
    pub fn new(schema: Arc<TableSchema>) -> Self {
        Self {
            schema,
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    /// Sets a column after coercing the value to the column type.
    pub fn set(&mut self, name: &str, value: Value) -> SheetResult<()> {
        let coerced = self.schema.require_column(name)?.coerce(value);
        self.values.insert(name.to_string(), coerced);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    /// Rebuilds a row from a field-keyed record returned by a read.
    pub fn from_record(schema: Arc<TableSchema>, record: &Record) -> Self {
        let mut row = Self::new(schema.clone());
        for column in &schema.columns {
            if let Some(value) = record.get(&schema.field(column)) {
                row.values.insert(column.name.clone(), value.clone());
            }
        }
        row
    }
}

impl Resource for Row {
    fn model(&self) -> &dyn Model {
        self.schema.as_ref()
    }

    fn attribute_get(&self, name: &str) -> Value {
        self.values.get(name).cloned().unwrap_or(Value::Null)
    }

    fn set_serial(&mut self, serial: i64) {
        let serial_columns: Vec<String> = self
            .schema
            .columns
            .iter()
            .filter(|column| column.is_serial())
            .map(|column| column.name.clone())
            .collect();
        for name in serial_columns {
            self.values.insert(name, Value::Integer(serial));
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn holds(self, left: &Value, right: &Value) -> bool {
        match self {
            Self::Eq => left == right,
            Self::Ne => left != right,
            Self::Lt => left.partial_cmp(right) == Some(Ordering::Less),
            Self::Le => matches!(
                left.partial_cmp(right),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::Gt => left.partial_cmp(right) == Some(Ordering::Greater),
            Self::Ge => matches!(
                left.partial_cmp(right),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

/// Predicate on one column, e.g. `times_a_lady < 10`.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub column: String,
    pub op: Comparison,
    pub value: Value,
}

impl Condition {
    pub fn new(column: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }
}

impl FromStr for Condition {
    type Err = SheetError;

    /// Parses `column<op>value` with ops `<=`, `>=`, `!=`, `=`, `<`, `>`.
    /// The value stays text until [`SelectQuery::with_condition`] types it.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        const OPS: [(&str, Comparison); 6] = [
            ("<=", Comparison::Le),
            (">=", Comparison::Ge),
            ("!=", Comparison::Ne),
            ("=", Comparison::Eq),
            ("<", Comparison::Lt),
            (">", Comparison::Gt),
        ];
        let (index, token, op) = OPS
            .iter()
            .filter_map(|(token, op)| input.find(token).map(|index| (index, *token, *op)))
            .min_by_key(|(index, token, _)| (*index, std::cmp::Reverse(token.len())))
            .ok_or_else(|| {
                SheetError::Configuration(format!("condition has no operator: {input}"))
            })?;

        let column = input[..index].trim();
        if column.is_empty() {
            return Err(SheetError::Configuration(format!(
                "condition has no column: {input}"
            )));
        }
        let value = input[index + token.len()..].trim();
        Ok(Self::new(column, op, Value::Text(value.to_string())))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Query over one table: optional projection, conjunctive conditions,
/// ordering and paging.
#[derive(Clone, Debug)]
pub struct SelectQuery {
    schema: Arc<TableSchema>,
    fields: Option<Vec<String>>,
    conditions: Vec<Condition>,
    order: Vec<(String, Direction)>,
    offset: usize,
    limit: Option<usize>,
}

impl SelectQuery {
    pub fn all(schema: Arc<TableSchema>) -> Self {
        Self {
            schema,
            fields: None,
            conditions: Vec::new(),
            order: Vec::new(),
            offset: 0,
            limit: None,
        }
    }

    pub fn select(mut self, columns: &[&str]) -> SheetResult<Self> {
        for column in columns {
            self.schema.require_column(column)?;
        }
        self.fields = Some(columns.iter().map(|c| c.to_string()).collect());
        Ok(self)
    }

    /// Adds a condition; its value is coerced to the column type.
    pub fn with_condition(mut self, mut condition: Condition) -> SheetResult<Self> {
        let column = self.schema.require_column(&condition.column)?;
        condition.value = column.coerce(condition.value);
        self.conditions.push(condition);
        Ok(self)
    }

    pub fn order_by(mut self, column: &str, direction: Direction) -> SheetResult<Self> {
        self.schema.require_column(column)?;
        self.order.push((column.to_string(), direction));
        Ok(self)
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    fn field_for(&self, column: &str) -> String {
        self.schema
            .column(column)
            .map(|column| self.schema.field(column))
            .unwrap_or_else(|| column.to_string())
    }

    fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|condition| {
            let value = record
                .get(&self.field_for(&condition.column))
                .unwrap_or(&Value::Null);
            condition.op.holds(value, &condition.value)
        })
    }

    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for (column, direction) in &self.order {
            let field = self.field_for(column);
            let left = a.get(&field).unwrap_or(&Value::Null);
            let right = b.get(&field).unwrap_or(&Value::Null);
            let ordering = left.partial_cmp(right).unwrap_or(Ordering::Equal);
            let ordering = match direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

impl Query for SelectQuery {
    fn model(&self) -> &dyn Model {
        self.schema.as_ref()
    }

    fn fields(&self) -> Vec<&dyn Property> {
        match &self.fields {
            Some(names) => names
                .iter()
                .filter_map(|name| self.schema.column(name))
                .map(|column| column as &dyn Property)
                .collect(),
            None => self.schema.properties(),
        }
    }

    fn filter_records(&self, records: Vec<Record>) -> Vec<Record> {
        let mut matched: Vec<Record> = records
            .into_iter()
            .filter(|record| self.matches(record))
            .collect();
        if !self.order.is_empty() {
            matched.sort_by(|a, b| self.compare(a, b));
        }
        matched
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}
