//! Dynamic values held in a session namespace.
//!
//! A [`Value`] is what the execution engine binds to a variable name. Most
//! variants are plain data and serialize with serde; [`Table`] is the tabular
//! variant that the columnar tier stores as Parquet. [`Opaque`] wraps live
//! in-process handles (open files, connections, closures) and can never be
//! serialized, so the cache refuses it.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A value bound in the session namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Table(Table),
    /// Live handle; must stay the last variant so encoded variant indices
    /// of the others are unaffected by the skip.
    #[serde(skip)]
    Opaque(Opaque),
}

impl Value {
    /// Short type name used in logs and reports.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Table(_) => "table",
            Value::Opaque(_) => "opaque",
        }
    }

    /// Approximate in-memory footprint in bytes.
    ///
    /// This walks the value without serializing it, so it is cheap enough to
    /// call for every namespace variable after each execution.
    pub fn estimated_size(&self) -> u64 {
        const HEADER: u64 = std::mem::size_of::<Value>() as u64;
        match self {
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) => HEADER,
            Value::Text(s) => HEADER + s.len() as u64,
            Value::Bytes(b) => HEADER + b.len() as u64,
            Value::List(items) => HEADER + items.iter().map(Value::estimated_size).sum::<u64>(),
            Value::Map(map) => {
                HEADER
                    + map
                        .iter()
                        .map(|(k, v)| k.len() as u64 + v.estimated_size())
                        .sum::<u64>()
            }
            Value::Table(table) => HEADER + table.estimated_size(),
            Value::Opaque(_) => HEADER,
        }
    }

    /// Whether the value (recursively) contains an opaque handle.
    pub fn is_serializable(&self) -> bool {
        match self {
            Value::Opaque(_) => false,
            Value::List(items) => items.iter().all(Value::is_serializable),
            Value::Map(map) => map.values().all(Value::is_serializable),
            _ => true,
        }
    }

    /// Number of elements for collection-like values.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Text(s) => Some(s.chars().count()),
            Value::Bytes(b) => Some(b.len()),
            Value::List(items) => Some(items.len()),
            Value::Map(map) => Some(map.len()),
            Value::Table(table) => Some(table.num_rows()),
            _ => None,
        }
    }

    /// Whether a collection-like value is empty. Scalars are never empty.
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Positional access into a list.
    pub fn item(&self, index: usize) -> Option<&Value> {
        match self {
            Value::List(items) => items.get(index),
            _ => None,
        }
    }

    /// Named access into a map.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(name),
            _ => None,
        }
    }

    /// Iterate the children of a list or the values of a map.
    pub fn iter(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            Value::List(items) => Box::new(items.iter()),
            Value::Map(map) => Box::new(map.values()),
            _ => Box::new(std::iter::empty()),
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(table) => Some(table),
            _ => None,
        }
    }
}

impl From<Table> for Value {
    fn from(table: Table) -> Self {
        Value::Table(table)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

/// A live in-process handle that cannot leave the process.
#[derive(Clone)]
pub struct Opaque {
    type_name: String,
    handle: Arc<dyn Any + Send + Sync>,
}

impl Opaque {
    pub fn new<T: Any + Send + Sync>(type_name: impl Into<String>, handle: T) -> Self {
        Self {
            type_name: type_name.into(),
            handle: Arc::new(handle),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.handle.downcast_ref::<T>()
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<opaque {}>", self.type_name)
    }
}

// Handles compare by identity.
impl PartialEq for Opaque {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }
}

/// Typed storage for one table column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnData {
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Utf8(Vec<String>),
    Boolean(Vec<bool>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Int64(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::Utf8(v) => v.len(),
            ColumnData::Boolean(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn estimated_size(&self) -> u64 {
        match self {
            ColumnData::Int64(v) => v.len() as u64 * 8,
            ColumnData::Float64(v) => v.len() as u64 * 8,
            ColumnData::Utf8(v) => v.iter().map(|s| s.len() as u64 + 24).sum(),
            ColumnData::Boolean(v) => v.len() as u64,
        }
    }

    fn slice(&self, start: usize, end: usize) -> ColumnData {
        match self {
            ColumnData::Int64(v) => ColumnData::Int64(v[start..end].to_vec()),
            ColumnData::Float64(v) => ColumnData::Float64(v[start..end].to_vec()),
            ColumnData::Utf8(v) => ColumnData::Utf8(v[start..end].to_vec()),
            ColumnData::Boolean(v) => ColumnData::Boolean(v[start..end].to_vec()),
        }
    }
}

/// A named column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TableError {
    #[error("Column '{name}' has {actual} rows, expected {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Duplicate column name '{0}'")]
    DuplicateColumn(String),
}

/// Column-oriented table: every column has the same number of rows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    /// Build a table, validating that column lengths agree and names are unique.
    pub fn new(columns: Vec<Column>) -> Result<Self, TableError> {
        if let Some(first) = columns.first() {
            let expected = first.data.len();
            for (i, column) in columns.iter().enumerate() {
                if column.data.len() != expected {
                    return Err(TableError::LengthMismatch {
                        name: column.name.clone(),
                        expected,
                        actual: column.data.len(),
                    });
                }
                if columns[..i].iter().any(|c| c.name == column.name) {
                    return Err(TableError::DuplicateColumn(column.name.clone()));
                }
            }
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.data.len()).unwrap_or(0)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns.iter().find(|c| c.name == name).map(|c| &c.data)
    }

    /// Rows `[offset, offset + len)`, clamped to the table.
    pub fn slice(&self, offset: usize, len: usize) -> Table {
        let rows = self.num_rows();
        let start = offset.min(rows);
        let end = offset.saturating_add(len).min(rows);
        Table {
            columns: self
                .columns
                .iter()
                .map(|c| Column::new(c.name.clone(), c.data.slice(start, end)))
                .collect(),
        }
    }

    pub fn estimated_size(&self) -> u64 {
        self.columns
            .iter()
            .map(|c| c.name.len() as u64 + c.data.estimated_size())
            .sum()
    }
}
