//! Shared domain types
//!
//! Provider payloads are loosely typed JSON while the store holds strongly typed
//! columns. Every column carries a [`FieldType`] tag and every value read from
//! either side is normalised into a [`Value`].

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::SchemaError;

/// Date format used for date-only text
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Date-time format used by the provider for timestamps
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Declared type of a persisted column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Integer,
    BigInteger,
    SmallInteger,
    Real,
    Text,
    Boolean,
    Date,
    Timestamp,
}

impl FieldType {
    /// Integer and floating point columns
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            FieldType::Integer | FieldType::BigInteger | FieldType::SmallInteger | FieldType::Real
        )
    }

    /// Date and timestamp columns
    pub fn is_temporal(self) -> bool {
        matches!(self, FieldType::Date | FieldType::Timestamp)
    }

    /// Inclusive range accepted by integer columns
    pub fn integer_range(self) -> Option<(i64, i64)> {
        match self {
            FieldType::SmallInteger => Some((i16::MIN as i64, i16::MAX as i64)),
            FieldType::Integer => Some((i32::MIN as i64, i32::MAX as i64)),
            FieldType::BigInteger => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    /// SQL type name as used in the store
    pub fn sql_name(self) -> &'static str {
        match self {
            FieldType::Integer => "int",
            FieldType::BigInteger => "bigint",
            FieldType::SmallInteger => "smallint",
            FieldType::Real => "real",
            FieldType::Text => "text",
            FieldType::Boolean => "bool",
            FieldType::Date => "date",
            FieldType::Timestamp => "timestamp",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

impl FromStr for FieldType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "int" | "integer" | "int4" | "serial" => Ok(FieldType::Integer),
            "bigint" | "int8" | "bigserial" => Ok(FieldType::BigInteger),
            "smallint" | "int2" => Ok(FieldType::SmallInteger),
            "real" | "float4" | "float" | "double precision" | "float8" => Ok(FieldType::Real),
            "text" | "varchar" => Ok(FieldType::Text),
            "bool" | "boolean" => Ok(FieldType::Boolean),
            "date" => Ok(FieldType::Date),
            "timestamp" => Ok(FieldType::Timestamp),
            other => Err(SchemaError::UnknownType(other.to_string())),
        }
    }
}

/// One column of a dataset schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    source_name: String,
    column: String,
    ty: FieldType,
}

impl FieldDef {
    pub fn new(source_name: impl Into<String>, ty: FieldType) -> Self {
        let source_name = source_name.into();
        let column = source_name.to_lowercase();
        Self {
            source_name,
            column,
            ty,
        }
    }

    /// Name used by the provider payload (e.g. `calendarYear`)
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Name of the persisted column (e.g. `calendaryear`)
    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn ty(&self) -> FieldType {
        self.ty
    }
}

/// Ordered column list of one dataset kind
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldSchema {
    fields: Vec<FieldDef>,
}

impl FieldSchema {
    /// Build a schema, rejecting duplicate column names
    pub fn new(fields: Vec<FieldDef>) -> Result<Self, SchemaError> {
        let mut seen = std::collections::HashSet::new();
        for field in &fields {
            if !seen.insert(field.column()) {
                return Err(SchemaError::DuplicateColumn(field.column().to_string()));
            }
        }
        Ok(Self { fields })
    }

    pub fn from_pairs(pairs: &[(&str, FieldType)]) -> Result<Self, SchemaError> {
        Self::new(pairs.iter().map(|(name, ty)| FieldDef::new(*name, *ty)).collect())
    }

    /// Parse `(provider name, sql type)` pairs, as the column tables are written
    pub fn from_sql_pairs(pairs: &[(&str, &str)]) -> Result<Self, SchemaError> {
        let fields = pairs
            .iter()
            .map(|(name, sql)| sql.parse::<FieldType>().map(|ty| FieldDef::new(*name, ty)))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(fields)
    }

    /// Look up a column by its persisted name
    pub fn get(&self, column: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.column() == column)
    }

    pub fn type_of(&self, column: &str) -> Option<FieldType> {
        self.get(column).map(FieldDef::ty)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(FieldDef::column)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A typed column value
///
/// `Absent` marks a null or missing value and is distinct from zero and from
/// the empty string.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Absent,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

static ABSENT: Value = Value::Absent;

impl Value {
    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    pub fn is_present(&self) -> bool {
        !self.is_absent()
    }

    /// Numeric view of the value, if it is a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Stable textual form used to build merge-key identities
    ///
    /// Integers and whole reals render identically so that a `smallint` year
    /// read back from the store matches the year the provider sent as text.
    pub fn canonical(&self) -> String {
        match self {
            Value::Absent => String::new(),
            Value::Integer(i) => i.to_string(),
            Value::Real(r) if r.fract() == 0.0 && r.abs() < 9.0e15 => (*r as i64).to_string(),
            Value::Real(r) => r.to_string(),
            Value::Text(s) => s.clone(),
            Value::Boolean(b) => b.to_string(),
            Value::Date(d) => d.format(DATE_FORMAT).to_string(),
            Value::Timestamp(ts) => ts.format(DATE_TIME_FORMAT).to_string(),
        }
    }

    /// Short name of the variant, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Absent => "absent",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Boolean(_) => "boolean",
            Value::Date(_) => "date",
            Value::Timestamp(_) => "timestamp",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Absent => f.write_str("null"),
            other => f.write_str(&other.canonical()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Absent)
    }
}

/// One record of one dataset, keyed by column name
///
/// Missing columns read as [`Value::Absent`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityRecord {
    fields: BTreeMap<String, Value>,
}

impl EntityRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a column, `Absent` when the column is missing
    pub fn get(&self, column: &str) -> &Value {
        self.fields.get(column).unwrap_or(&ABSENT)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.fields.contains_key(column)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(column.into(), value.into());
    }

    /// Builder-style insert, mostly useful in tests and fixtures
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for EntityRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
