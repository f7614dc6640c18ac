//! Scalar values, field types and identifiers

use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::error::{Error, ValidationError};

/// Semantic type of a scalar column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Bool,
    Int,
    Float,
    String,
    Time,
}

impl FieldType {
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Bool => "bool",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::String => "string",
            FieldType::Time => "time",
        }
    }

    /// Whether `add` (increment) is meaningful for this type.
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Int | FieldType::Float)
    }
}

/// A scalar value staged on a mutation, bound to a statement, or scanned
/// from a row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Time(DateTime<Utc>),
    String(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Time(_) => "time",
            Value::String(_) => "string",
        }
    }

    /// Coerce into `ty`, widening ints to floats and truncating times to the
    /// microsecond precision they are stored with. Null passes through.
    pub fn coerce(self, ty: FieldType) -> Option<Value> {
        match (ty, self) {
            (_, Value::Null) => Some(Value::Null),
            (FieldType::Bool, v @ Value::Bool(_)) => Some(v),
            (FieldType::Int, v @ Value::Int(_)) => Some(v),
            (FieldType::Float, v @ Value::Float(_)) => Some(v),
            (FieldType::Float, Value::Int(i)) => Some(Value::Float(i as f64)),
            (FieldType::String, v @ Value::String(_)) => Some(v),
            (FieldType::Time, Value::Time(t)) => Some(Value::Time(t.trunc_subsecs(6))),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Time(t) => write!(f, "{}", t.to_rfc3339()),
            Value::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Time(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Semantic kind of an entity identifier. Storage is always an integer key;
/// `String` entities expose it as an opaque string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdKind {
    Int,
    String,
}

/// An entity identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Int(i64),
    Str(String),
}

impl Id {
    /// Zero and empty identifiers count as "no id".
    pub fn is_empty(&self) -> bool {
        match self {
            Id::Int(i) => *i == 0,
            Id::Str(s) => s.is_empty(),
        }
    }

    /// Present this id in the representation `kind` asks for.
    pub fn to_kind(&self, kind: IdKind) -> Id {
        match (kind, self) {
            (IdKind::Int, Id::Str(s)) => s.parse().map(Id::Int).unwrap_or_else(|_| self.clone()),
            (IdKind::String, Id::Int(i)) => Id::Str(i.to_string()),
            _ => self.clone(),
        }
    }

    /// The integer storage key behind this id.
    pub fn storage_key(&self, entity: &'static str) -> Result<i64, ValidationError> {
        match self {
            Id::Int(i) => Ok(*i),
            Id::Str(s) => s.parse().map_err(|_| ValidationError::InvalidId {
                entity,
                id: s.clone(),
            }),
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Int(i) => write!(f, "{i}"),
            Id::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Id {
    fn from(v: i64) -> Self {
        Id::Int(v)
    }
}

impl From<&str> for Id {
    fn from(v: &str) -> Self {
        Id::Str(v.to_string())
    }
}

impl From<String> for Id {
    fn from(v: String) -> Self {
        Id::Str(v)
    }
}

impl From<&Id> for Id {
    fn from(v: &Id) -> Self {
        v.clone()
    }
}

/// Decode a scanned [`Value`] into a Rust type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;

    /// Name used in decode error messages.
    fn expected() -> &'static str;
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    fn expected() -> &'static str {
        "bool"
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64()
    }

    fn expected() -> &'static str {
        "int"
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64().and_then(|i| i32::try_from(i).ok())
    }

    fn expected() -> &'static str {
        "int"
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }

    fn expected() -> &'static str {
        "float"
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }

    fn expected() -> &'static str {
        "string"
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Time(t) => Some(*t),
            _ => None,
        }
    }

    fn expected() -> &'static str {
        "time"
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            v => T::from_value(v).map(Some),
        }
    }

    fn expected() -> &'static str {
        T::expected()
    }
}

/// Decode an [`Id`] into the id field of a typed entity.
pub trait FromId: Sized {
    fn from_id(id: &Id) -> Result<Self, Error>;
}

impl FromId for Id {
    fn from_id(id: &Id) -> Result<Self, Error> {
        Ok(id.clone())
    }
}

impl FromId for String {
    fn from_id(id: &Id) -> Result<Self, Error> {
        Ok(id.to_string())
    }
}

impl FromId for i64 {
    fn from_id(id: &Id) -> Result<Self, Error> {
        match id {
            Id::Int(i) => Ok(*i),
            Id::Str(s) => s
                .parse()
                .map_err(|_| Error::Invariant(format!("id {s:?} is not an integer"))),
        }
    }
}
