use std::collections::HashMap;
use std::fmt;

use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Core value types for database operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
}

/// A single result or input row, keyed by column name
pub type Row = HashMap<String, Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Boolean(v) => Some(i64::from(*v)),
            Value::Text(v) => v.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Real(v) => Some(*v),
            Value::Text(v) => v.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }
}

/// Textual form of the value, as seen by validation rules.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
            Value::Blob(v) => f.write_str(&String::from_utf8_lossy(v)),
            Value::Boolean(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! impl_from_integer {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::Integer(i64::from(v))
            }
        })*
    };
}

impl_from_integer!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Real(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
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

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let out = match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(v) => ToSqlOutput::Borrowed(ValueRef::Integer(*v)),
            Value::Real(v) => ToSqlOutput::Borrowed(ValueRef::Real(*v)),
            Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
            Value::Boolean(v) => ToSqlOutput::Borrowed(ValueRef::Integer(i64::from(*v))),
        };
        Ok(out)
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(v: ValueRef<'_>) -> Self {
        match v {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::Integer(v),
            ValueRef::Real(v) => Value::Real(v),
            ValueRef::Text(v) => match std::str::from_utf8(v) {
                Ok(text) => Value::Text(text.to_string()),
                Err(_) => Value::Blob(v.to_vec()),
            },
            ValueRef::Blob(v) => Value::Blob(v.to_vec()),
        }
    }
}

#[cfg(feature = "mysql")]
impl From<&Value> for mysql::Value {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => mysql::Value::NULL,
            Value::Integer(v) => mysql::Value::Int(*v),
            Value::Real(v) => mysql::Value::Double(*v),
            Value::Text(v) => mysql::Value::Bytes(v.as_bytes().to_vec()),
            Value::Blob(v) => mysql::Value::Bytes(v.clone()),
            Value::Boolean(v) => mysql::Value::Int(i64::from(*v)),
        }
    }
}

#[cfg(feature = "mysql")]
impl From<mysql::Value> for Value {
    fn from(v: mysql::Value) -> Self {
        match v {
            mysql::Value::NULL => Value::Null,
            mysql::Value::Bytes(bytes) => match String::from_utf8(bytes) {
                Ok(text) => Value::Text(text),
                Err(err) => Value::Blob(err.into_bytes()),
            },
            mysql::Value::Int(v) => Value::Integer(v),
            mysql::Value::UInt(v) => match i64::try_from(v) {
                Ok(v) => Value::Integer(v),
                Err(_) => Value::Text(v.to_string()),
            },
            mysql::Value::Float(v) => Value::Real(f64::from(v)),
            mysql::Value::Double(v) => Value::Real(v),
            mysql::Value::Date(year, month, day, 0, 0, 0, 0) => {
                Value::Text(format!("{year:04}-{month:02}-{day:02}"))
            }
            mysql::Value::Date(year, month, day, hour, minute, second, _) => Value::Text(format!(
                "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
            )),
            mysql::Value::Time(negative, days, hours, minutes, seconds, _) => {
                let sign = if negative { "-" } else { "" };
                let hours = u32::from(hours) + days * 24;
                Value::Text(format!("{sign}{hours:02}:{minutes:02}:{seconds:02}"))
            }
        }
    }
}
