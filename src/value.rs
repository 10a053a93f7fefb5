//! Dynamic cell values and their conversion into static Rust types.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Format used when a timestamp is rendered as text.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

const DATE_FORMAT: &str = "%Y-%m-%d";

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Core value type exchanged with the database
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, used in conversion errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Boolean(_) => "boolean",
            Value::Timestamp(_) => "timestamp",
        }
    }

    /// Convert into `T`, see [`FromValue`].
    pub fn convert<T: FromValue>(self) -> Result<T, ConversionError> {
        T::from_value(self)
    }

    fn incompatible(&self, expected: &'static str) -> ConversionError {
        match self {
            Value::Null => ConversionError::UnexpectedNull { expected },
            other => ConversionError::Incompatible {
                found: other.kind(),
                expected,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
            Value::Blob(bytes) => {
                f.write_str("x'")?;
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                f.write_str("'")
            }
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Timestamp(v) => write!(f, "{}", v.format(TIMESTAMP_FORMAT)),
        }
    }
}

/// Why a [`Value`] could not become the requested type
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    #[error("cannot convert null to {expected}")]
    UnexpectedNull { expected: &'static str },

    #[error("cannot convert {found} to {expected}")]
    Incompatible {
        found: &'static str,
        expected: &'static str,
    },

    #[error("value {value} is out of range for {expected}")]
    OutOfRange {
        value: String,
        expected: &'static str,
    },

    #[error("cannot parse {value:?} as {expected}")]
    Parse {
        value: String,
        expected: &'static str,
    },
}

/// Checked conversion from a dynamic [`Value`].
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, ConversionError>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        Ok(value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Boolean(v) => Ok(v),
            Value::Integer(v) => Ok(v != 0),
            Value::Real(v) => Ok(v != 0.0),
            Value::Text(ref text) => {
                let trimmed = text.trim();
                if trimmed.eq_ignore_ascii_case("true") || trimmed == "1" {
                    Ok(true)
                } else if trimmed.eq_ignore_ascii_case("false") || trimmed == "0" {
                    Ok(false)
                } else {
                    Err(ConversionError::Parse {
                        value: text.clone(),
                        expected: "bool",
                    })
                }
            }
            other => Err(other.incompatible("bool")),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Integer(v) => Ok(v),
            Value::Boolean(v) => Ok(i64::from(v)),
            Value::Real(v) => {
                if v.is_finite() && v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64
                {
                    Ok(v as i64)
                } else {
                    Err(ConversionError::OutOfRange {
                        value: v.to_string(),
                        expected: "i64",
                    })
                }
            }
            Value::Text(text) => text.trim().parse().map_err(|_| ConversionError::Parse {
                value: text,
                expected: "i64",
            }),
            other => Err(other.incompatible("i64")),
        }
    }
}

macro_rules! integer_from_value {
    ($($t:ty),* $(,)?) => {
        $(
            impl FromValue for $t {
                fn from_value(value: Value) -> Result<Self, ConversionError> {
                    let wide = i64::from_value(value).map_err(|e| match e {
                        ConversionError::UnexpectedNull { .. } => ConversionError::UnexpectedNull {
                            expected: stringify!($t),
                        },
                        ConversionError::Incompatible { found, .. } => ConversionError::Incompatible {
                            found,
                            expected: stringify!($t),
                        },
                        ConversionError::OutOfRange { value, .. } => ConversionError::OutOfRange {
                            value,
                            expected: stringify!($t),
                        },
                        ConversionError::Parse { value, .. } => ConversionError::Parse {
                            value,
                            expected: stringify!($t),
                        },
                    })?;
                    <$t>::try_from(wide).map_err(|_| ConversionError::OutOfRange {
                        value: wide.to_string(),
                        expected: stringify!($t),
                    })
                }
            }
        )*
    };
}

integer_from_value!(i8, i16, i32, isize, u8, u16, u32, u64, usize);

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Real(v) => Ok(v),
            Value::Integer(v) => Ok(v as f64),
            Value::Boolean(v) => Ok(if v { 1.0 } else { 0.0 }),
            Value::Text(text) => text.trim().parse().map_err(|_| ConversionError::Parse {
                value: text,
                expected: "f64",
            }),
            other => Err(other.incompatible("f64")),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Null => Err(ConversionError::UnexpectedNull { expected: "f32" }),
            other => f64::from_value(other).map(|v| v as f32),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Text(v) => Ok(v),
            Value::Blob(bytes) => String::from_utf8(bytes).map_err(|_| ConversionError::Incompatible {
                found: "blob",
                expected: "String",
            }),
            Value::Null => Err(ConversionError::UnexpectedNull { expected: "String" }),
            other => Ok(other.to_string()),
        }
    }
}

impl FromValue for char {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Text(text) => {
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(c),
                    _ => Err(ConversionError::Parse {
                        value: text,
                        expected: "char",
                    }),
                }
            }
            other => Err(other.incompatible("char")),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Blob(bytes) => Ok(bytes),
            Value::Text(text) => Ok(text.into_bytes()),
            other => Err(other.incompatible("Vec<u8>")),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Timestamp(v) => Ok(v),
            Value::Integer(secs) => chrono::DateTime::from_timestamp(secs, 0)
                .map(|dt| dt.naive_utc())
                .ok_or_else(|| ConversionError::OutOfRange {
                    value: secs.to_string(),
                    expected: "NaiveDateTime",
                }),
            Value::Text(text) => parse_datetime(&text).ok_or(ConversionError::Parse {
                value: text,
                expected: "NaiveDateTime",
            }),
            other => Err(other.incompatible("NaiveDateTime")),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        match value {
            Value::Timestamp(v) => Ok(v.date()),
            Value::Text(text) => parse_datetime(&text)
                .map(|dt| dt.date())
                .ok_or(ConversionError::Parse {
                    value: text,
                    expected: "NaiveDate",
                }),
            other => Err(other.incompatible("NaiveDate")),
        }
    }
}

/// Parse the textual date-time shapes SQLite and most clients produce.
pub(crate) fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, DATE_FORMAT)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

macro_rules! value_from_integer {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Integer(i64::from(v))
                }
            }
        )*
    };
}

value_from_integer!(i8, i16, i32, i64, u8, u16, u32);

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Real(f64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<char> for Value {
    fn from(v: char) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Blob(v.to_vec())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Text(v.format(DATE_FORMAT).to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
