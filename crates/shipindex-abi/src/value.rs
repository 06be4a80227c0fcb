//! Dynamically typed values produced and consumed by the codec.
//!
//! The codec never knows a contract's types at compile time, so every decoded
//! payload is an [`AbiValue`] tree. Consumers that need JSON (storage, dedup
//! fingerprints) go through [`AbiValue::to_json`].

use indexmap::IndexMap;
use serde_json::{Map, Number, Value};
use std::fmt;

/// A decoded ABI value.
#[derive(Debug, Clone, PartialEq)]
pub enum AbiValue {
    /// Absent optional.
    Null,
    Bool(bool),
    /// Signed integers up to 64 bits (`int8`..`int64`, `varint32`).
    Int(i64),
    /// Unsigned integers up to 64 bits (`uint8`..`uint64`, `varuint32`).
    Uint(u64),
    Int128(i128),
    Uint128(u128),
    Float(f64),
    /// Strings and every type with a canonical text form
    /// (names, assets, symbols, time points, checksums, keys).
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<AbiValue>),
    /// Struct fields in declaration order, base fields first.
    Struct(IndexMap<String, AbiValue>),
    /// A tagged variant: the alternative's type name and its value.
    Variant(String, Box<AbiValue>),
}

impl AbiValue {
    /// Build a struct value from `(name, value)` pairs.
    pub fn record<K: Into<String>>(fields: impl IntoIterator<Item = (K, AbiValue)>) -> Self {
        Self::Struct(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build a variant value.
    pub fn variant(tag: impl Into<String>, value: AbiValue) -> Self {
        Self::Variant(tag.into(), Box::new(value))
    }

    /// Short description of the value's shape, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Uint(_) => "uint",
            Self::Int128(_) => "int128",
            Self::Uint128(_) => "uint128",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Array(_) => "array",
            Self::Struct(_) => "struct",
            Self::Variant(..) => "variant",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Look up a struct field. Variants are looked through.
    pub fn field(&self, name: &str) -> Option<&AbiValue> {
        match self {
            Self::Struct(fields) => fields.get(name),
            Self::Variant(_, inner) => inner.field(name),
            _ => None,
        }
    }

    /// The value inside a variant, or `self` for anything else.
    pub fn unwrap_variant(&self) -> &AbiValue {
        match self {
            Self::Variant(_, inner) => inner.unwrap_variant(),
            other => other,
        }
    }

    /// The tag of a variant value.
    pub fn variant_tag(&self) -> Option<&str> {
        match self {
            Self::Variant(tag, _) => Some(tag),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Unsigned view of any non-negative integer value.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Uint(v) => Some(*v),
            Self::Int(v) => u64::try_from(*v).ok(),
            Self::Uint128(v) => u64::try_from(*v).ok(),
            Self::Int128(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Signed view of any integer value that fits in `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Uint(v) => i64::try_from(*v).ok(),
            Self::Uint128(v) => i64::try_from(*v).ok(),
            Self::Int128(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[AbiValue]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Project into JSON.
    ///
    /// Structs keep field order, variants become `[tag, value]`, bytes become
    /// lowercase hex and 128-bit integers become decimal strings.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(v) => Value::from(*v),
            Self::Uint(v) => Value::from(*v),
            Self::Int128(v) => Value::String(v.to_string()),
            Self::Uint128(v) => Value::String(v.to_string()),
            Self::Float(v) => Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(v.to_string())),
            Self::String(s) => Value::String(s.clone()),
            Self::Bytes(b) => Value::String(hex::encode(b)),
            Self::Array(items) => Value::Array(items.iter().map(AbiValue::to_json).collect()),
            Self::Struct(fields) => {
                let mut map = Map::with_capacity(fields.len());
                for (k, v) in fields {
                    map.insert(k.clone(), v.to_json());
                }
                Value::Object(map)
            }
            Self::Variant(tag, inner) => {
                Value::Array(vec![Value::String(tag.clone()), inner.to_json()])
            }
        }
    }
}

impl fmt::Display for AbiValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<&str> for AbiValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for AbiValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for AbiValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<u32> for AbiValue {
    fn from(v: u32) -> Self {
        Self::Uint(v as u64)
    }
}

impl From<u64> for AbiValue {
    fn from(v: u64) -> Self {
        Self::Uint(v)
    }
}

impl From<Vec<u8>> for AbiValue {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}
