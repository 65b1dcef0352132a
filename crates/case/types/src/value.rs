//! Typed variable values
//!
//! A [`TypedValue`] couples a [`Value`] with an optional declared
//! [`VariableType`]. Values without a declared type are *untyped*: the
//! serializer registry picks a type for them on write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Data format used by object values holding JSON
pub const JSON_DATA_FORMAT: &str = "application/json";

/// Config key carrying the data format of a serialized object
pub const CONFIG_DATA_FORMAT: &str = "dataFormat";

/// Config key carrying the type name of a serialized object
pub const CONFIG_OBJECT_TYPE_NAME: &str = "objectTypeName";

// ── Variable Types ───────────────────────────────────────────────────

/// The declared type of a variable value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    Null,
    Boolean,
    Short,
    Integer,
    Long,
    Double,
    String,
    Date,
    Bytes,
    Object,
}

impl VariableType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Short => "short",
            Self::Integer => "integer",
            Self::Long => "long",
            Self::Double => "double",
            Self::String => "string",
            Self::Date => "date",
            Self::Bytes => "bytes",
            Self::Object => "object",
        }
    }

    pub fn is_primitive(&self) -> bool {
        !matches!(self, Self::Object)
    }
}

impl std::fmt::Display for VariableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Values ───────────────────────────────────────────────────────────

/// A variable value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Boolean(bool),
    Short(i16),
    Integer(i32),
    Long(i64),
    Double(f64),
    String(String),
    Date(DateTime<Utc>),
    Bytes(Vec<u8>),
    Object(ObjectValue),
}

impl Value {
    /// The type this value naturally carries
    pub fn variable_type(&self) -> VariableType {
        match self {
            Self::Null => VariableType::Null,
            Self::Boolean(_) => VariableType::Boolean,
            Self::Short(_) => VariableType::Short,
            Self::Integer(_) => VariableType::Integer,
            Self::Long(_) => VariableType::Long,
            Self::Double(_) => VariableType::Double,
            Self::String(_) => VariableType::String,
            Self::Date(_) => VariableType::Date,
            Self::Bytes(_) => VariableType::Bytes,
            Self::Object(_) => VariableType::Object,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Integral values widened to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Short(v) => Some(i64::from(*v)),
            Self::Integer(v) => Some(i64::from(*v)),
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric values widened to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// A structured value, either held deserialized or as serialized text
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectValue {
    pub data_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deserialized: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serialized: Option<String>,
}

impl ObjectValue {
    pub fn from_json(value: serde_json::Value) -> Self {
        Self {
            data_format: JSON_DATA_FORMAT.to_string(),
            type_name: None,
            deserialized: Some(value),
            serialized: None,
        }
    }

    /// An object given only in its serialized form
    pub fn serialized(text: impl Into<String>, data_format: impl Into<String>) -> Self {
        Self {
            data_format: data_format.into(),
            type_name: None,
            deserialized: None,
            serialized: Some(text.into()),
        }
    }

    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn is_deserialized(&self) -> bool {
        self.deserialized.is_some()
    }
}

// ── Typed Values ─────────────────────────────────────────────────────

/// A value plus its declared type, if the caller knows it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypedValue {
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared: Option<VariableType>,
}

impl TypedValue {
    /// A value typed with its natural type
    pub fn new(value: Value) -> Self {
        let declared = Some(value.variable_type());
        Self { value, declared }
    }

    /// A value whose type the registry will decide
    pub fn untyped(value: Value) -> Self {
        Self {
            value,
            declared: None,
        }
    }

    pub fn null() -> Self {
        Self::new(Value::Null)
    }

    pub fn is_untyped(&self) -> bool {
        self.declared.is_none()
    }

    pub fn variable_type(&self) -> Option<VariableType> {
        self.declared
    }

    pub fn object(object: ObjectValue) -> Self {
        Self::new(Value::Object(object))
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self::object(ObjectValue::from_json(value))
    }
}

impl From<Value> for TypedValue {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

impl From<bool> for TypedValue {
    fn from(v: bool) -> Self {
        Self::new(Value::Boolean(v))
    }
}

impl From<i16> for TypedValue {
    fn from(v: i16) -> Self {
        Self::new(Value::Short(v))
    }
}

impl From<i32> for TypedValue {
    fn from(v: i32) -> Self {
        Self::new(Value::Integer(v))
    }
}

impl From<i64> for TypedValue {
    fn from(v: i64) -> Self {
        Self::new(Value::Long(v))
    }
}

impl From<f64> for TypedValue {
    fn from(v: f64) -> Self {
        Self::new(Value::Double(v))
    }
}

impl From<&str> for TypedValue {
    fn from(v: &str) -> Self {
        Self::new(Value::String(v.to_string()))
    }
}

impl From<String> for TypedValue {
    fn from(v: String) -> Self {
        Self::new(Value::String(v))
    }
}

impl From<DateTime<Utc>> for TypedValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::new(Value::Date(v))
    }
}

impl From<Vec<u8>> for TypedValue {
    fn from(v: Vec<u8>) -> Self {
        Self::new(Value::Bytes(v))
    }
}

// ── Serialized Form ──────────────────────────────────────────────────

/// Serializer-neutral transport form of a stored variable
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedValue {
    pub bytes: Vec<u8>,
    pub serializer_name: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl SerializedValue {
    pub fn new(bytes: Vec<u8>, serializer_name: impl Into<String>) -> Self {
        Self {
            bytes,
            serializer_name: serializer_name.into(),
            config: BTreeMap::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }
}
