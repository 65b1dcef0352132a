//! Default serializers
//!
//! Registered in this order by [`SerializerRegistry::with_defaults`](crate::SerializerRegistry::with_defaults):
//! `null`, `boolean`, `string`, `short`, `integer`, `long`, `double`,
//! `date`, `bytes`, `json`.

use crate::serializer::{decode_error, encode_error};
use crate::{BlobAccess, ValueFields, ValueSerializer};
use case_types::{
    CaseResult, ObjectValue, SerializedValue, TypedValue, Value, VariableType,
    CONFIG_DATA_FORMAT, CONFIG_OBJECT_TYPE_NAME, JSON_DATA_FORMAT,
};
use chrono::{TimeZone, Utc};

// ── Null ─────────────────────────────────────────────────────────────

/// Untyped nulls; writes no fields
#[derive(Debug, Default)]
pub struct NullSerializer;

impl ValueSerializer for NullSerializer {
    fn name(&self) -> &str {
        "null"
    }

    fn variable_type(&self) -> VariableType {
        VariableType::Null
    }

    fn can_serialize(&self, value: &TypedValue) -> bool {
        value.value.is_null()
    }

    fn write_value(
        &self,
        _value: &TypedValue,
        fields: &mut ValueFields,
        _blobs: &mut dyn BlobAccess,
    ) -> CaseResult<()> {
        fields.long = None;
        fields.double = None;
        fields.text = None;
        fields.text2 = None;
        Ok(())
    }

    fn read_value(&self, _fields: &ValueFields, _blobs: &dyn BlobAccess) -> CaseResult<TypedValue> {
        Ok(TypedValue::null())
    }

    fn to_serialized(
        &self,
        _fields: &ValueFields,
        _blobs: &dyn BlobAccess,
    ) -> CaseResult<SerializedValue> {
        Ok(SerializedValue::new(Vec::new(), self.name()))
    }

    fn from_serialized(&self, _serialized: &SerializedValue) -> CaseResult<TypedValue> {
        Ok(TypedValue::null())
    }
}

// ── Primitives ───────────────────────────────────────────────────────

/// Scalar values kept in the long/double/text columns.
///
/// One instance per scalar [`VariableType`]. A null declared with the
/// serializer's type is accepted and stored as empty columns.
#[derive(Debug)]
pub struct PrimitiveSerializer {
    variable_type: VariableType,
}

impl PrimitiveSerializer {
    /// Scalar types handled by this serializer, in registration order
    pub const TYPES: [VariableType; 7] = [
        VariableType::Boolean,
        VariableType::String,
        VariableType::Short,
        VariableType::Integer,
        VariableType::Long,
        VariableType::Double,
        VariableType::Date,
    ];

    /// Returns `None` for types that are not kept in scalar columns
    pub fn new(variable_type: VariableType) -> Option<Self> {
        Self::TYPES
            .contains(&variable_type)
            .then_some(Self { variable_type })
    }

    fn typed(&self, value: Value) -> TypedValue {
        TypedValue {
            value,
            declared: Some(self.variable_type),
        }
    }

    fn decode_long(&self, long: i64) -> CaseResult<Value> {
        Ok(match self.variable_type {
            VariableType::Boolean => Value::Boolean(long == 1),
            VariableType::Short => Value::Short(
                i16::try_from(long).map_err(|_| decode_error(format!("{} overflows short", long)))?,
            ),
            VariableType::Integer => Value::Integer(
                i32::try_from(long)
                    .map_err(|_| decode_error(format!("{} overflows integer", long)))?,
            ),
            VariableType::Date => Value::Date(
                Utc.timestamp_millis_opt(long)
                    .single()
                    .ok_or_else(|| decode_error(format!("{} is not a valid timestamp", long)))?,
            ),
            _ => Value::Long(long),
        })
    }

    fn to_json(value: &Value) -> serde_json::Value {
        match value {
            Value::Boolean(b) => serde_json::Value::from(*b),
            Value::Short(v) => serde_json::Value::from(*v),
            Value::Integer(v) => serde_json::Value::from(*v),
            Value::Long(v) => serde_json::Value::from(*v),
            Value::Double(v) => serde_json::Value::from(*v),
            Value::String(s) => serde_json::Value::from(s.as_str()),
            Value::Date(d) => serde_json::Value::from(d.timestamp_millis()),
            _ => serde_json::Value::Null,
        }
    }

    fn from_json(&self, json: &serde_json::Value) -> CaseResult<Value> {
        if json.is_null() {
            return Ok(Value::Null);
        }
        let mismatch = || decode_error(format!("'{}' is not a {}", json, self.variable_type));
        match self.variable_type {
            VariableType::Boolean => json.as_bool().map(Value::Boolean).ok_or_else(mismatch),
            VariableType::String => json
                .as_str()
                .map(|s| Value::String(s.to_string()))
                .ok_or_else(mismatch),
            VariableType::Double => json.as_f64().map(Value::Double).ok_or_else(mismatch),
            _ => {
                let long = json.as_i64().ok_or_else(mismatch)?;
                self.decode_long(long)
            }
        }
    }
}

impl ValueSerializer for PrimitiveSerializer {
    fn name(&self) -> &str {
        self.variable_type.name()
    }

    fn variable_type(&self) -> VariableType {
        self.variable_type
    }

    fn can_serialize(&self, value: &TypedValue) -> bool {
        value.value.variable_type() == self.variable_type
            || (value.value.is_null() && value.declared == Some(self.variable_type))
    }

    fn write_value(
        &self,
        value: &TypedValue,
        fields: &mut ValueFields,
        _blobs: &mut dyn BlobAccess,
    ) -> CaseResult<()> {
        fields.long = None;
        fields.double = None;
        fields.text = None;
        match &value.value {
            Value::Null => {}
            Value::Boolean(b) => fields.long = Some(i64::from(*b)),
            Value::Short(v) => fields.long = Some(i64::from(*v)),
            Value::Integer(v) => fields.long = Some(i64::from(*v)),
            Value::Long(v) => {
                fields.long = Some(*v);
                fields.text = Some(v.to_string());
            }
            Value::Double(v) => fields.double = Some(*v),
            Value::String(s) => fields.text = Some(s.clone()),
            Value::Date(d) => fields.long = Some(d.timestamp_millis()),
            other => {
                return Err(encode_error(format!(
                    "{} serializer cannot write a {} value",
                    self.variable_type,
                    other.variable_type()
                )))
            }
        }
        Ok(())
    }

    fn read_value(&self, fields: &ValueFields, _blobs: &dyn BlobAccess) -> CaseResult<TypedValue> {
        let value = match self.variable_type {
            VariableType::String => fields.text.clone().map(Value::String),
            VariableType::Double => fields.double.map(Value::Double),
            _ => fields.long.map(|l| self.decode_long(l)).transpose()?,
        };
        Ok(self.typed(value.unwrap_or(Value::Null)))
    }

    fn to_serialized(
        &self,
        fields: &ValueFields,
        blobs: &dyn BlobAccess,
    ) -> CaseResult<SerializedValue> {
        let typed = self.read_value(fields, blobs)?;
        let bytes = serde_json::to_vec(&Self::to_json(&typed.value))
            .map_err(|e| encode_error(e.to_string()))?;
        Ok(SerializedValue::new(bytes, self.name()))
    }

    fn from_serialized(&self, serialized: &SerializedValue) -> CaseResult<TypedValue> {
        let json: serde_json::Value = serde_json::from_slice(&serialized.bytes)
            .map_err(|e| decode_error(e.to_string()))?;
        Ok(self.typed(self.from_json(&json)?))
    }
}

// ── Bytes ────────────────────────────────────────────────────────────

/// Raw bytes kept in a blob
#[derive(Debug, Default)]
pub struct BytesSerializer;

impl ValueSerializer for BytesSerializer {
    fn name(&self) -> &str {
        "bytes"
    }

    fn variable_type(&self) -> VariableType {
        VariableType::Bytes
    }

    fn can_serialize(&self, value: &TypedValue) -> bool {
        match &value.value {
            Value::Bytes(_) => true,
            Value::Null => value.declared == Some(VariableType::Bytes),
            _ => false,
        }
    }

    fn write_value(
        &self,
        value: &TypedValue,
        fields: &mut ValueFields,
        blobs: &mut dyn BlobAccess,
    ) -> CaseResult<()> {
        match &value.value {
            Value::Bytes(bytes) => fields.set_blob(bytes.clone(), blobs),
            _ => {
                if let Some(old) = fields.blob_id.take() {
                    blobs.delete_blob(&old)?;
                }
                Ok(())
            }
        }
    }

    fn read_value(&self, fields: &ValueFields, blobs: &dyn BlobAccess) -> CaseResult<TypedValue> {
        let value = fields.blob(blobs)?.map(Value::Bytes).unwrap_or(Value::Null);
        Ok(TypedValue {
            value,
            declared: Some(VariableType::Bytes),
        })
    }

    fn to_serialized(
        &self,
        fields: &ValueFields,
        blobs: &dyn BlobAccess,
    ) -> CaseResult<SerializedValue> {
        Ok(SerializedValue::new(
            fields.blob(blobs)?.unwrap_or_default(),
            self.name(),
        ))
    }

    fn from_serialized(&self, serialized: &SerializedValue) -> CaseResult<TypedValue> {
        Ok(TypedValue::new(Value::Bytes(serialized.bytes.clone())))
    }
}

// ── JSON Objects ─────────────────────────────────────────────────────

/// Object values in the `application/json` data format.
///
/// The payload is kept as UTF-8 JSON in a blob and the object type name in
/// `text2`. Objects handed over in serialized form are stored as given and
/// only parsed when read.
#[derive(Debug, Default)]
pub struct JsonSerializer;

impl ValueSerializer for JsonSerializer {
    fn name(&self) -> &str {
        "json"
    }

    fn variable_type(&self) -> VariableType {
        VariableType::Object
    }

    fn can_serialize(&self, value: &TypedValue) -> bool {
        matches!(&value.value, Value::Object(o) if o.data_format == JSON_DATA_FORMAT)
    }

    fn write_value(
        &self,
        value: &TypedValue,
        fields: &mut ValueFields,
        blobs: &mut dyn BlobAccess,
    ) -> CaseResult<()> {
        let Value::Object(object) = &value.value else {
            return Err(encode_error("json serializer can only write objects"));
        };
        let bytes = match (&object.deserialized, &object.serialized) {
            (Some(json), _) => serde_json::to_vec(json).map_err(|e| encode_error(e.to_string()))?,
            (None, Some(text)) => text.as_bytes().to_vec(),
            (None, None) => b"null".to_vec(),
        };
        fields.set_blob(bytes, blobs)?;
        fields.text2 = object.type_name.clone();
        Ok(())
    }

    fn read_value(&self, fields: &ValueFields, blobs: &dyn BlobAccess) -> CaseResult<TypedValue> {
        let bytes = fields.blob(blobs)?.unwrap_or_else(|| b"null".to_vec());
        let json: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| decode_error(e.to_string()))?;
        Ok(TypedValue::object(ObjectValue {
            data_format: JSON_DATA_FORMAT.to_string(),
            type_name: fields.text2.clone(),
            deserialized: Some(json),
            serialized: None,
        }))
    }

    fn to_serialized(
        &self,
        fields: &ValueFields,
        blobs: &dyn BlobAccess,
    ) -> CaseResult<SerializedValue> {
        let mut serialized = SerializedValue::new(fields.blob(blobs)?.unwrap_or_default(), self.name())
            .with_config(CONFIG_DATA_FORMAT, JSON_DATA_FORMAT);
        if let Some(type_name) = &fields.text2 {
            serialized = serialized.with_config(CONFIG_OBJECT_TYPE_NAME, type_name.clone());
        }
        Ok(serialized)
    }

    fn from_serialized(&self, serialized: &SerializedValue) -> CaseResult<TypedValue> {
        let text = String::from_utf8(serialized.bytes.clone())
            .map_err(|e| decode_error(format!("payload is not UTF-8: {}", e)))?;
        let format = serialized
            .config_value(CONFIG_DATA_FORMAT)
            .unwrap_or(JSON_DATA_FORMAT);
        let mut object = ObjectValue::serialized(text, format);
        object.type_name = serialized
            .config_value(CONFIG_OBJECT_TYPE_NAME)
            .map(str::to_string);
        Ok(TypedValue::object(object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryBlobs;
    use case_types::CaseError;

    fn round_trip(serializer: &dyn ValueSerializer, value: TypedValue) -> TypedValue {
        let mut blobs = InMemoryBlobs::new();
        let mut fields = ValueFields::default();
        serializer.write_value(&value, &mut fields, &mut blobs).unwrap();
        serializer.read_value(&fields, &blobs).unwrap()
    }

    fn primitive(t: VariableType) -> PrimitiveSerializer {
        PrimitiveSerializer::new(t).unwrap()
    }

    #[test]
    fn test_primitive_field_mapping() {
        let mut blobs = InMemoryBlobs::new();
        let mut fields = ValueFields::default();
        primitive(VariableType::Long)
            .write_value(&TypedValue::from(42i64), &mut fields, &mut blobs)
            .unwrap();
        assert_eq!(fields.long, Some(42));
        assert_eq!(fields.text.as_deref(), Some("42"));

        let mut fields = ValueFields::default();
        primitive(VariableType::Boolean)
            .write_value(&TypedValue::from(true), &mut fields, &mut blobs)
            .unwrap();
        assert_eq!(fields.long, Some(1));
    }

    #[test]
    fn test_primitive_round_trips() {
        let date = Utc.timestamp_millis_opt(1_700_000_000_123).single().unwrap();
        for value in [
            TypedValue::from(false),
            TypedValue::from(-3i16),
            TypedValue::from(77i32),
            TypedValue::from(i64::MAX),
            TypedValue::from(2.5f64),
            TypedValue::from("hello"),
            TypedValue::from(date),
        ] {
            let t = value.variable_type().unwrap();
            assert_eq!(round_trip(&primitive(t), value.clone()), value);
        }
    }

    #[test]
    fn test_typed_null_keeps_type() {
        let value = TypedValue {
            value: Value::Null,
            declared: Some(VariableType::Integer),
        };
        let s = primitive(VariableType::Integer);
        assert!(s.can_serialize(&value));
        assert_eq!(round_trip(&s, value.clone()), value);
        assert!(!primitive(VariableType::String).can_serialize(&value));
    }

    #[test]
    fn test_short_overflow_is_decode_error() {
        let fields = ValueFields {
            long: Some(i64::from(i16::MAX) + 1),
            ..Default::default()
        };
        let err = primitive(VariableType::Short)
            .read_value(&fields, &InMemoryBlobs::new())
            .unwrap_err();
        assert!(matches!(err, CaseError::Decode { .. }));
    }

    #[test]
    fn test_non_scalar_type_rejected() {
        assert!(PrimitiveSerializer::new(VariableType::Object).is_none());
        assert!(PrimitiveSerializer::new(VariableType::Bytes).is_none());
    }

    #[test]
    fn test_bytes_in_blob() {
        let value = TypedValue::from(vec![0u8, 1, 255]);
        assert_eq!(round_trip(&BytesSerializer, value.clone()), value);
    }

    #[test]
    fn test_json_object() {
        let value = TypedValue::object(
            ObjectValue::from_json(serde_json::json!({"amount": 10, "tags": ["a"]}))
                .with_type_name("Order"),
        );
        let mut blobs = InMemoryBlobs::new();
        let mut fields = ValueFields::default();
        JsonSerializer.write_value(&value, &mut fields, &mut blobs).unwrap();
        assert_eq!(fields.text2.as_deref(), Some("Order"));

        assert_eq!(JsonSerializer.read_value(&fields, &blobs).unwrap(), value);

        let serialized = JsonSerializer.to_serialized(&fields, &blobs).unwrap();
        assert_eq!(serialized.config_value(CONFIG_OBJECT_TYPE_NAME), Some("Order"));
        assert_eq!(serialized.config_value(CONFIG_DATA_FORMAT), Some(JSON_DATA_FORMAT));
    }

    #[test]
    fn test_serialized_json_parsed_on_read() {
        let serialized = SerializedValue::new(b"{not json".to_vec(), "json");
        let value = JsonSerializer.from_serialized(&serialized).unwrap();

        let mut blobs = InMemoryBlobs::new();
        let mut fields = ValueFields::default();
        JsonSerializer.write_value(&value, &mut fields, &mut blobs).unwrap();
        assert!(matches!(
            JsonSerializer.read_value(&fields, &blobs),
            Err(CaseError::Decode { .. })
        ));
    }

    #[test]
    fn test_primitive_serialized_form() {
        let s = primitive(VariableType::Integer);
        let mut blobs = InMemoryBlobs::new();
        let mut fields = ValueFields::default();
        s.write_value(&TypedValue::from(12i32), &mut fields, &mut blobs).unwrap();
        let serialized = s.to_serialized(&fields, &blobs).unwrap();
        assert_eq!(serialized.bytes, b"12".to_vec());
        assert_eq!(s.from_serialized(&serialized).unwrap(), TypedValue::from(12i32));
    }
}
