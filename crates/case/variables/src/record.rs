//! A single stored variable

use crate::{BlobAccess, ValueFields, VariableContext};
use case_types::{CaseError, CaseResult, ExecutionId, SerializedValue, TypedValue, VariableId};
use serde::{Deserialize, Serialize};

/// One persisted variable.
///
/// The decoded value is cached after the first read. A failed decode is
/// remembered: the error reaches the first reader only and later reads
/// return the cached state from before the failure instead of decoding
/// again. The error is persisted with the record; the cache is not.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VariableRecord {
    pub id: VariableId,
    pub name: String,
    pub scope_id: ExecutionId,
    pub revision: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serializer_name: Option<String>,
    #[serde(default)]
    pub fields: ValueFields,
    #[serde(skip)]
    cached: Option<TypedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

impl VariableRecord {
    pub fn new(name: impl Into<String>, scope_id: ExecutionId) -> Self {
        Self {
            id: VariableId::generate(),
            name: name.into(),
            scope_id,
            revision: 0,
            serializer_name: None,
            fields: ValueFields::default(),
            cached: None,
            error_message: None,
        }
    }

    /// Store `value`, returning it as the caller should now observe it.
    ///
    /// The current serializer is kept while it still accepts the value;
    /// otherwise a new one is resolved and the old fields (and blob) are
    /// released before writing. Untyped values come back with the type
    /// the serializer detected.
    pub fn write(&mut self, value: TypedValue, ctx: &mut VariableContext<'_>) -> CaseResult<TypedValue> {
        let current = self
            .serializer_name
            .as_deref()
            .and_then(|name| ctx.serializers.get(name))
            .filter(|s| s.can_serialize(&value));

        let serializer = match current {
            Some(serializer) => serializer,
            None => {
                let serializer = ctx.serializers.find_for_value(&value)?;
                self.clear(ctx.blobs)?;
                self.serializer_name = Some(serializer.name().to_string());
                serializer
            }
        };

        serializer
            .write_value(&value, &mut self.fields, ctx.blobs)
            .map_err(|e| e.with_variable(&self.name))?;

        let value = if value.is_untyped() {
            serializer
                .read_value(&self.fields, &*ctx.blobs)
                .map_err(|e| e.with_variable(&self.name))?
        } else {
            value
        };

        self.revision += 1;
        self.error_message = None;
        self.cached = Some(value.clone());
        Ok(value)
    }

    /// Decoded value. `Ok(None)` once a decode failure has been reported.
    pub fn read(&mut self, ctx: &VariableContext<'_>) -> CaseResult<Option<TypedValue>> {
        if self.error_message.is_none() && self.cached.is_none() {
            let Some(serializer_name) = self.serializer_name.as_deref() else {
                return Ok(None);
            };
            let decoded = ctx
                .serializers
                .by_name(serializer_name)
                .and_then(|s| s.read_value(&self.fields, &*ctx.blobs));
            match decoded {
                Ok(value) => self.cached = Some(value),
                Err(e) => {
                    let message = match e {
                        CaseError::Decode { message, .. } => message,
                        other => other.to_string(),
                    };
                    tracing::warn!(
                        variable = %self.name,
                        scope_id = %self.scope_id,
                        error = %message,
                        "Variable could not be decoded"
                    );
                    self.mark_undecodable(message.clone());
                    return Err(CaseError::Decode {
                        variable: self.name.clone(),
                        message,
                    });
                }
            }
        }
        Ok(self.cached.clone())
    }

    /// Neutral byte form of the stored value, without decoding it
    pub fn to_serialized(&self, ctx: &VariableContext<'_>) -> CaseResult<SerializedValue> {
        let name = self
            .serializer_name
            .as_deref()
            .ok_or_else(|| CaseError::VariableNotFound(self.name.clone()))?;
        ctx.serializers
            .by_name(name)?
            .to_serialized(&self.fields, &*ctx.blobs)
            .map_err(|e| e.with_variable(&self.name))
    }

    /// Release raw fields and any owned blob
    pub fn clear(&mut self, blobs: &mut dyn BlobAccess) -> CaseResult<()> {
        if let Some(blob_id) = self.fields.blob_id.clone() {
            blobs.delete_blob(&blob_id)?;
            self.fields = ValueFields::default();
        } else {
            self.fields.long = None;
            self.fields.double = None;
            self.fields.text = None;
            self.fields.text2 = None;
        }
        self.cached = None;
        Ok(())
    }

    /// Forget the decoded value so the next read decodes again
    pub fn invalidate_cache(&mut self) {
        self.cached = None;
    }

    /// Remember that the stored payload cannot be decoded
    pub fn mark_undecodable(&mut self, message: String) {
        self.cached = None;
        self.error_message = Some(message);
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn is_cached(&self) -> bool {
        self.cached.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryBlobs, SerializerRegistry};
    use case_types::{Value, VariableType};

    fn scope() -> ExecutionId {
        ExecutionId::new("scope-1")
    }

    #[test]
    fn test_write_then_read() {
        let registry = SerializerRegistry::with_defaults();
        let mut blobs = InMemoryBlobs::new();
        let mut ctx = VariableContext::new(&registry, &mut blobs);

        let mut record = VariableRecord::new("amount", scope());
        record.write(TypedValue::from(250i64), &mut ctx).unwrap();
        assert_eq!(record.serializer_name.as_deref(), Some("long"));

        record.invalidate_cache();
        assert_eq!(record.read(&ctx).unwrap(), Some(TypedValue::from(250i64)));
        assert!(record.is_cached());
    }

    #[test]
    fn test_untyped_value_gets_detected_type() {
        let registry = SerializerRegistry::with_defaults();
        let mut blobs = InMemoryBlobs::new();
        let mut ctx = VariableContext::new(&registry, &mut blobs);

        let mut record = VariableRecord::new("flag", scope());
        let stored = record
            .write(TypedValue::untyped(Value::Boolean(true)), &mut ctx)
            .unwrap();
        assert_eq!(stored.variable_type(), Some(VariableType::Boolean));
        assert!(!stored.is_untyped());
    }

    #[test]
    fn test_same_serializer_updates_in_place() {
        let registry = SerializerRegistry::with_defaults();
        let mut blobs = InMemoryBlobs::new();
        let mut ctx = VariableContext::new(&registry, &mut blobs);

        let mut record = VariableRecord::new("count", scope());
        record.write(TypedValue::from(1i32), &mut ctx).unwrap();
        let id = record.id.clone();
        record.write(TypedValue::from(2i32), &mut ctx).unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.revision, 2);
        assert_eq!(record.fields.long, Some(2));
    }

    #[test]
    fn test_serializer_change_releases_blob() {
        let registry = SerializerRegistry::with_defaults();
        let mut blobs = InMemoryBlobs::new();
        let mut record = VariableRecord::new("payload", scope());
        {
            let mut ctx = VariableContext::new(&registry, &mut blobs);
            record.write(TypedValue::from(vec![1u8, 2]), &mut ctx).unwrap();
        }
        assert_eq!(blobs.len(), 1);
        {
            let mut ctx = VariableContext::new(&registry, &mut blobs);
            record.write(TypedValue::from("text now"), &mut ctx).unwrap();
        }
        assert!(blobs.is_empty());
        assert_eq!(record.serializer_name.as_deref(), Some("string"));
        assert!(record.fields.blob_id.is_none());
    }

    #[test]
    fn test_no_serializer_leaves_record_untouched() {
        let registry = SerializerRegistry::new();
        let mut blobs = InMemoryBlobs::new();
        let mut ctx = VariableContext::new(&registry, &mut blobs);

        let mut record = VariableRecord::new("x", scope());
        let err = record.write(TypedValue::from(1i32), &mut ctx).unwrap_err();
        assert!(matches!(err, CaseError::NoSerializerFound(_)));
        assert!(record.serializer_name.is_none());
    }

    #[test]
    fn test_decode_failure_reported_once() {
        let registry = SerializerRegistry::with_defaults();
        let mut blobs = InMemoryBlobs::new();
        let mut record = VariableRecord::new("order", scope());
        {
            let mut ctx = VariableContext::new(&registry, &mut blobs);
            record
                .write(TypedValue::json(serde_json::json!({"id": 1})), &mut ctx)
                .unwrap();
        }
        let blob_id = record.fields.blob_id.clone().unwrap();
        assert!(blobs.replace(&blob_id, b"{corrupt".to_vec()));
        record.invalidate_cache();

        let ctx = VariableContext::new(&registry, &mut blobs);
        let first = record.read(&ctx);
        assert!(matches!(first, Err(CaseError::Decode { ref variable, .. }) if variable == "order"));
        assert!(record.error_message().is_some());

        assert_eq!(record.read(&ctx).unwrap(), None);
        assert_eq!(record.read(&ctx).unwrap(), None);
    }

    #[test]
    fn test_clear_paths() {
        let registry = SerializerRegistry::with_defaults();
        let mut blobs = InMemoryBlobs::new();

        let mut scalar = VariableRecord::new("s", scope());
        let mut bytes = VariableRecord::new("b", scope());
        {
            let mut ctx = VariableContext::new(&registry, &mut blobs);
            scalar.write(TypedValue::from("v"), &mut ctx).unwrap();
            bytes.write(TypedValue::from(vec![7u8]), &mut ctx).unwrap();
        }

        scalar.clear(&mut blobs).unwrap();
        assert!(scalar.fields.is_empty());
        assert_eq!(blobs.len(), 1);

        bytes.clear(&mut blobs).unwrap();
        assert!(bytes.fields.blob_id.is_none());
        assert!(blobs.is_empty());
    }

    #[test]
    fn test_serialized_form() {
        let registry = SerializerRegistry::with_defaults();
        let mut blobs = InMemoryBlobs::new();
        let mut ctx = VariableContext::new(&registry, &mut blobs);
        let mut record = VariableRecord::new("name", scope());
        record.write(TypedValue::from("Ada"), &mut ctx).unwrap();

        let serialized = record.to_serialized(&ctx).unwrap();
        assert_eq!(serialized.serializer_name, "string");
        assert_eq!(serialized.bytes, b"\"Ada\"".to_vec());
    }
}
