//! Local variable storage of one scope

use crate::{BlobAccess, VariableContext, VariableMap, VariableRecord};
use case_types::{CaseError, CaseResult, ExecutionId, SerializedValue, TypedValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What happened to a variable
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableEventKind {
    Created,
    Updated,
    Deleted,
}

/// A variable mutation, as seen by observers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariableEvent {
    pub kind: VariableEventKind,
    pub name: String,
    /// Scope the variable lives in
    pub scope: ExecutionId,
    /// Scope the operation was invoked on
    pub origin: ExecutionId,
}

/// Name → record map of one scope. Knows nothing about parent scopes.
///
/// Tracks whether anything needs persisting since it was loaded: writes,
/// removals and captured decode failures do, plain reads do not.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VariableStore {
    records: BTreeMap<String, VariableRecord>,
    #[serde(skip)]
    events: Vec<VariableEvent>,
    #[serde(skip)]
    modified: bool,
    #[serde(skip)]
    decode_failures: Vec<String>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoded value of `name`, if stored here
    pub fn get(&mut self, name: &str, ctx: &VariableContext<'_>) -> CaseResult<Option<TypedValue>> {
        let Some(record) = self.records.get_mut(name) else {
            return Ok(None);
        };
        let result = record.read(ctx);
        if let Err(CaseError::Decode { .. }) = &result {
            self.note_decode_failure(name);
        }
        result
    }

    pub fn record(&self, name: &str) -> Option<&VariableRecord> {
        self.records.get(name)
    }

    pub fn record_mut(&mut self, name: &str) -> Option<&mut VariableRecord> {
        self.records.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All decoded values. Records whose decode failed earlier are skipped.
    pub fn values(&mut self, ctx: &VariableContext<'_>) -> CaseResult<VariableMap> {
        let mut values = VariableMap::new();
        for (name, record) in self.records.iter_mut() {
            match record.read(ctx) {
                Ok(Some(value)) => {
                    values.insert(name.clone(), value);
                }
                Ok(None) => {}
                Err(e) => {
                    if let CaseError::Decode { .. } = &e {
                        self.modified = true;
                        self.decode_failures.push(name.clone());
                    }
                    return Err(e);
                }
            }
        }
        Ok(values)
    }

    /// Write `name` in this store, creating the record if absent
    pub fn upsert(
        &mut self,
        scope: &ExecutionId,
        name: &str,
        value: TypedValue,
        origin: &ExecutionId,
        ctx: &mut VariableContext<'_>,
    ) -> CaseResult<TypedValue> {
        let (stored, kind) = match self.records.get_mut(name) {
            Some(record) => (record.write(value, ctx)?, VariableEventKind::Updated),
            None => {
                let mut record = VariableRecord::new(name, scope.clone());
                let stored = record.write(value, ctx)?;
                self.records.insert(name.to_string(), record);
                (stored, VariableEventKind::Created)
            }
        };
        self.modified = true;
        tracing::trace!(scope_id = %scope, variable = name, ?kind, "Variable written");
        self.events.push(VariableEvent {
            kind,
            name: name.to_string(),
            scope: scope.clone(),
            origin: origin.clone(),
        });
        Ok(stored)
    }

    /// Write a variable given in serialized form
    pub fn upsert_serialized(
        &mut self,
        scope: &ExecutionId,
        name: &str,
        serialized: &SerializedValue,
        origin: &ExecutionId,
        ctx: &mut VariableContext<'_>,
    ) -> CaseResult<TypedValue> {
        let serializer = ctx.serializers.by_name(&serialized.serializer_name)?;
        let value = serializer
            .from_serialized(serialized)
            .map_err(|e| e.with_variable(name))?;
        self.upsert(scope, name, value, origin, ctx)
    }

    /// Remove `name`, releasing its blob
    pub fn remove(
        &mut self,
        name: &str,
        origin: &ExecutionId,
        blobs: &mut dyn BlobAccess,
    ) -> CaseResult<Option<VariableRecord>> {
        let Some(mut record) = self.records.remove(name) else {
            return Ok(None);
        };
        record.clear(blobs)?;
        self.modified = true;
        tracing::trace!(scope_id = %record.scope_id, variable = name, "Variable removed");
        self.events.push(VariableEvent {
            kind: VariableEventKind::Deleted,
            name: name.to_string(),
            scope: record.scope_id.clone(),
            origin: origin.clone(),
        });
        Ok(Some(record))
    }

    /// Drop every record and its blob without emitting events
    pub fn remove_all_silently(&mut self, blobs: &mut dyn BlobAccess) -> CaseResult<usize> {
        let records = std::mem::take(&mut self.records);
        let count = records.len();
        self.modified |= count > 0;
        for (_, mut record) in records {
            record.clear(blobs)?;
        }
        Ok(count)
    }

    /// Take the buffered mutation events
    pub fn drain_events(&mut self) -> Vec<VariableEvent> {
        std::mem::take(&mut self.events)
    }

    /// Whether this store changed since it was loaded or last persisted
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Reset change tracking once the store has been handed to persistence
    pub fn mark_persisted(&mut self) {
        self.modified = false;
        self.decode_failures.clear();
    }

    /// Decode failures captured since loading, as `(name, message)`
    pub fn take_decode_failures(&mut self) -> Vec<(String, String)> {
        let names = std::mem::take(&mut self.decode_failures);
        names
            .into_iter()
            .filter_map(|name| {
                let message = self.records.get(&name)?.error_message()?.to_string();
                Some((name, message))
            })
            .collect()
    }

    /// Persist a decode failure observed elsewhere on the record `name`.
    /// Returns false if the record is gone or already carries a failure.
    pub fn capture_decode_failure(&mut self, name: &str, message: String) -> bool {
        match self.records.get_mut(name) {
            Some(record) if record.error_message().is_none() => {
                record.mark_undecodable(message);
                self.modified = true;
                true
            }
            _ => false,
        }
    }

    fn note_decode_failure(&mut self, name: &str) {
        self.modified = true;
        self.decode_failures.push(name.to_string());
    }

    /// Force every record to decode again on its next read
    pub fn invalidate_caches(&mut self) {
        for record in self.records.values_mut() {
            record.invalidate_cache();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryBlobs, SerializerRegistry};
    use case_types::CaseError;

    fn scope() -> ExecutionId {
        ExecutionId::new("node")
    }

    #[test]
    fn test_upsert_emits_created_then_updated() {
        let registry = SerializerRegistry::with_defaults();
        let mut blobs = InMemoryBlobs::new();
        let mut ctx = VariableContext::new(&registry, &mut blobs);
        let mut store = VariableStore::new();
        let origin = ExecutionId::new("child");

        store.upsert(&scope(), "x", TypedValue::from(1i32), &origin, &mut ctx).unwrap();
        store.upsert(&scope(), "x", TypedValue::from(2i32), &origin, &mut ctx).unwrap();

        let events = store.drain_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, VariableEventKind::Created);
        assert_eq!(events[1].kind, VariableEventKind::Updated);
        assert_eq!(events[1].origin, origin);
        assert!(store.drain_events().is_empty());
        assert_eq!(store.get("x", &ctx).unwrap(), Some(TypedValue::from(2i32)));
    }

    #[test]
    fn test_failed_insert_creates_nothing() {
        let registry = SerializerRegistry::new();
        let mut blobs = InMemoryBlobs::new();
        let mut ctx = VariableContext::new(&registry, &mut blobs);
        let mut store = VariableStore::new();

        let err = store
            .upsert(&scope(), "x", TypedValue::from(1i32), &scope(), &mut ctx)
            .unwrap_err();
        assert!(matches!(err, CaseError::NoSerializerFound(_)));
        assert!(store.is_empty());
        assert!(store.drain_events().is_empty());
    }

    #[test]
    fn test_remove_releases_blob() {
        let registry = SerializerRegistry::with_defaults();
        let mut blobs = InMemoryBlobs::new();
        let mut store = VariableStore::new();
        {
            let mut ctx = VariableContext::new(&registry, &mut blobs);
            store
                .upsert(&scope(), "doc", TypedValue::from(vec![1u8]), &scope(), &mut ctx)
                .unwrap();
        }
        let removed = store.remove("doc", &scope(), &mut blobs).unwrap();
        assert!(removed.is_some());
        assert!(blobs.is_empty());
        assert!(store.remove("doc", &scope(), &mut blobs).unwrap().is_none());
    }

    #[test]
    fn test_remove_all_silently() {
        let registry = SerializerRegistry::with_defaults();
        let mut blobs = InMemoryBlobs::new();
        let mut store = VariableStore::new();
        {
            let mut ctx = VariableContext::new(&registry, &mut blobs);
            store.upsert(&scope(), "a", TypedValue::from(1i32), &scope(), &mut ctx).unwrap();
            store
                .upsert(&scope(), "b", TypedValue::json(serde_json::json!({})), &scope(), &mut ctx)
                .unwrap();
        }
        store.drain_events();

        assert_eq!(store.remove_all_silently(&mut blobs).unwrap(), 2);
        assert!(store.is_empty());
        assert!(blobs.is_empty());
        assert!(store.drain_events().is_empty());
    }

    #[test]
    fn test_upsert_serialized_unknown_serializer() {
        let registry = SerializerRegistry::with_defaults();
        let mut blobs = InMemoryBlobs::new();
        let mut ctx = VariableContext::new(&registry, &mut blobs);
        let mut store = VariableStore::new();

        let serialized = SerializedValue::new(b"1".to_vec(), "yaml");
        let err = store
            .upsert_serialized(&scope(), "x", &serialized, &scope(), &mut ctx)
            .unwrap_err();
        assert!(matches!(err, CaseError::UnknownSerializer(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_values_and_names() {
        let registry = SerializerRegistry::with_defaults();
        let mut blobs = InMemoryBlobs::new();
        let mut ctx = VariableContext::new(&registry, &mut blobs);
        let mut store = VariableStore::new();
        store.upsert(&scope(), "b", TypedValue::from("2"), &scope(), &mut ctx).unwrap();
        store.upsert(&scope(), "a", TypedValue::from(true), &scope(), &mut ctx).unwrap();

        assert_eq!(store.names(), vec!["a".to_string(), "b".to_string()]);
        let values = store.values(&ctx).unwrap();
        assert_eq!(values.get("a"), Some(&TypedValue::from(true)));
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_reads_do_not_mark_modified() {
        let registry = SerializerRegistry::with_defaults();
        let mut blobs = InMemoryBlobs::new();
        let mut ctx = VariableContext::new(&registry, &mut blobs);
        let mut store = VariableStore::new();
        assert!(!store.is_modified());

        store.upsert(&scope(), "a", TypedValue::from(1i32), &scope(), &mut ctx).unwrap();
        assert!(store.is_modified());
        store.mark_persisted();

        store.invalidate_caches();
        store.get("a", &ctx).unwrap();
        store.values(&ctx).unwrap();
        assert!(!store.is_modified());
    }

    #[test]
    fn test_decode_failure_is_tracked() {
        let registry = SerializerRegistry::with_defaults();
        let mut blobs = InMemoryBlobs::new();
        let mut store = VariableStore::new();
        {
            let mut ctx = VariableContext::new(&registry, &mut blobs);
            store
                .upsert(&scope(), "doc", TypedValue::json(serde_json::json!({"k": 1})), &scope(), &mut ctx)
                .unwrap();
        }
        store.mark_persisted();
        store.invalidate_caches();
        let blob_id = store.record("doc").and_then(|r| r.fields.blob_id.clone()).unwrap();
        assert!(blobs.replace(&blob_id, b"{broken".to_vec()));

        let ctx = VariableContext::new(&registry, &mut blobs);
        assert!(matches!(store.values(&ctx), Err(CaseError::Decode { .. })));
        assert!(store.is_modified());
        assert!(store.values(&ctx).unwrap().is_empty());

        let failures = store.take_decode_failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "doc");
        assert!(store.take_decode_failures().is_empty());
    }

    #[test]
    fn test_capture_decode_failure_once() {
        let registry = SerializerRegistry::with_defaults();
        let mut blobs = InMemoryBlobs::new();
        let mut ctx = VariableContext::new(&registry, &mut blobs);
        let mut store = VariableStore::new();
        store.upsert(&scope(), "a", TypedValue::from(1i32), &scope(), &mut ctx).unwrap();
        store.mark_persisted();

        assert!(store.capture_decode_failure("a", "bad payload".into()));
        assert!(store.is_modified());
        assert!(!store.capture_decode_failure("a", "bad payload".into()));
        assert!(!store.capture_decode_failure("missing", "bad payload".into()));
        assert_eq!(store.get("a", &ctx).unwrap(), None);
    }
}
