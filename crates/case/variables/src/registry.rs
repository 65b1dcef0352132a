//! Ordered serializer catalog

use crate::{
    BytesSerializer, JsonSerializer, NullSerializer, PrimitiveSerializer, ValueSerializer,
};
use case_types::{CaseError, CaseResult, TypedValue};
use std::sync::Arc;

/// Serializers in probe order.
///
/// Resolution walks the list front to back. For a value with a declared
/// type only serializers of that type are probed; for an untyped value all
/// are. The first serializer whose `can_serialize` accepts the value wins,
/// so registering at a lower index overrides later entries.
#[derive(Clone, Debug, Default)]
pub struct SerializerRegistry {
    serializers: Vec<Arc<dyn ValueSerializer>>,
}

impl SerializerRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the default serializer set
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.add(Arc::new(NullSerializer));
        for variable_type in PrimitiveSerializer::TYPES {
            if let Some(serializer) = PrimitiveSerializer::new(variable_type) {
                registry.add(Arc::new(serializer));
            }
        }
        registry.add(Arc::new(BytesSerializer));
        registry.add(Arc::new(JsonSerializer));
        registry
    }

    /// Insert `serializer` at `index` (clamped to the end).
    ///
    /// A serializer already registered under the same name is removed first.
    pub fn register(&mut self, serializer: Arc<dyn ValueSerializer>, index: usize) {
        self.remove(serializer.name());
        let index = index.min(self.serializers.len());
        tracing::debug!(serializer = serializer.name(), index, "Registering serializer");
        self.serializers.insert(index, serializer);
    }

    /// Append `serializer` at the end of the probe order
    pub fn add(&mut self, serializer: Arc<dyn ValueSerializer>) {
        let end = self.serializers.len();
        self.register(serializer, end);
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn ValueSerializer>> {
        let index = self.index_of(name)?;
        Some(self.serializers.remove(index))
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.serializers.iter().position(|s| s.name() == name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ValueSerializer>> {
        self.serializers.iter().find(|s| s.name() == name).cloned()
    }

    /// Look up a serializer by its persisted name
    pub fn by_name(&self, name: &str) -> CaseResult<Arc<dyn ValueSerializer>> {
        self.get(name)
            .ok_or_else(|| CaseError::UnknownSerializer(name.to_string()))
    }

    /// Pick the serializer for `value`
    pub fn find_for_value(&self, value: &TypedValue) -> CaseResult<Arc<dyn ValueSerializer>> {
        self.serializers
            .iter()
            .filter(|s| match value.variable_type() {
                Some(declared) => s.variable_type() == declared,
                None => true,
            })
            .find(|s| s.can_serialize(value))
            .cloned()
            .ok_or_else(|| {
                CaseError::NoSerializerFound(match value.variable_type() {
                    Some(t) => format!("{} value", t),
                    None => format!("untyped {} value", value.value.variable_type()),
                })
            })
    }

    pub fn names(&self) -> Vec<&str> {
        self.serializers.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.serializers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.serializers.is_empty()
    }
}
