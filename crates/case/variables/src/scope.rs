//! Hierarchical variable scopes
//!
//! Scopes are addressed by id; an implementor owns the scopes and knows
//! each one's parent. Lookups walk from a scope towards the root. Writes
//! of a name that exists nowhere in the chain land on the root scope.

use crate::{BlobAccess, SerializerRegistry, VariableStore};
use case_types::{CaseResult, ExecutionId, SerializedValue, TypedValue};
use std::collections::BTreeMap;

/// Variables by name
pub type VariableMap = BTreeMap<String, TypedValue>;

/// Everything a record needs to encode or decode a value
pub struct VariableContext<'a> {
    pub serializers: &'a SerializerRegistry,
    pub blobs: &'a mut dyn BlobAccess,
}

impl<'a> VariableContext<'a> {
    pub fn new(serializers: &'a SerializerRegistry, blobs: &'a mut dyn BlobAccess) -> Self {
        Self { serializers, blobs }
    }
}

/// A tree of variable scopes.
///
/// Implementors provide parent lookup and access to each scope's local
/// store; the get/set/remove semantics are provided.
pub trait VariableScope {
    /// Parent of `scope`, `None` at the root
    fn parent_scope(&mut self, scope: &ExecutionId) -> CaseResult<Option<ExecutionId>>;

    /// Local store of `scope` together with the encoding context
    fn scope_access(
        &mut self,
        scope: &ExecutionId,
    ) -> CaseResult<(&mut VariableStore, VariableContext<'_>)>;

    /// Value visible from `scope`: local first, then ancestors
    fn get_variable(&mut self, scope: &ExecutionId, name: &str) -> CaseResult<Option<TypedValue>> {
        let mut current = scope.clone();
        loop {
            {
                let (store, ctx) = self.scope_access(&current)?;
                if store.contains(name) {
                    return store.get(name, &ctx);
                }
            }
            match self.parent_scope(&current)? {
                Some(parent) => current = parent,
                None => return Ok(None),
            }
        }
    }

    fn get_variable_local(
        &mut self,
        scope: &ExecutionId,
        name: &str,
    ) -> CaseResult<Option<TypedValue>> {
        let (store, ctx) = self.scope_access(scope)?;
        store.get(name, &ctx)
    }

    /// Scope a propagating write of `name` lands on: the nearest scope
    /// holding it, else the root of the chain
    fn write_target(&mut self, scope: &ExecutionId, name: &str) -> CaseResult<ExecutionId> {
        let mut current = scope.clone();
        loop {
            if self.scope_access(&current)?.0.contains(name) {
                return Ok(current);
            }
            match self.parent_scope(&current)? {
                Some(parent) => current = parent,
                None => return Ok(current),
            }
        }
    }

    /// Update `name` where it lives in the chain, or create it on the root
    fn set_variable(
        &mut self,
        scope: &ExecutionId,
        name: &str,
        value: TypedValue,
    ) -> CaseResult<TypedValue> {
        let target = self.write_target(scope, name)?;
        let (store, mut ctx) = self.scope_access(&target)?;
        store.upsert(&target, name, value, scope, &mut ctx)
    }

    /// [`set_variable`](Self::set_variable) for a value in serialized form
    fn set_variable_serialized(
        &mut self,
        scope: &ExecutionId,
        name: &str,
        serialized: &SerializedValue,
    ) -> CaseResult<TypedValue> {
        let target = self.write_target(scope, name)?;
        let (store, mut ctx) = self.scope_access(&target)?;
        store.upsert_serialized(&target, name, serialized, scope, &mut ctx)
    }

    /// Write `name` on `scope` itself, shadowing any ancestor binding
    fn set_variable_local(
        &mut self,
        scope: &ExecutionId,
        name: &str,
        value: TypedValue,
    ) -> CaseResult<TypedValue> {
        let (store, mut ctx) = self.scope_access(scope)?;
        store.upsert(scope, name, value, scope, &mut ctx)
    }

    /// The stored value of `name` in serialized form, searching ancestors
    fn get_serialized_value(
        &mut self,
        scope: &ExecutionId,
        name: &str,
    ) -> CaseResult<Option<SerializedValue>> {
        let mut current = scope.clone();
        loop {
            {
                let (store, ctx) = self.scope_access(&current)?;
                if let Some(record) = store.record(name) {
                    return record.to_serialized(&ctx).map(Some);
                }
            }
            match self.parent_scope(&current)? {
                Some(parent) => current = parent,
                None => return Ok(None),
            }
        }
    }

    /// Remove the nearest binding of `name`. Absent everywhere is a no-op.
    fn remove_variable(&mut self, scope: &ExecutionId, name: &str) -> CaseResult<bool> {
        let origin = scope.clone();
        let mut current = scope.clone();
        loop {
            {
                let (store, ctx) = self.scope_access(&current)?;
                if store.contains(name) {
                    return Ok(store.remove(name, &origin, ctx.blobs)?.is_some());
                }
            }
            match self.parent_scope(&current)? {
                Some(parent) => current = parent,
                None => return Ok(false),
            }
        }
    }

    fn remove_variable_local(&mut self, scope: &ExecutionId, name: &str) -> CaseResult<bool> {
        let (store, ctx) = self.scope_access(scope)?;
        Ok(store.remove(name, scope, ctx.blobs)?.is_some())
    }

    /// Values visible from `scope`, the most local binding winning.
    ///
    /// With `names` given, only those are collected and ancestors are not
    /// visited once all of them were found.
    fn get_variables(
        &mut self,
        scope: &ExecutionId,
        names: Option<&[&str]>,
    ) -> CaseResult<VariableMap> {
        let mut result = VariableMap::new();
        let mut current = Some(scope.clone());
        while let Some(id) = current {
            {
                let (store, ctx) = self.scope_access(&id)?;
                for name in store.names() {
                    let wanted = names.map_or(true, |n| n.contains(&name.as_str()));
                    if wanted && !result.contains_key(&name) {
                        if let Some(value) = store.get(&name, &ctx)? {
                            result.insert(name, value);
                        }
                    }
                }
            }
            if let Some(names) = names {
                if names.iter().all(|n| result.contains_key(*n)) {
                    break;
                }
            }
            current = self.parent_scope(&id)?;
        }
        Ok(result)
    }

    fn get_variables_local(&mut self, scope: &ExecutionId) -> CaseResult<VariableMap> {
        let (store, ctx) = self.scope_access(scope)?;
        store.values(&ctx)
    }

    fn has_variable(&mut self, scope: &ExecutionId, name: &str) -> CaseResult<bool> {
        let mut current = Some(scope.clone());
        while let Some(id) = current {
            if self.scope_access(&id)?.0.contains(name) {
                return Ok(true);
            }
            current = self.parent_scope(&id)?;
        }
        Ok(false)
    }

    fn has_variable_local(&mut self, scope: &ExecutionId, name: &str) -> CaseResult<bool> {
        Ok(self.scope_access(scope)?.0.contains(name))
    }

    /// Whether any scope in the chain holds a variable
    fn has_variables(&mut self, scope: &ExecutionId) -> CaseResult<bool> {
        let mut current = Some(scope.clone());
        while let Some(id) = current {
            if !self.scope_access(&id)?.0.is_empty() {
                return Ok(true);
            }
            current = self.parent_scope(&id)?;
        }
        Ok(false)
    }

    fn has_variables_local(&mut self, scope: &ExecutionId) -> CaseResult<bool> {
        Ok(!self.scope_access(scope)?.0.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryBlobs;
    use case_types::CaseError;
    use proptest::prelude::*;
    use std::collections::HashMap;

    /// A chain of scopes: scope i has parent i - 1
    struct Chain {
        ids: Vec<ExecutionId>,
        stores: HashMap<ExecutionId, VariableStore>,
        registry: SerializerRegistry,
        blobs: InMemoryBlobs,
        parent_lookups: usize,
    }

    impl Chain {
        fn new(depth: usize) -> Self {
            let ids: Vec<_> = (0..depth).map(|i| ExecutionId::new(format!("s{}", i))).collect();
            let stores = ids.iter().map(|id| (id.clone(), VariableStore::new())).collect();
            Self {
                ids,
                stores,
                registry: SerializerRegistry::with_defaults(),
                blobs: InMemoryBlobs::new(),
                parent_lookups: 0,
            }
        }

        fn id(&self, i: usize) -> ExecutionId {
            self.ids[i].clone()
        }
    }

    impl VariableScope for Chain {
        fn parent_scope(&mut self, scope: &ExecutionId) -> CaseResult<Option<ExecutionId>> {
            self.parent_lookups += 1;
            let index = self
                .ids
                .iter()
                .position(|id| id == scope)
                .ok_or_else(|| CaseError::ExecutionNotFound(scope.clone()))?;
            Ok(index.checked_sub(1).map(|p| self.ids[p].clone()))
        }

        fn scope_access(
            &mut self,
            scope: &ExecutionId,
        ) -> CaseResult<(&mut VariableStore, VariableContext<'_>)> {
            let store = self
                .stores
                .get_mut(scope)
                .ok_or_else(|| CaseError::ExecutionNotFound(scope.clone()))?;
            Ok((store, VariableContext::new(&self.registry, &mut self.blobs)))
        }
    }

    #[test]
    fn test_unknown_variable_lands_on_root() {
        let mut chain = Chain::new(3);
        let leaf = chain.id(2);
        chain.set_variable(&leaf, "x", TypedValue::from(1i32)).unwrap();

        assert!(chain.has_variable_local(&chain.id(0), "x").unwrap());
        assert!(!chain.has_variable_local(&leaf, "x").unwrap());
        assert_eq!(chain.get_variable(&leaf, "x").unwrap(), Some(TypedValue::from(1i32)));
    }

    #[test]
    fn test_known_variable_updated_where_it_lives() {
        let mut chain = Chain::new(3);
        let (mid, leaf) = (chain.id(1), chain.id(2));
        chain.set_variable_local(&mid, "x", TypedValue::from("mid")).unwrap();
        chain.set_variable(&leaf, "x", TypedValue::from("updated")).unwrap();

        assert_eq!(
            chain.get_variable_local(&mid, "x").unwrap(),
            Some(TypedValue::from("updated"))
        );
        assert!(!chain.has_variable_local(&chain.id(0), "x").unwrap());

        let events = chain.stores.get_mut(&mid).unwrap().drain_events();
        assert_eq!(events.last().unwrap().origin, leaf);
    }

    #[test]
    fn test_set_local_shadows_parent() {
        let mut chain = Chain::new(2);
        let (root, child) = (chain.id(0), chain.id(1));
        chain.set_variable(&root, "x", TypedValue::from(1i32)).unwrap();
        chain.set_variable_local(&child, "x", TypedValue::from(2i32)).unwrap();

        assert_eq!(chain.get_variable(&child, "x").unwrap(), Some(TypedValue::from(2i32)));
        assert_eq!(chain.get_variable(&root, "x").unwrap(), Some(TypedValue::from(1i32)));
    }

    #[test]
    fn test_remove_delegates_and_never_creates() {
        let mut chain = Chain::new(2);
        let (root, child) = (chain.id(0), chain.id(1));
        chain.set_variable(&root, "x", TypedValue::from(1i32)).unwrap();

        assert!(chain.remove_variable(&child, "x").unwrap());
        assert!(!chain.has_variables(&child).unwrap());
        assert!(!chain.remove_variable(&child, "x").unwrap());
        assert!(!chain.has_variables(&root).unwrap());
    }

    #[test]
    fn test_remove_local_ignores_parent() {
        let mut chain = Chain::new(2);
        let (root, child) = (chain.id(0), chain.id(1));
        chain.set_variable(&root, "x", TypedValue::from(1i32)).unwrap();
        assert!(!chain.remove_variable_local(&child, "x").unwrap());
        assert!(chain.has_variable(&child, "x").unwrap());
    }

    #[test]
    fn test_get_variables_most_local_wins() {
        let mut chain = Chain::new(2);
        let (root, child) = (chain.id(0), chain.id(1));
        chain.set_variable_local(&root, "a", TypedValue::from("root-a")).unwrap();
        chain.set_variable_local(&root, "b", TypedValue::from("root-b")).unwrap();
        chain.set_variable_local(&child, "a", TypedValue::from("child-a")).unwrap();

        let all = chain.get_variables(&child, None).unwrap();
        assert_eq!(all.get("a"), Some(&TypedValue::from("child-a")));
        assert_eq!(all.get("b"), Some(&TypedValue::from("root-b")));

        let local = chain.get_variables_local(&child).unwrap();
        assert_eq!(local.len(), 1);
    }

    #[test]
    fn test_get_variables_stops_when_all_found() {
        let mut chain = Chain::new(3);
        let leaf = chain.id(2);
        chain.set_variable_local(&leaf, "a", TypedValue::from(1i32)).unwrap();
        chain.parent_lookups = 0;

        let found = chain.get_variables(&leaf, Some(&["a"][..])).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(chain.parent_lookups, 0);

        chain.get_variables(&leaf, Some(&["a", "missing"][..])).unwrap();
        assert_eq!(chain.parent_lookups, 3);
    }

    #[test]
    fn test_has_variables_short_circuits() {
        let mut chain = Chain::new(3);
        let (mid, leaf) = (chain.id(1), chain.id(2));
        chain.set_variable_local(&mid, "m", TypedValue::from(true)).unwrap();
        chain.parent_lookups = 0;

        assert!(chain.has_variables(&leaf).unwrap());
        assert_eq!(chain.parent_lookups, 1);
        assert!(!chain.has_variables_local(&leaf).unwrap());
    }

    #[test]
    fn test_serialized_round_trip_through_chain() {
        let mut chain = Chain::new(2);
        let (root, child) = (chain.id(0), chain.id(1));
        let serialized = SerializedValue::new(br#"{"k":1}"#.to_vec(), "json");
        chain.set_variable_serialized(&child, "doc", &serialized).unwrap();

        assert!(chain.has_variable_local(&root, "doc").unwrap());
        let back = chain.get_serialized_value(&child, "doc").unwrap().unwrap();
        assert_eq!(back.bytes, serialized.bytes);
        assert_eq!(back.serializer_name, "json");
        assert!(chain.get_serialized_value(&child, "none").unwrap().is_none());
    }

    proptest! {
        #[test]
        fn prop_set_places_unknown_on_root(depth in 1usize..6, at in 0usize..6, value in any::<i64>()) {
            let mut chain = Chain::new(depth);
            let at = at % depth;
            let scope = chain.id(at);
            chain.set_variable(&scope, "v", TypedValue::from(value)).unwrap();

            for i in 0..depth {
                let id = chain.id(i);
                prop_assert_eq!(chain.has_variable_local(&id, "v").unwrap(), i == 0);
            }
            prop_assert_eq!(chain.get_variable(&scope, "v").unwrap(), Some(TypedValue::from(value)));
        }

        #[test]
        fn prop_set_local_does_not_leak_to_parent(value in any::<i32>()) {
            let mut chain = Chain::new(2);
            let (root, child) = (chain.id(0), chain.id(1));
            chain.set_variable_local(&child, "v", TypedValue::from(value)).unwrap();
            prop_assert_eq!(chain.get_variable(&child, "v").unwrap(), Some(TypedValue::from(value)));
            prop_assert_eq!(chain.get_variable(&root, "v").unwrap(), None);
        }
    }
}
