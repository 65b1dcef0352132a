//! The execution tree of one operation
//!
//! An [`ExecutionTree`] is a unit of work over the case store: nodes are
//! loaded on first access and kept in an arena keyed by id, every change
//! stays in memory, and [`ExecutionTree::into_changes`] turns the session
//! into one [`ChangeSet`]. Dropping a tree discards its changes.

use crate::{CaseStore, ChangeSet, DefinitionProvider, ExecutionNode, HistoryRecord};
use case_types::{
    Activity, ActivityId, BlobId, CaseDefinition, CaseDefinitionId, CaseError, CaseResult,
    ExecutionId, ExecutionState, SentryDeclaration, SentryId, StandardEvent,
};
use case_variables::{BlobAccess, SerializerRegistry, VariableContext, VariableScope, VariableStore};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

// ── Blob Session ─────────────────────────────────────────────────────

/// Blob access that reads through to the store and buffers writes
struct BlobSession<'s> {
    store: &'s dyn CaseStore,
    inserted: BTreeMap<BlobId, Vec<u8>>,
    deleted: BTreeSet<BlobId>,
}

impl<'s> BlobSession<'s> {
    fn new(store: &'s dyn CaseStore) -> Self {
        Self {
            store,
            inserted: BTreeMap::new(),
            deleted: BTreeSet::new(),
        }
    }
}

impl BlobAccess for BlobSession<'_> {
    fn find_blob(&self, id: &BlobId) -> CaseResult<Option<Vec<u8>>> {
        if let Some(bytes) = self.inserted.get(id) {
            return Ok(Some(bytes.clone()));
        }
        if self.deleted.contains(id) {
            return Ok(None);
        }
        self.store.find_blob(id)
    }

    fn insert_blob(&mut self, id: BlobId, bytes: Vec<u8>) -> CaseResult<()> {
        self.inserted.insert(id, bytes);
        Ok(())
    }

    fn delete_blob(&mut self, id: &BlobId) -> CaseResult<()> {
        if self.inserted.remove(id).is_none() {
            self.deleted.insert(id.clone());
        }
        Ok(())
    }
}

// ── Execution Tree ───────────────────────────────────────────────────

/// Arena of execution nodes for one unit of work
pub struct ExecutionTree<'s> {
    store: &'s dyn CaseStore,
    definitions: &'s dyn DefinitionProvider,
    serializers: &'s SerializerRegistry,
    nodes: HashMap<ExecutionId, ExecutionNode>,
    children_loaded: HashSet<ExecutionId>,
    inserted: BTreeSet<ExecutionId>,
    dirty: BTreeSet<ExecutionId>,
    deleted: BTreeMap<ExecutionId, (ExecutionId, u64)>,
    activities: HashMap<(CaseDefinitionId, ActivityId), Activity>,
    blobs: BlobSession<'s>,
    history: Vec<HistoryRecord>,
}

impl<'s> ExecutionTree<'s> {
    pub fn new(
        store: &'s dyn CaseStore,
        definitions: &'s dyn DefinitionProvider,
        serializers: &'s SerializerRegistry,
    ) -> Self {
        Self {
            store,
            definitions,
            serializers,
            nodes: HashMap::new(),
            children_loaded: HashSet::new(),
            inserted: BTreeSet::new(),
            dirty: BTreeSet::new(),
            deleted: BTreeMap::new(),
            activities: HashMap::new(),
            blobs: BlobSession::new(store),
            history: Vec::new(),
        }
    }

    // ── Node Access ──────────────────────────────────────────────────

    fn ensure_loaded(&mut self, id: &ExecutionId) -> CaseResult<()> {
        if self.nodes.contains_key(id) {
            return Ok(());
        }
        if self.deleted.contains_key(id) {
            return Err(CaseError::ExecutionNotFound(id.clone()));
        }
        let mut node = self
            .store
            .find_execution(id)?
            .ok_or_else(|| CaseError::ExecutionNotFound(id.clone()))?;
        node.variables.invalidate_caches();
        tracing::trace!(execution_id = %id, "Execution loaded");
        self.nodes.insert(id.clone(), node);
        Ok(())
    }

    /// Whether `id` names a node that still exists
    pub fn contains(&mut self, id: &ExecutionId) -> CaseResult<bool> {
        match self.ensure_loaded(id) {
            Ok(()) => Ok(true),
            Err(CaseError::ExecutionNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn node(&mut self, id: &ExecutionId) -> CaseResult<&ExecutionNode> {
        self.ensure_loaded(id)?;
        self.nodes
            .get(id)
            .ok_or_else(|| CaseError::ExecutionNotFound(id.clone()))
    }

    /// Mutable access; marks the node for writing
    pub fn node_mut(&mut self, id: &ExecutionId) -> CaseResult<&mut ExecutionNode> {
        self.ensure_loaded(id)?;
        if !self.inserted.contains(id) {
            self.dirty.insert(id.clone());
        }
        self.nodes
            .get_mut(id)
            .ok_or_else(|| CaseError::ExecutionNotFound(id.clone()))
    }

    pub fn state(&mut self, id: &ExecutionId) -> CaseResult<ExecutionState> {
        Ok(self.node(id)?.state)
    }

    /// Live child ids of `id`, in creation order
    pub fn children(&mut self, id: &ExecutionId) -> CaseResult<Vec<ExecutionId>> {
        self.ensure_loaded(id)?;
        if !self.children_loaded.contains(id) && !self.inserted.contains(id) {
            for mut child in self.store.find_children(id)? {
                if !self.nodes.contains_key(&child.id) && !self.deleted.contains_key(&child.id) {
                    child.variables.invalidate_caches();
                    self.nodes.insert(child.id.clone(), child);
                }
            }
            self.children_loaded.insert(id.clone());
        }
        // A parent row read before a concurrent commit can list deleted children
        let mut live = Vec::new();
        for child in self.node(id)?.child_ids.clone() {
            if self.contains(&child)? {
                live.push(child);
            }
        }
        Ok(live)
    }

    /// Add a node created during this operation
    pub fn insert(&mut self, node: ExecutionNode) -> CaseResult<()> {
        if let Some(parent_id) = node.parent_id.clone() {
            self.node_mut(&parent_id)?.child_ids.push(node.id.clone());
        }
        self.inserted.insert(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Drop a node from the tree and schedule its row for deletion.
    ///
    /// Variable events it buffered are kept for the history; its local
    /// variables and their blobs are removed without further events.
    pub fn delete(&mut self, id: &ExecutionId) -> CaseResult<ExecutionNode> {
        self.ensure_loaded(id)?;
        let mut node = self
            .nodes
            .remove(id)
            .ok_or_else(|| CaseError::ExecutionNotFound(id.clone()))?;
        let case_instance_id = node.case_instance_id.clone();
        for event in node.variables.drain_events() {
            self.history
                .push(HistoryRecord::variable(case_instance_id.clone(), event));
        }
        node.variables.remove_all_silently(&mut self.blobs)?;
        node.sentry_parts.clear();

        if let Some(parent_id) = node.parent_id.clone() {
            if self.contains(&parent_id)? {
                self.node_mut(&parent_id)?.child_ids.retain(|c| c != id);
            }
        }

        self.dirty.remove(id);
        self.children_loaded.remove(id);
        if !self.inserted.remove(id) {
            self.deleted
                .insert(id.clone(), (node.case_instance_id.clone(), node.revision));
        }
        Ok(node)
    }

    /// Forget a clean node so the next access reloads it from the store.
    /// Returns false for nodes with pending changes.
    pub fn evict(&mut self, id: &ExecutionId) -> bool {
        if self.dirty.contains(id) || self.inserted.contains(id) {
            return false;
        }
        if self.nodes.get(id).is_some_and(|n| n.variables.is_modified()) {
            return false;
        }
        self.children_loaded.remove(id);
        self.nodes.remove(id).is_some()
    }

    pub fn is_loaded(&self, id: &ExecutionId) -> bool {
        self.nodes.contains_key(id)
    }

    // ── Definitions ──────────────────────────────────────────────────

    pub fn definition(&self, id: &CaseDefinitionId) -> CaseResult<Arc<CaseDefinition>> {
        self.definitions.definition(id)
    }

    /// Activity descriptor, resolved once per operation
    pub fn activity(
        &mut self,
        definition_id: &CaseDefinitionId,
        activity_id: &ActivityId,
    ) -> CaseResult<Activity> {
        let key = (definition_id.clone(), activity_id.clone());
        if let Some(activity) = self.activities.get(&key) {
            return Ok(activity.clone());
        }
        let activity = self.definitions.resolve_activity(definition_id, activity_id)?;
        self.activities.insert(key, activity.clone());
        Ok(activity)
    }

    /// Activity of node `id`
    pub fn activity_of(&mut self, id: &ExecutionId) -> CaseResult<Activity> {
        let node = self.node(id)?;
        let (definition_id, activity_id) =
            (node.case_definition_id.clone(), node.activity_id.clone());
        self.activity(&definition_id, &activity_id)
    }

    pub fn sentry(
        &self,
        definition_id: &CaseDefinitionId,
        sentry_id: &SentryId,
    ) -> CaseResult<SentryDeclaration> {
        self.definitions.resolve_sentry(definition_id, sentry_id)
    }

    // ── History ──────────────────────────────────────────────────────

    /// Log a transition of node `id`
    pub fn log_transition(
        &mut self,
        id: &ExecutionId,
        from: Option<ExecutionState>,
        event: StandardEvent,
    ) -> CaseResult<()> {
        let node = self.node(id)?;
        let record = HistoryRecord::transition(
            node.case_instance_id.clone(),
            node.id.clone(),
            node.activity_id.clone(),
            from,
            node.state,
            event,
        );
        tracing::debug!(
            execution_id = %id,
            activity = %node.activity_id,
            event = %event,
            state = %node.state,
            "Execution transitioned"
        );
        self.history.push(record);
        Ok(())
    }

    // ── Decode Failures ──────────────────────────────────────────────

    /// Decode failures captured in this session, as `(scope, name, message)`
    pub fn take_decode_failures(&mut self) -> Vec<(ExecutionId, String, String)> {
        let mut failures = Vec::new();
        for (id, node) in self.nodes.iter_mut() {
            for (name, message) in node.variables.take_decode_failures() {
                failures.push((id.clone(), name, message));
            }
        }
        failures
    }

    /// Record a decode failure seen by another session on the stored
    /// variable `name` of `scope`. Returns whether anything changed.
    pub fn capture_decode_failure(
        &mut self,
        scope: &ExecutionId,
        name: &str,
        message: String,
    ) -> CaseResult<bool> {
        if !self.contains(scope)? {
            return Ok(false);
        }
        let captured = self
            .nodes
            .get_mut(scope)
            .is_some_and(|node| node.variables.capture_decode_failure(name, message));
        if captured {
            tracing::debug!(execution_id = %scope, variable = name, "Decode failure captured");
        }
        Ok(captured)
    }

    // ── Commit ───────────────────────────────────────────────────────

    /// Turn the session into a change set plus the history it produced.
    ///
    /// The root of every touched tree is written too, so two operations on
    /// the same tree always conflict under optimistic locking.
    pub fn into_changes(mut self) -> CaseResult<(ChangeSet, Vec<HistoryRecord>)> {
        for (id, node) in self.nodes.iter() {
            if node.variables.is_modified() && !self.inserted.contains(id) {
                self.dirty.insert(id.clone());
            }
        }

        let mut roots: BTreeSet<ExecutionId> = BTreeSet::new();
        for id in self.dirty.iter().chain(self.inserted.iter()) {
            if let Some(node) = self.nodes.get(id) {
                roots.insert(node.case_instance_id.clone());
            }
        }
        roots.extend(self.deleted.values().map(|(root, _)| root.clone()));
        for root in roots {
            if !self.deleted.contains_key(&root) && !self.inserted.contains(&root) {
                self.node_mut(&root)?;
            }
        }

        let mut history = std::mem::take(&mut self.history);
        let mut changes = ChangeSet::default();

        for id in &self.inserted {
            if let Some(node) = self.nodes.get_mut(id) {
                drain_variable_events(&mut node.variables, &node.case_instance_id, &mut history);
                node.variables.mark_persisted();
                changes.inserts.push(node.clone());
            }
        }
        for id in &self.dirty {
            if let Some(node) = self.nodes.get_mut(id) {
                drain_variable_events(&mut node.variables, &node.case_instance_id, &mut history);
                node.variables.mark_persisted();
                changes.updates.push(node.clone());
            }
        }
        changes.deletes = self
            .deleted
            .iter()
            .map(|(id, (_, revision))| (id.clone(), *revision))
            .collect();
        changes.blob_inserts = std::mem::take(&mut self.blobs.inserted).into_iter().collect();
        changes.blob_deletes = std::mem::take(&mut self.blobs.deleted).into_iter().collect();

        Ok((changes, history))
    }
}

fn drain_variable_events(
    store: &mut VariableStore,
    case_instance_id: &ExecutionId,
    history: &mut Vec<HistoryRecord>,
) {
    for event in store.drain_events() {
        history.push(HistoryRecord::variable(case_instance_id.clone(), event));
    }
}

impl VariableScope for ExecutionTree<'_> {
    fn parent_scope(&mut self, scope: &ExecutionId) -> CaseResult<Option<ExecutionId>> {
        Ok(self.node(scope)?.parent_id.clone())
    }

    fn scope_access(
        &mut self,
        scope: &ExecutionId,
    ) -> CaseResult<(&mut VariableStore, VariableContext<'_>)> {
        self.ensure_loaded(scope)?;
        let node = self
            .nodes
            .get_mut(scope)
            .ok_or_else(|| CaseError::ExecutionNotFound(scope.clone()))?;
        Ok((
            &mut node.variables,
            VariableContext::new(self.serializers, &mut self.blobs),
        ))
    }
}
