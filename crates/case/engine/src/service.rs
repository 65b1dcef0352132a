//! Case service: the entry point of the case engine
//!
//! Every mutating call is one unit of work. The service resolves the case
//! instance the target node belongs to, serializes work on that tree
//! (per-tree lock, or revision checks in optimistic mode), runs the whole
//! cascade on an [`ExecutionTree`] and commits its [`ChangeSet`] once.
//! A failing call commits nothing.

use crate::{
    CaseHistory, CaseStore, ConcurrencyMode, ConditionEvaluator, DefinitionRegistry,
    EngineConfig, ExecutionNode, ExecutionTree, ExpressionEvaluator, HistoryRecord,
    InMemoryCaseStore, StateMachine, TreeLocks,
};
use case_types::{
    ActivityId, CaseDefinition, CaseDefinitionId, CaseError, CaseResult, ExecutionId,
    SerializedValue, TypedValue,
};
use case_variables::{SerializerRegistry, ValueSerializer, VariableMap, VariableScope};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, RwLock};

/// The case engine facade
pub struct CaseService {
    config: EngineConfig,
    store: Arc<dyn CaseStore>,
    definitions: RwLock<DefinitionRegistry>,
    serializers: RwLock<SerializerRegistry>,
    machine: StateMachine,
    locks: TreeLocks,
    history: CaseHistory,
}

impl CaseService {
    /// A service over an in-memory store
    pub fn new(config: EngineConfig) -> CaseResult<Self> {
        Self::with_store(config, Arc::new(InMemoryCaseStore::new()))
    }

    pub fn with_store(config: EngineConfig, store: Arc<dyn CaseStore>) -> CaseResult<Self> {
        Self::with_parts(config, store, Arc::new(ConditionEvaluator::new()))
    }

    /// A service with a custom if-part evaluator
    pub fn with_parts(
        config: EngineConfig,
        store: Arc<dyn CaseStore>,
        expressions: Arc<dyn ExpressionEvaluator>,
    ) -> CaseResult<Self> {
        config.validate()?;
        let serializers = if config.default_serializers {
            SerializerRegistry::with_defaults()
        } else {
            SerializerRegistry::new()
        };
        tracing::info!(
            concurrency = ?config.concurrency,
            max_cascade_depth = config.max_cascade_depth,
            serializers = serializers.len(),
            "Case service created"
        );
        Ok(Self {
            machine: StateMachine::new(expressions, config.max_cascade_depth),
            config,
            store,
            definitions: RwLock::new(DefinitionRegistry::new()),
            serializers: RwLock::new(serializers),
            locks: TreeLocks::new(),
            history: CaseHistory::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Definitions and serializers ──────────────────────────────────

    /// Deploy a definition as the next version of its key
    pub fn deploy(&self, definition: CaseDefinition) -> CaseResult<CaseDefinitionId> {
        self.definitions
            .write()
            .map_err(|_| CaseError::LockPoisoned)?
            .deploy(definition)
    }

    pub fn definition(&self, id: &CaseDefinitionId) -> CaseResult<Arc<CaseDefinition>> {
        self.definitions
            .read()
            .map_err(|_| CaseError::LockPoisoned)?
            .get(id)
    }

    /// Register a serializer at `index`; a serializer of the same name is
    /// replaced
    pub fn register_serializer(
        &self,
        serializer: Arc<dyn ValueSerializer>,
        index: usize,
    ) -> CaseResult<()> {
        let name = serializer.name().to_string();
        self.serializers
            .write()
            .map_err(|_| CaseError::LockPoisoned)?
            .register(serializer, index);
        tracing::info!(serializer = %name, index, "Serializer registered");
        Ok(())
    }

    pub fn remove_serializer(&self, name: &str) -> CaseResult<bool> {
        Ok(self
            .serializers
            .write()
            .map_err(|_| CaseError::LockPoisoned)?
            .remove(name)
            .is_some())
    }

    pub fn serializer_names(&self) -> CaseResult<Vec<String>> {
        Ok(self
            .serializers
            .read()
            .map_err(|_| CaseError::LockPoisoned)?
            .names()
            .into_iter()
            .map(String::from)
            .collect())
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start a case instance; returns the id of its root
    pub fn create_case_instance(
        &self,
        definition_id: &CaseDefinitionId,
        variables: VariableMap,
    ) -> CaseResult<ExecutionId> {
        self.session("create_case_instance", |machine, tree| {
            machine.create_case_instance(tree, definition_id, variables)
        })
    }

    /// Start a case instance of the latest version deployed under `key`
    pub fn create_case_instance_by_key(
        &self,
        key: &str,
        variables: VariableMap,
    ) -> CaseResult<ExecutionId> {
        let definition_id = self
            .definitions
            .read()
            .map_err(|_| CaseError::LockPoisoned)?
            .latest_by_key(key)
            .map(|d| d.id.clone())
            .ok_or_else(|| CaseError::DefinitionNotFound(CaseDefinitionId::new(key)))?;
        self.create_case_instance(&definition_id, variables)
    }

    /// Create another child of `parent_id` for `activity_id`
    pub fn create_child(
        &self,
        parent_id: &ExecutionId,
        activity_id: &ActivityId,
    ) -> CaseResult<ExecutionId> {
        self.operation(parent_id, "create_child", |machine, tree| {
            machine.create_child(tree, parent_id, activity_id)
        })
    }

    pub fn manual_start(&self, id: &ExecutionId) -> CaseResult<()> {
        self.operation(id, "manual_start", |machine, tree| machine.manual_start(tree, id))
    }

    pub fn complete(&self, id: &ExecutionId) -> CaseResult<()> {
        self.operation(id, "complete", |machine, tree| machine.complete(tree, id))
    }

    pub fn exit(&self, id: &ExecutionId) -> CaseResult<()> {
        self.operation(id, "exit", |machine, tree| machine.exit(tree, id))
    }

    pub fn terminate(&self, id: &ExecutionId) -> CaseResult<()> {
        self.operation(id, "terminate", |machine, tree| machine.terminate(tree, id))
    }

    pub fn suspend(&self, id: &ExecutionId) -> CaseResult<()> {
        self.operation(id, "suspend", |machine, tree| machine.suspend(tree, id))
    }

    pub fn resume(&self, id: &ExecutionId) -> CaseResult<()> {
        self.operation(id, "resume", |machine, tree| machine.resume(tree, id))
    }

    pub fn disable(&self, id: &ExecutionId) -> CaseResult<()> {
        self.operation(id, "disable", |machine, tree| machine.disable(tree, id))
    }

    pub fn reenable(&self, id: &ExecutionId) -> CaseResult<()> {
        self.operation(id, "reenable", |machine, tree| machine.reenable(tree, id))
    }

    /// Remove a finished case instance and everything left in its tree
    pub fn close(&self, case_instance_id: &ExecutionId) -> CaseResult<()> {
        self.operation(case_instance_id, "close", |machine, tree| {
            machine.close(tree, case_instance_id)
        })?;
        self.locks.release(case_instance_id);
        Ok(())
    }

    // ── Cross-tree links ─────────────────────────────────────────────

    /// Link a sub case instance to the execution that spawned it, in both
    /// directions
    pub fn link_sub_case(
        &self,
        super_execution_id: &ExecutionId,
        sub_case_instance_id: &ExecutionId,
    ) -> CaseResult<()> {
        let super_root = self.case_instance_of(super_execution_id)?;
        let sub_root = self.case_instance_of(sub_case_instance_id)?;
        if &sub_root != sub_case_instance_id {
            return Err(CaseError::not_allowed(format!(
                "execution {} is not a case instance",
                sub_case_instance_id
            )));
        }
        if super_root == sub_root {
            return Err(CaseError::not_allowed(format!(
                "case instance {} cannot be its own sub case",
                sub_root
            )));
        }
        self.locked(&[&super_root, &sub_root], "link_sub_case", |_, tree| {
            tree.node_mut(super_execution_id)?.sub_case_instance_id =
                Some(sub_case_instance_id.clone());
            tree.node_mut(sub_case_instance_id)?.super_execution_id =
                Some(super_execution_id.clone());
            tracing::info!(
                execution_id = %super_execution_id,
                sub_case = %sub_case_instance_id,
                "Sub case linked"
            );
            Ok(())
        })
    }

    /// Record the process instance started by `execution_id`
    pub fn link_sub_process(
        &self,
        execution_id: &ExecutionId,
        process_instance_id: &str,
    ) -> CaseResult<()> {
        self.operation(execution_id, "link_sub_process", |_, tree| {
            tree.node_mut(execution_id)?.sub_process_instance_id =
                Some(process_instance_id.to_string());
            Ok(())
        })
    }

    // ── Variables ────────────────────────────────────────────────────

    /// Value of `name` visible from `id`
    pub fn get_variable(&self, id: &ExecutionId, name: &str) -> CaseResult<Option<TypedValue>> {
        self.read(id, |tree| tree.get_variable(id, name))
    }

    pub fn get_variable_local(
        &self,
        id: &ExecutionId,
        name: &str,
    ) -> CaseResult<Option<TypedValue>> {
        self.read(id, |tree| tree.get_variable_local(id, name))
    }

    /// Values visible from `id`; all of them, or only `names`
    pub fn get_variables(&self, id: &ExecutionId, names: Option<&[&str]>) -> CaseResult<VariableMap> {
        self.read(id, |tree| tree.get_variables(id, names))
    }

    pub fn get_variables_local(&self, id: &ExecutionId) -> CaseResult<VariableMap> {
        self.read(id, |tree| tree.get_variables_local(id))
    }

    pub fn has_variable(&self, id: &ExecutionId, name: &str) -> CaseResult<bool> {
        self.read(id, |tree| tree.has_variable(id, name))
    }

    pub fn has_variable_local(&self, id: &ExecutionId, name: &str) -> CaseResult<bool> {
        self.read(id, |tree| tree.has_variable_local(id, name))
    }

    pub fn has_variables(&self, id: &ExecutionId) -> CaseResult<bool> {
        self.read(id, |tree| tree.has_variables(id))
    }

    /// Update `name` where it lives, or create it on the case instance
    pub fn set_variable(
        &self,
        id: &ExecutionId,
        name: &str,
        value: impl Into<TypedValue>,
    ) -> CaseResult<TypedValue> {
        let value = value.into();
        self.operation(id, "set_variable", |_, tree| tree.set_variable(id, name, value))
    }

    pub fn set_variable_local(
        &self,
        id: &ExecutionId,
        name: &str,
        value: impl Into<TypedValue>,
    ) -> CaseResult<TypedValue> {
        let value = value.into();
        self.operation(id, "set_variable_local", |_, tree| {
            tree.set_variable_local(id, name, value)
        })
    }

    /// Several [`set_variable`](Self::set_variable) calls as one unit
    pub fn set_variables(&self, id: &ExecutionId, variables: VariableMap) -> CaseResult<()> {
        self.operation(id, "set_variables", |_, tree| {
            for (name, value) in variables {
                tree.set_variable(id, &name, value)?;
            }
            Ok(())
        })
    }

    pub fn remove_variable(&self, id: &ExecutionId, name: &str) -> CaseResult<bool> {
        self.operation(id, "remove_variable", |_, tree| tree.remove_variable(id, name))
    }

    pub fn remove_variable_local(&self, id: &ExecutionId, name: &str) -> CaseResult<bool> {
        self.operation(id, "remove_variable_local", |_, tree| {
            tree.remove_variable_local(id, name)
        })
    }

    /// The stored form of `name`, without decoding it
    pub fn get_serialized_value(
        &self,
        id: &ExecutionId,
        name: &str,
    ) -> CaseResult<Option<SerializedValue>> {
        self.read(id, |tree| tree.get_serialized_value(id, name))
    }

    /// Write `name` from its serialized form.
    ///
    /// The serializer name is checked before anything is loaded or
    /// written, so an unknown serializer leaves every scope untouched.
    pub fn set_variable_from_serialized(
        &self,
        id: &ExecutionId,
        name: &str,
        bytes: Vec<u8>,
        serializer_name: &str,
        config: BTreeMap<String, String>,
    ) -> CaseResult<TypedValue> {
        self.serializers
            .read()
            .map_err(|_| CaseError::LockPoisoned)?
            .by_name(serializer_name)?;
        let mut serialized = SerializedValue::new(bytes, serializer_name);
        serialized.config = config;
        self.operation(id, "set_variable_from_serialized", |_, tree| {
            tree.set_variable_serialized(id, name, &serialized)
        })
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn get_execution(&self, id: &ExecutionId) -> CaseResult<ExecutionNode> {
        self.store
            .find_execution(id)?
            .ok_or_else(|| CaseError::ExecutionNotFound(id.clone()))
    }

    /// Children of `id` in creation order
    pub fn children(&self, id: &ExecutionId) -> CaseResult<Vec<ExecutionNode>> {
        let parent = self.get_execution(id)?;
        let mut children = self.store.find_children(id)?;
        children.sort_by_key(|c| {
            parent
                .child_ids
                .iter()
                .position(|i| i == &c.id)
                .unwrap_or(usize::MAX)
        });
        Ok(children)
    }

    /// Nodes of `activity_id` in the tree of `case_instance_id`,
    /// breadth first
    pub fn find_executions(
        &self,
        case_instance_id: &ExecutionId,
        activity_id: &ActivityId,
    ) -> CaseResult<Vec<ExecutionNode>> {
        let mut found = Vec::new();
        let mut queue = VecDeque::from([self.get_execution(case_instance_id)?]);
        while let Some(node) = queue.pop_front() {
            queue.extend(self.children(&node.id)?);
            if &node.activity_id == activity_id {
                found.push(node);
            }
        }
        Ok(found)
    }

    /// Committed history of a case instance, oldest first
    pub fn history(&self, case_instance_id: &ExecutionId) -> Vec<HistoryRecord> {
        self.history.records_for(case_instance_id)
    }

    pub fn case_history(&self) -> &CaseHistory {
        &self.history
    }

    // ── Units of work ────────────────────────────────────────────────

    fn case_instance_of(&self, id: &ExecutionId) -> CaseResult<ExecutionId> {
        Ok(self.get_execution(id)?.case_instance_id)
    }

    /// Run `work` on the tree holding `target`
    fn operation<T>(
        &self,
        target: &ExecutionId,
        name: &'static str,
        work: impl FnOnce(&StateMachine, &mut ExecutionTree<'_>) -> CaseResult<T>,
    ) -> CaseResult<T> {
        let root = self.case_instance_of(target)?;
        self.locked(&[&root], name, work)
    }

    /// Run `work` while holding the locks of `roots`
    fn locked<T>(
        &self,
        roots: &[&ExecutionId],
        name: &'static str,
        work: impl FnOnce(&StateMachine, &mut ExecutionTree<'_>) -> CaseResult<T>,
    ) -> CaseResult<T> {
        let handles = match self.config.concurrency {
            ConcurrencyMode::Pessimistic => self.locks.handles(roots),
            ConcurrencyMode::Optimistic => Vec::new(),
        };
        let _guards = handles
            .iter()
            .map(|m| m.lock().map_err(|_| CaseError::LockPoisoned))
            .collect::<CaseResult<Vec<_>>>()?;
        self.session(name, work)
    }

    /// One unit of work: build a tree, run `work`, commit once.
    ///
    /// A failed operation commits nothing, except that variables which
    /// failed to decode keep the failure so it is reported only once.
    fn session<T>(
        &self,
        name: &'static str,
        work: impl FnOnce(&StateMachine, &mut ExecutionTree<'_>) -> CaseResult<T>,
    ) -> CaseResult<T> {
        let definitions = self.definitions.read().map_err(|_| CaseError::LockPoisoned)?;
        let serializers = self.serializers.read().map_err(|_| CaseError::LockPoisoned)?;
        let mut tree = ExecutionTree::new(self.store.as_ref(), &*definitions, &*serializers);

        let result = match work(&self.machine, &mut tree) {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!(operation = name, error = %e, "Operation rolled back");
                if let CaseError::Decode { .. } = e {
                    let failures = tree.take_decode_failures();
                    drop(tree);
                    let mut capture =
                        ExecutionTree::new(self.store.as_ref(), &*definitions, &*serializers);
                    for (scope, variable, message) in failures {
                        capture.capture_decode_failure(&scope, &variable, message)?;
                    }
                    if let Err(commit_error) = self.commit("capture_decode_error", capture) {
                        tracing::warn!(
                            operation = name,
                            error = %commit_error,
                            "Decode failure could not be persisted"
                        );
                    }
                }
                return Err(e);
            }
        };
        self.commit(name, tree)?;
        Ok(result)
    }

    /// Run a read on the tree holding `target`.
    ///
    /// Reads change nothing, with one exception: a variable that fails to
    /// decode keeps that failure, so the capture is committed before the
    /// error is returned.
    fn read<T>(
        &self,
        target: &ExecutionId,
        work: impl FnOnce(&mut ExecutionTree<'_>) -> CaseResult<T>,
    ) -> CaseResult<T> {
        let root = self.case_instance_of(target)?;
        let handles = match self.config.concurrency {
            ConcurrencyMode::Pessimistic => self.locks.handles(&[&root]),
            ConcurrencyMode::Optimistic => Vec::new(),
        };
        let _guards = handles
            .iter()
            .map(|m| m.lock().map_err(|_| CaseError::LockPoisoned))
            .collect::<CaseResult<Vec<_>>>()?;

        let definitions = self.definitions.read().map_err(|_| CaseError::LockPoisoned)?;
        let serializers = self.serializers.read().map_err(|_| CaseError::LockPoisoned)?;
        let mut tree = ExecutionTree::new(self.store.as_ref(), &*definitions, &*serializers);
        match work(&mut tree) {
            Err(e @ CaseError::Decode { .. }) => {
                self.commit("capture_decode_error", tree)?;
                Err(e)
            }
            other => other,
        }
    }

    fn commit(&self, name: &'static str, tree: ExecutionTree<'_>) -> CaseResult<()> {
        let (changes, records) = tree.into_changes()?;
        if !changes.is_empty() {
            let (inserts, updates, deletes) =
                (changes.inserts.len(), changes.updates.len(), changes.deletes.len());
            if let Err(e) = self.store.commit(changes) {
                if matches!(e, CaseError::ConcurrentModification(_)) {
                    tracing::warn!(operation = name, error = %e, "Commit conflicted");
                }
                return Err(e);
            }
            tracing::debug!(operation = name, inserts, updates, deletes, "Changes committed");
        }
        if self.config.history_enabled {
            self.history.record_all(records);
        }
        Ok(())
    }
}

impl std::fmt::Debug for CaseService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaseService")
            .field("config", &self.config)
            .field("trees_locked", &self.locks.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use case_types::{Activity, ExecutionState, SentryDeclaration, StandardEvent};

    fn service() -> CaseService {
        CaseService::new(EngineConfig::default()).unwrap()
    }

    fn review_definition() -> CaseDefinition {
        let mut def = CaseDefinition::new("review", "Review");
        def.add_sentry(SentryDeclaration::new("drafted").on("draft", StandardEvent::Complete))
            .unwrap();
        def.add_to_plan(Activity::task("draft", "Draft").auto_start())
            .unwrap();
        def.add_to_plan(Activity::task("review", "Review").with_entry_criterion("drafted"))
            .unwrap();
        def
    }

    fn child_of(service: &CaseService, root: &ExecutionId, activity: &str) -> ExecutionNode {
        service
            .find_executions(root, &ActivityId::new(activity))
            .unwrap()
            .into_iter()
            .next()
            .unwrap()
    }

    #[test]
    fn test_create_by_key_uses_latest_version() {
        let service = service();
        service.deploy(review_definition()).unwrap();
        let v2 = service.deploy(review_definition()).unwrap();
        let root = service
            .create_case_instance_by_key("review", VariableMap::new())
            .unwrap();
        assert_eq!(service.get_execution(&root).unwrap().case_definition_id, v2);

        let err = service
            .create_case_instance_by_key("missing", VariableMap::new())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_lifecycle_through_service() {
        let service = service();
        let def = service.deploy(review_definition()).unwrap();
        let root = service.create_case_instance(&def, VariableMap::new()).unwrap();

        let children = service.children(&root).unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].activity_id.as_str(), "draft");

        let draft = child_of(&service, &root, "draft");
        service.complete(&draft.id).unwrap();
        let review = child_of(&service, &root, "review");
        assert_eq!(review.state, ExecutionState::Enabled);

        service.manual_start(&review.id).unwrap();
        service.complete(&review.id).unwrap();
        assert_eq!(
            service.get_execution(&root).unwrap().state,
            ExecutionState::Completed
        );

        service.close(&root).unwrap();
        assert!(service.get_execution(&root).unwrap_err().is_not_found());
        assert!(!service.history(&root).is_empty());
    }

    #[test]
    fn test_variables_through_service() {
        let service = service();
        let def = service.deploy(review_definition()).unwrap();
        let root = service.create_case_instance(&def, VariableMap::new()).unwrap();
        let draft = child_of(&service, &root, "draft");

        service.set_variable(&draft.id, "title", "Quarterly").unwrap();
        assert!(service.has_variable_local(&root, "title").unwrap());
        assert!(!service.has_variable_local(&draft.id, "title").unwrap());

        service.set_variable_local(&draft.id, "title", "Draft title").unwrap();
        let title = service.get_variable(&draft.id, "title").unwrap().unwrap();
        assert_eq!(title.value.as_str(), Some("Draft title"));

        let serialized = service.get_serialized_value(&root, "title").unwrap().unwrap();
        assert_eq!(serialized.serializer_name, "string");

        assert!(service.remove_variable(&draft.id, "title").unwrap());
        let title = service.get_variable(&draft.id, "title").unwrap().unwrap();
        assert_eq!(title.value.as_str(), Some("Quarterly"));
    }

    #[test]
    fn test_link_sub_case() {
        let service = service();
        let def = service.deploy(review_definition()).unwrap();
        let parent = service.create_case_instance(&def, VariableMap::new()).unwrap();
        let sub = service.create_case_instance(&def, VariableMap::new()).unwrap();
        let draft = child_of(&service, &parent, "draft");

        service.link_sub_case(&draft.id, &sub).unwrap();
        assert_eq!(
            service.get_execution(&draft.id).unwrap().sub_case_instance_id,
            Some(sub.clone())
        );
        assert_eq!(
            service.get_execution(&sub).unwrap().super_execution_id,
            Some(draft.id.clone())
        );

        assert!(service.link_sub_case(&draft.id, &parent).unwrap_err().is_not_allowed());

        service.link_sub_process(&draft.id, "process-7").unwrap();
        assert_eq!(
            service
                .get_execution(&draft.id)
                .unwrap()
                .sub_process_instance_id
                .as_deref(),
            Some("process-7")
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            max_cascade_depth: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            CaseService::new(config),
            Err(CaseError::Configuration(_))
        ));
    }
}
