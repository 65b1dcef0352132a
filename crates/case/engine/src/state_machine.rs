//! Lifecycle state machine for execution trees
//!
//! Every transition is applied to an [`ExecutionTree`] in memory. A
//! transition of a child is reported to its parent, which forwards it as a
//! signal to the sentries of the child's siblings and of itself; satisfied
//! sentries fire further transitions within the same call, depth first.
//!
//! Terminal nodes are removed from the tree at once, except the case
//! instance root, which stays queryable in its terminal state until closed.

use crate::{ExecutionNode, ExecutionTree, ExpressionEvaluator, SentryEvaluator};
use case_types::{
    Activity, ActivityId, CaseDefinition, CaseDefinitionId, CaseError, CaseResult, ExecutionId,
    ExecutionState, StandardEvent,
};
use case_variables::{VariableMap, VariableScope};
use std::collections::HashSet;
use std::sync::Arc;

/// Drives execution nodes through their lifecycle
#[derive(Debug)]
pub struct StateMachine {
    sentries: SentryEvaluator,
    max_cascade_depth: usize,
}

impl StateMachine {
    pub fn new(expressions: Arc<dyn ExpressionEvaluator>, max_cascade_depth: usize) -> Self {
        Self {
            sentries: SentryEvaluator::new(expressions),
            max_cascade_depth,
        }
    }

    pub fn sentries(&self) -> &SentryEvaluator {
        &self.sentries
    }

    // ── Operations ───────────────────────────────────────────────────

    /// Create and start a case instance of `definition_id`.
    ///
    /// `variables` are set locally on the new root before any child is
    /// created, so if-parts evaluated at creation already see them.
    pub fn create_case_instance(
        &self,
        tree: &mut ExecutionTree<'_>,
        definition_id: &CaseDefinitionId,
        variables: VariableMap,
    ) -> CaseResult<ExecutionId> {
        let definition = tree.definition(definition_id)?;
        let plan = definition
            .case_plan_activity()
            .cloned()
            .ok_or_else(|| CaseError::ActivityNotFound {
                definition: definition_id.clone(),
                activity: definition.case_plan.clone(),
            })?;

        let root = ExecutionNode::new_root(definition_id.clone(), &plan);
        let root_id = root.id.clone();
        tree.insert(root)?;
        tree.log_transition(&root_id, None, StandardEvent::Create)?;
        for (name, value) in variables {
            tree.set_variable_local(&root_id, &name, value)?;
        }

        tracing::info!(
            case_instance = %root_id,
            definition = %definition_id,
            "Case instance created"
        );

        self.transition(tree, &root_id, StandardEvent::Start)?;
        self.create_children(tree, &root_id, 0)?;
        Ok(root_id)
    }

    /// Create one more child of `parent_id` for `activity_id`, which must
    /// be a child activity of the parent's activity
    pub fn create_child(
        &self,
        tree: &mut ExecutionTree<'_>,
        parent_id: &ExecutionId,
        activity_id: &ActivityId,
    ) -> CaseResult<ExecutionId> {
        let parent_activity = tree.activity_of(parent_id)?;
        if !parent_activity.children.contains(activity_id) {
            return Err(reject(
                parent_id,
                format!(
                    "activity '{}' is not a child of '{}'",
                    activity_id, parent_activity.id
                ),
            ));
        }
        let state = tree.state(parent_id)?;
        if state != ExecutionState::Active {
            return Err(reject(
                parent_id,
                format!("cannot create a child of execution {} in state {}", parent_id, state),
            ));
        }

        let child_id = self.insert_child(tree, parent_id, activity_id)?;
        self.check_creation(tree, &child_id, 1)?;
        Ok(child_id)
    }

    /// Start an enabled node by hand
    pub fn manual_start(&self, tree: &mut ExecutionTree<'_>, id: &ExecutionId) -> CaseResult<()> {
        let state = tree.state(id)?;
        if state != ExecutionState::Enabled {
            let node = tree.node(id)?;
            let definition_id = node.case_definition_id.clone();
            let activity_id = node.activity_id.clone();
            let definition = tree.definition(&definition_id)?;
            if let Some(cycle) = entry_cycle(&definition, &activity_id) {
                let path: Vec<&str> = cycle.iter().map(|a| a.as_str()).collect();
                return Err(reject(
                    id,
                    format!(
                        "execution {} can never be enabled: cyclic entry dependency {}",
                        id,
                        path.join(" -> ")
                    ),
                ));
            }
            return Err(reject(
                id,
                format!("cannot start execution {} in state {}, it must be enabled", id, state),
            ));
        }
        if let Some(parent_id) = tree.node(id)?.parent_id.clone() {
            let parent_state = tree.state(&parent_id)?;
            if parent_state != ExecutionState::Active {
                return Err(reject(
                    id,
                    format!("cannot start execution {}: parent is {}", id, parent_state),
                ));
            }
        }
        self.start_node(tree, id, StandardEvent::ManualStart, 0)
    }

    /// Complete an active node
    pub fn complete(&self, tree: &mut ExecutionTree<'_>, id: &ExecutionId) -> CaseResult<()> {
        let state = tree.state(id)?;
        if state != ExecutionState::Active {
            return Err(reject(
                id,
                format!("cannot complete execution {} in state {}", id, state),
            ));
        }
        self.complete_node(tree, id, 0)
    }

    /// Terminate an active node and its subtree
    pub fn terminate(&self, tree: &mut ExecutionTree<'_>, id: &ExecutionId) -> CaseResult<()> {
        self.exit_node(tree, id, StandardEvent::Terminate, 0)
    }

    /// Exit a node in any non-terminal state, and its subtree
    pub fn exit(&self, tree: &mut ExecutionTree<'_>, id: &ExecutionId) -> CaseResult<()> {
        self.exit_node(tree, id, StandardEvent::Exit, 0)
    }

    /// Suspend an active node; active descendants are suspended with it
    pub fn suspend(&self, tree: &mut ExecutionTree<'_>, id: &ExecutionId) -> CaseResult<()> {
        self.transition(tree, id, StandardEvent::Suspend)?;
        self.suspend_descendants(tree, id)?;
        tracing::info!(execution_id = %id, "Execution suspended");
        self.notify_parent(tree, id, StandardEvent::Suspend, 0)
    }

    /// Resume a suspended node and the descendants suspended with it
    pub fn resume(&self, tree: &mut ExecutionTree<'_>, id: &ExecutionId) -> CaseResult<()> {
        if tree.node(id)?.parent_suspended {
            return Err(reject(
                id,
                format!("execution {} was suspended with its parent; resume the parent", id),
            ));
        }
        self.transition(tree, id, StandardEvent::Resume)?;
        self.resume_descendants(tree, id)?;
        tracing::info!(execution_id = %id, "Execution resumed");
        self.notify_parent(tree, id, StandardEvent::Resume, 0)
    }

    /// Disable an available or enabled node
    pub fn disable(&self, tree: &mut ExecutionTree<'_>, id: &ExecutionId) -> CaseResult<()> {
        self.transition(tree, id, StandardEvent::Disable)?;
        let parent_id = tree.node(id)?.parent_id.clone();
        self.notify_parent(tree, id, StandardEvent::Disable, 0)?;
        if let Some(parent_id) = parent_id {
            self.check_auto_complete(tree, &parent_id, 1)?;
        }
        Ok(())
    }

    /// Enable a disabled node again
    pub fn reenable(&self, tree: &mut ExecutionTree<'_>, id: &ExecutionId) -> CaseResult<()> {
        self.transition(tree, id, StandardEvent::Reenable)?;
        self.notify_parent(tree, id, StandardEvent::Reenable, 0)
    }

    /// Remove a finished case instance with everything left in its tree
    pub fn close(&self, tree: &mut ExecutionTree<'_>, root_id: &ExecutionId) -> CaseResult<()> {
        let node = tree.node(root_id)?;
        if !node.is_root() {
            return Err(reject(
                root_id,
                format!("execution {} is not a case instance", root_id),
            ));
        }
        if !node.is_terminal() {
            let state = node.state;
            return Err(reject(
                root_id,
                format!("cannot close case instance {} in state {}", root_id, state),
            ));
        }
        self.remove_node(tree, root_id)?;
        tracing::info!(case_instance = %root_id, "Case instance closed");
        Ok(())
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Apply `event` to node `id` and log it. Returns the previous state.
    fn transition(
        &self,
        tree: &mut ExecutionTree<'_>,
        id: &ExecutionId,
        event: StandardEvent,
    ) -> CaseResult<ExecutionState> {
        let target = event.target_state();
        let node = tree.node_mut(id)?;
        let from = node.state;
        let allowed = match event {
            StandardEvent::Exit | StandardEvent::ParentTerminate => !from.is_terminal(),
            StandardEvent::Occur => {
                matches!(from, ExecutionState::Available | ExecutionState::Enabled)
            }
            StandardEvent::Enable => from == ExecutionState::Available,
            StandardEvent::Reenable => from == ExecutionState::Disabled,
            StandardEvent::Resume | StandardEvent::ParentResume => {
                from == ExecutionState::Suspended
            }
            _ => from.can_transition_to(target),
        };
        if !allowed {
            return Err(reject(
                id,
                format!("cannot {} execution {} in state {}", event, id, from),
            ));
        }
        node.set_state(target);
        tree.log_transition(id, Some(from), event)?;
        Ok(from)
    }

    fn guard_depth(&self, id: &ExecutionId, depth: usize) -> CaseResult<()> {
        if depth > self.max_cascade_depth {
            tracing::warn!(
                execution_id = %id,
                max_depth = self.max_cascade_depth,
                "Cascade depth exceeded"
            );
            return Err(CaseError::CascadeDepthExceeded(self.max_cascade_depth));
        }
        Ok(())
    }

    fn start_node(
        &self,
        tree: &mut ExecutionTree<'_>,
        id: &ExecutionId,
        event: StandardEvent,
        depth: usize,
    ) -> CaseResult<()> {
        self.transition(tree, id, event)?;
        tracing::info!(execution_id = %id, %event, "Execution started");
        self.notify_parent(tree, id, event, depth)?;

        if tree.contains(id)?
            && tree.state(id)? == ExecutionState::Active
            && tree.activity_of(id)?.is_container()
        {
            self.create_children(tree, id, depth + 1)?;
        }
        Ok(())
    }

    fn complete_node(
        &self,
        tree: &mut ExecutionTree<'_>,
        id: &ExecutionId,
        depth: usize,
    ) -> CaseResult<()> {
        self.guard_depth(id, depth)?;
        let activity = tree.activity_of(id)?;
        if activity.is_container() {
            let children = tree.children(id)?;
            for child in &children {
                let state = tree.state(child)?;
                if matches!(state, ExecutionState::Active | ExecutionState::Suspended) {
                    return Err(reject(
                        id,
                        format!(
                            "cannot complete execution {}: child {} is {}",
                            id, child, state
                        ),
                    ));
                }
            }
            for child in &children {
                if tree.contains(child)? && !tree.node(child)?.is_terminal() {
                    self.terminate_subtree(tree, child)?;
                }
            }
        }

        self.transition(tree, id, StandardEvent::Complete)?;
        tracing::info!(execution_id = %id, activity = %activity.id, "Execution completed");
        self.finish(tree, id, StandardEvent::Complete, depth)
    }

    fn exit_node(
        &self,
        tree: &mut ExecutionTree<'_>,
        id: &ExecutionId,
        event: StandardEvent,
        depth: usize,
    ) -> CaseResult<()> {
        self.guard_depth(id, depth)?;
        self.transition(tree, id, event)?;
        for child in tree.children(id)? {
            if tree.contains(&child)? && !tree.node(&child)?.is_terminal() {
                self.terminate_subtree(tree, &child)?;
            }
        }
        tracing::info!(execution_id = %id, %event, "Execution terminated");
        self.finish(tree, id, event, depth)
    }

    /// `ParentTerminate` a node below a terminating ancestor, bottom-up,
    /// and remove it
    fn terminate_subtree(&self, tree: &mut ExecutionTree<'_>, id: &ExecutionId) -> CaseResult<()> {
        for child in tree.children(id)? {
            if tree.contains(&child)? && !tree.node(&child)?.is_terminal() {
                self.terminate_subtree(tree, &child)?;
            }
        }
        self.transition(tree, id, StandardEvent::ParentTerminate)?;
        self.remove_node(tree, id)
    }

    fn occur(&self, tree: &mut ExecutionTree<'_>, id: &ExecutionId, depth: usize) -> CaseResult<()> {
        self.transition(tree, id, StandardEvent::Occur)?;
        tracing::info!(execution_id = %id, "Milestone occurred");
        self.finish(tree, id, StandardEvent::Occur, depth)
    }

    /// Epilogue of a node that reached a terminal state
    fn finish(
        &self,
        tree: &mut ExecutionTree<'_>,
        id: &ExecutionId,
        event: StandardEvent,
        depth: usize,
    ) -> CaseResult<()> {
        let node = tree.node(id)?;
        let Some(parent_id) = node.parent_id.clone() else {
            tracing::info!(case_instance = %id, state = %node.state, "Case instance finished");
            return Ok(());
        };
        let activity_id = node.activity_id.clone();

        self.remove_node(tree, id)?;
        self.handle_child_transition(tree, &parent_id, &activity_id, id, event, depth + 1)?;
        self.check_auto_complete(tree, &parent_id, depth + 1)
    }

    fn suspend_descendants(&self, tree: &mut ExecutionTree<'_>, id: &ExecutionId) -> CaseResult<()> {
        for child in tree.children(id)? {
            if tree.state(&child)? == ExecutionState::Active {
                self.transition(tree, &child, StandardEvent::ParentSuspend)?;
                tree.node_mut(&child)?.parent_suspended = true;
                self.suspend_descendants(tree, &child)?;
            }
        }
        Ok(())
    }

    fn resume_descendants(&self, tree: &mut ExecutionTree<'_>, id: &ExecutionId) -> CaseResult<()> {
        for child in tree.children(id)? {
            if tree.node(&child)?.parent_suspended {
                self.transition(tree, &child, StandardEvent::ParentResume)?;
                tree.node_mut(&child)?.parent_suspended = false;
                self.resume_descendants(tree, &child)?;
            }
        }
        Ok(())
    }

    /// Drop node `id` and its subtree from the tree
    fn remove_node(&self, tree: &mut ExecutionTree<'_>, id: &ExecutionId) -> CaseResult<()> {
        for child in tree.children(id)? {
            self.remove_node(tree, &child)?;
        }
        tree.delete(id)?;
        Ok(())
    }

    // ── Creation ─────────────────────────────────────────────────────

    fn insert_child(
        &self,
        tree: &mut ExecutionTree<'_>,
        parent_id: &ExecutionId,
        activity_id: &ActivityId,
    ) -> CaseResult<ExecutionId> {
        let definition_id = tree.node(parent_id)?.case_definition_id.clone();
        let activity = tree.activity(&definition_id, activity_id)?;
        let child = ExecutionNode::new_child(tree.node(parent_id)?, &activity);
        let child_id = child.id.clone();
        tree.insert(child)?;
        tree.log_transition(&child_id, None, StandardEvent::Create)?;
        Ok(child_id)
    }

    /// Create one child per child activity of container `parent_id`, then
    /// let each child react to its entry and exit criteria
    fn create_children(
        &self,
        tree: &mut ExecutionTree<'_>,
        parent_id: &ExecutionId,
        depth: usize,
    ) -> CaseResult<()> {
        self.guard_depth(parent_id, depth)?;
        let activity = tree.activity_of(parent_id)?;
        let mut created = Vec::with_capacity(activity.children.len());
        for child_activity in &activity.children {
            created.push(self.insert_child(tree, parent_id, child_activity)?);
        }
        tracing::debug!(
            execution_id = %parent_id,
            children = created.len(),
            "Children created"
        );

        for child_id in &created {
            if tree.contains(child_id)? && tree.state(child_id)? == ExecutionState::Available {
                self.check_creation(tree, child_id, depth + 1)?;
            }
        }
        self.check_auto_complete(tree, parent_id, depth + 1)
    }

    /// Exit criteria first, then entry criteria, of a node just created
    fn check_creation(
        &self,
        tree: &mut ExecutionTree<'_>,
        id: &ExecutionId,
        depth: usize,
    ) -> CaseResult<()> {
        let activity = tree.activity_of(id)?;
        let definition_id = tree.node(id)?.case_definition_id.clone();

        for sentry_id in &activity.exit_criteria {
            let sentry = tree.sentry(&definition_id, sentry_id)?;
            if self.sentries.is_satisfied_at_creation(tree, id, &sentry, true)? {
                tracing::debug!(execution_id = %id, sentry = %sentry_id, "Exit criterion holds at creation");
                return self.exit_node(tree, id, StandardEvent::Exit, depth);
            }
        }

        let mut enter = activity.entry_criteria.is_empty();
        for sentry_id in &activity.entry_criteria {
            let sentry = tree.sentry(&definition_id, sentry_id)?;
            if self.sentries.is_satisfied_at_creation(tree, id, &sentry, false)? {
                enter = true;
                break;
            }
        }
        if enter {
            self.fire_entry(tree, id, &activity, depth)?;
        }
        Ok(())
    }

    /// React to satisfied entry criteria
    fn fire_entry(
        &self,
        tree: &mut ExecutionTree<'_>,
        id: &ExecutionId,
        activity: &Activity,
        depth: usize,
    ) -> CaseResult<()> {
        if activity.is_milestone() {
            self.occur(tree, id, depth)
        } else if activity.auto_start {
            self.start_node(tree, id, StandardEvent::Start, depth)
        } else {
            self.transition(tree, id, StandardEvent::Enable)?;
            tracing::debug!(execution_id = %id, "Execution enabled");
            self.notify_parent(tree, id, StandardEvent::Enable, depth)
        }
    }

    // ── Propagation ──────────────────────────────────────────────────

    fn notify_parent(
        &self,
        tree: &mut ExecutionTree<'_>,
        id: &ExecutionId,
        event: StandardEvent,
        depth: usize,
    ) -> CaseResult<()> {
        let node = tree.node(id)?;
        let Some(parent_id) = node.parent_id.clone() else {
            return Ok(());
        };
        let activity_id = node.activity_id.clone();
        self.handle_child_transition(tree, &parent_id, &activity_id, id, event, depth + 1)
    }

    /// Forward `event` of a child of `parent_id` to the sentries of the
    /// child's siblings and of the parent, then fire what became satisfied.
    ///
    /// Signals are recorded even while the parent is not active; sentries
    /// only fire inside an active parent.
    pub fn handle_child_transition(
        &self,
        tree: &mut ExecutionTree<'_>,
        parent_id: &ExecutionId,
        source_activity: &ActivityId,
        source_execution: &ExecutionId,
        event: StandardEvent,
        depth: usize,
    ) -> CaseResult<()> {
        self.guard_depth(parent_id, depth)?;
        if !tree.contains(parent_id)? {
            return Ok(());
        }
        let mut candidates: Vec<ExecutionId> = tree
            .children(parent_id)?
            .into_iter()
            .filter(|c| c != source_execution)
            .collect();
        candidates.push(parent_id.clone());

        for candidate in &candidates {
            if !self.is_live(tree, candidate)? {
                continue;
            }
            let activity = tree.activity_of(candidate)?;
            let definition_id = tree.node(candidate)?.case_definition_id.clone();
            for sentry_id in activity.entry_criteria.iter().chain(&activity.exit_criteria) {
                let sentry = tree.sentry(&definition_id, sentry_id)?;
                self.sentries.record_signal(
                    tree,
                    candidate,
                    &sentry,
                    source_activity,
                    source_execution,
                    event,
                )?;
            }
        }

        if tree.state(parent_id)? != ExecutionState::Active {
            return Ok(());
        }
        tracing::debug!(
            execution_id = %parent_id,
            source = %source_activity,
            %event,
            candidates = candidates.len(),
            "Propagating child transition"
        );

        for candidate in &candidates {
            if !self.is_live(tree, candidate)? {
                continue;
            }
            let activity = tree.activity_of(candidate)?;
            let definition_id = tree.node(candidate)?.case_definition_id.clone();

            let mut exited = false;
            for sentry_id in &activity.exit_criteria {
                let sentry = tree.sentry(&definition_id, sentry_id)?;
                if self.sentries.is_satisfied(tree, candidate, &sentry)? {
                    self.sentries.reset_after_firing(tree, candidate, sentry_id)?;
                    tracing::debug!(execution_id = %candidate, sentry = %sentry_id, "Exit criterion satisfied");
                    self.exit_node(tree, candidate, StandardEvent::Exit, depth + 1)?;
                    exited = true;
                    break;
                }
            }
            if exited || candidate == parent_id {
                continue;
            }
            if tree.state(candidate)? != ExecutionState::Available {
                continue;
            }
            for sentry_id in &activity.entry_criteria {
                let sentry = tree.sentry(&definition_id, sentry_id)?;
                if self.sentries.is_satisfied(tree, candidate, &sentry)? {
                    self.sentries.reset_after_firing(tree, candidate, sentry_id)?;
                    tracing::debug!(execution_id = %candidate, sentry = %sentry_id, "Entry criterion satisfied");
                    self.fire_entry(tree, candidate, &activity, depth + 1)?;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Complete an active auto-completing container once none of its
    /// children is left, disabled ones aside
    fn check_auto_complete(
        &self,
        tree: &mut ExecutionTree<'_>,
        id: &ExecutionId,
        depth: usize,
    ) -> CaseResult<()> {
        if !tree.contains(id)? || tree.state(id)? != ExecutionState::Active {
            return Ok(());
        }
        let activity = tree.activity_of(id)?;
        if !activity.is_container() || !activity.auto_complete {
            return Ok(());
        }
        for child in tree.children(id)? {
            if tree.state(&child)? != ExecutionState::Disabled {
                return Ok(());
            }
        }
        tracing::debug!(execution_id = %id, "Auto-completing container");
        self.complete_node(tree, id, depth)
    }

    fn is_live(&self, tree: &mut ExecutionTree<'_>, id: &ExecutionId) -> CaseResult<bool> {
        Ok(tree.contains(id)? && !tree.node(id)?.is_terminal())
    }
}

fn reject(id: &ExecutionId, reason: String) -> CaseError {
    tracing::warn!(execution_id = %id, %reason, "Operation rejected");
    CaseError::not_allowed(reason)
}

/// Activities whose events the entry criteria of `activity_id` wait for
fn entry_sources(definition: &CaseDefinition, activity_id: &ActivityId) -> Vec<ActivityId> {
    let Some(activity) = definition.activity(activity_id) else {
        return Vec::new();
    };
    activity
        .entry_criteria
        .iter()
        .filter_map(|s| definition.sentry(s))
        .flat_map(|s| s.on_parts.iter().map(|p| p.source.clone()))
        .collect()
}

/// A path of entry dependencies leading from `start` back to itself
pub(crate) fn entry_cycle(definition: &CaseDefinition, start: &ActivityId) -> Option<Vec<ActivityId>> {
    let mut visited = HashSet::new();
    let mut stack = vec![vec![start.clone()]];
    while let Some(path) = stack.pop() {
        let Some(current) = path.last() else {
            continue;
        };
        for source in entry_sources(definition, current) {
            if &source == start {
                let mut cycle = path.clone();
                cycle.push(source);
                return Some(cycle);
            }
            if visited.insert(source.clone()) {
                let mut next = path.clone();
                next.push(source);
                stack.push(next);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CaseStore, ConditionEvaluator, DefinitionRegistry, InMemoryCaseStore};
    use case_types::SentryDeclaration;
    use case_variables::SerializerRegistry;

    fn machine() -> StateMachine {
        StateMachine::new(Arc::new(ConditionEvaluator::new()), 64)
    }

    fn sequential() -> CaseDefinition {
        let mut def = CaseDefinition::new("seq", "Sequential");
        def.add_sentry(SentryDeclaration::new("after_a").on("a", StandardEvent::Complete))
            .unwrap();
        def.add_to_plan(Activity::task("a", "A").auto_start()).unwrap();
        def.add_to_plan(Activity::task("b", "B").with_entry_criterion("after_a"))
            .unwrap();
        def
    }

    fn find(tree: &mut ExecutionTree<'_>, root: &ExecutionId, activity: &str) -> Option<ExecutionId> {
        let children = tree.children(root).unwrap();
        children
            .into_iter()
            .find(|c| tree.node(c).unwrap().activity_id.as_str() == activity)
    }

    #[test]
    fn test_create_and_cascade_in_one_session() {
        let mut registry = DefinitionRegistry::new();
        let def_id = registry.deploy(sequential()).unwrap();
        let store = InMemoryCaseStore::new();
        let serializers = SerializerRegistry::with_defaults();
        let machine = machine();

        let mut tree = ExecutionTree::new(&store, &registry, &serializers);
        let root = machine
            .create_case_instance(&mut tree, &def_id, VariableMap::new())
            .unwrap();
        assert_eq!(tree.state(&root).unwrap(), ExecutionState::Active);

        let a = find(&mut tree, &root, "a").unwrap();
        let b = find(&mut tree, &root, "b").unwrap();
        assert_eq!(tree.state(&a).unwrap(), ExecutionState::Active);
        assert_eq!(tree.state(&b).unwrap(), ExecutionState::Available);

        machine.complete(&mut tree, &a).unwrap();
        assert!(!tree.contains(&a).unwrap());
        assert_eq!(tree.state(&b).unwrap(), ExecutionState::Enabled);

        machine.manual_start(&mut tree, &b).unwrap();
        machine.complete(&mut tree, &b).unwrap();
        assert_eq!(tree.state(&root).unwrap(), ExecutionState::Completed);

        let (changes, history) = tree.into_changes().unwrap();
        store.commit(changes).unwrap();
        assert_eq!(store.execution_count().unwrap(), 1);
        assert!(history.len() >= 8);
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut registry = DefinitionRegistry::new();
        let def_id = registry.deploy(sequential()).unwrap();
        let store = InMemoryCaseStore::new();
        let serializers = SerializerRegistry::with_defaults();
        let machine = machine();
        let mut tree = ExecutionTree::new(&store, &registry, &serializers);
        let root = machine
            .create_case_instance(&mut tree, &def_id, VariableMap::new())
            .unwrap();
        let b = find(&mut tree, &root, "b").unwrap();

        assert!(machine.complete(&mut tree, &b).unwrap_err().is_not_allowed());
        assert!(machine.terminate(&mut tree, &b).unwrap_err().is_not_allowed());
        assert!(machine.resume(&mut tree, &b).unwrap_err().is_not_allowed());
        assert!(machine.reenable(&mut tree, &b).unwrap_err().is_not_allowed());
        assert!(machine.close(&mut tree, &root).unwrap_err().is_not_allowed());
        assert!(machine.close(&mut tree, &b).unwrap_err().is_not_allowed());
    }

    #[test]
    fn test_entry_cycle_detection() {
        let mut def = CaseDefinition::new("cycle", "Cycle");
        def.add_sentry(SentryDeclaration::new("after_a").on("a", StandardEvent::Complete))
            .unwrap();
        def.add_sentry(SentryDeclaration::new("after_b").on("b", StandardEvent::Complete))
            .unwrap();
        def.add_to_plan(Activity::task("a", "A").with_entry_criterion("after_b"))
            .unwrap();
        def.add_to_plan(Activity::task("b", "B").with_entry_criterion("after_a"))
            .unwrap();
        def.add_to_plan(Activity::task("c", "C").with_entry_criterion("after_a"))
            .unwrap();

        let cycle = entry_cycle(&def, &ActivityId::new("a")).unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 3);
        assert!(entry_cycle(&def, &ActivityId::new("b")).is_some());
        assert!(entry_cycle(&def, &ActivityId::new("c")).is_none());
    }

    #[test]
    fn test_depth_limit() {
        let mut def = CaseDefinition::new("deep", "Deep");
        def.add_to_plan(Activity::stage("s1", "S1").auto_start()).unwrap();
        def.add_to_stage(&ActivityId::new("s1"), Activity::stage("s2", "S2").auto_start())
            .unwrap();
        def.add_to_stage(&ActivityId::new("s2"), Activity::task("t", "T"))
            .unwrap();
        let mut registry = DefinitionRegistry::new();
        let def_id = registry.deploy(def).unwrap();
        let store = InMemoryCaseStore::new();
        let serializers = SerializerRegistry::with_defaults();

        let shallow = StateMachine::new(Arc::new(ConditionEvaluator::new()), 2);
        let mut tree = ExecutionTree::new(&store, &registry, &serializers);
        let err = shallow
            .create_case_instance(&mut tree, &def_id, VariableMap::new())
            .unwrap_err();
        assert!(matches!(err, CaseError::CascadeDepthExceeded(2)));
    }
}
