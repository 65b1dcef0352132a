//! Execution nodes: the persisted rows of an execution tree

use case_types::{
    Activity, ActivityId, CaseDefinitionId, ExecutionId, ExecutionState, SentryId, StandardEvent,
};
use case_variables::VariableStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observed on-part of a sentry, tracked on the node owning the sentry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentryPart {
    pub sentry_id: SentryId,
    pub source_activity_id: ActivityId,
    pub source_execution_id: ExecutionId,
    pub event: StandardEvent,
}

/// One instance of an activity in a running case.
///
/// Links to other nodes are ids only; the [`ExecutionTree`](crate::ExecutionTree)
/// resolves them. The root node is the case instance: its
/// `case_instance_id` is its own id and it has no parent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionNode {
    pub id: ExecutionId,
    /// Optimistic-lock revision of the persisted row
    pub revision: u64,
    pub case_definition_id: CaseDefinitionId,
    pub activity_id: ActivityId,
    pub activity_name: String,
    pub case_instance_id: ExecutionId,
    pub parent_id: Option<ExecutionId>,
    /// Children in creation order
    #[serde(default)]
    pub child_ids: Vec<ExecutionId>,
    pub state: ExecutionState,
    pub previous_state: Option<ExecutionState>,
    /// Suspended as part of a parent's suspension
    #[serde(default)]
    pub parent_suspended: bool,
    pub sub_process_instance_id: Option<String>,
    pub sub_case_instance_id: Option<ExecutionId>,
    pub super_execution_id: Option<ExecutionId>,
    #[serde(default)]
    pub variables: VariableStore,
    #[serde(default)]
    pub sentry_parts: Vec<SentryPart>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionNode {
    /// A case instance for `case_plan`
    pub fn new_root(case_definition_id: CaseDefinitionId, case_plan: &Activity) -> Self {
        let id = ExecutionId::generate();
        let now = Utc::now();
        Self {
            case_instance_id: id.clone(),
            id,
            revision: 0,
            case_definition_id,
            activity_id: case_plan.id.clone(),
            activity_name: case_plan.name.clone(),
            parent_id: None,
            child_ids: Vec::new(),
            state: ExecutionState::Available,
            previous_state: None,
            parent_suspended: false,
            sub_process_instance_id: None,
            sub_case_instance_id: None,
            super_execution_id: None,
            variables: VariableStore::new(),
            sentry_parts: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A child of `parent`; inherits the case instance and definition
    pub fn new_child(parent: &ExecutionNode, activity: &Activity) -> Self {
        let mut node = Self::new_root(parent.case_definition_id.clone(), activity);
        node.case_instance_id = parent.case_instance_id.clone();
        node.parent_id = Some(parent.id.clone());
        node
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Observed parts of one sentry
    pub fn parts_of<'a>(&'a self, sentry_id: &'a SentryId) -> impl Iterator<Item = &'a SentryPart> {
        self.sentry_parts
            .iter()
            .filter(move |p| &p.sentry_id == sentry_id)
    }

    pub(crate) fn set_state(&mut self, state: ExecutionState) {
        self.previous_state = Some(self.state);
        self.state = state;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_references_itself() {
        let plan = Activity::case_plan("plan", "Plan");
        let root = ExecutionNode::new_root(CaseDefinitionId::new("d:1"), &plan);
        assert!(root.is_root());
        assert_eq!(root.case_instance_id, root.id);
        assert_eq!(root.state, ExecutionState::Available);
    }

    #[test]
    fn test_child_inherits_instance() {
        let plan = Activity::case_plan("plan", "Plan");
        let root = ExecutionNode::new_root(CaseDefinitionId::new("d:1"), &plan);
        let child = ExecutionNode::new_child(&root, &Activity::task("t", "Task"));

        assert_eq!(child.case_instance_id, root.id);
        assert_eq!(child.parent_id.as_ref(), Some(&root.id));
        assert_eq!(child.case_definition_id, root.case_definition_id);
        assert_ne!(child.id, root.id);
        assert!(!child.is_root());
    }

    #[test]
    fn test_set_state_keeps_previous() {
        let plan = Activity::case_plan("plan", "Plan");
        let mut root = ExecutionNode::new_root(CaseDefinitionId::new("d:1"), &plan);
        root.set_state(ExecutionState::Active);
        root.set_state(ExecutionState::Suspended);
        assert_eq!(root.previous_state, Some(ExecutionState::Active));
        assert!(!root.is_terminal());
    }

    #[test]
    fn test_row_serializes() {
        let plan = Activity::case_plan("plan", "Plan");
        let root = ExecutionNode::new_root(CaseDefinitionId::new("d:1"), &plan);
        let json = serde_json::to_string(&root).unwrap();
        let back: ExecutionNode = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, root.id);
        assert_eq!(back.state, root.state);
    }
}
