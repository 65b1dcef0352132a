//! Case history: an ordered record of everything that happened to a case
//!
//! Records are collected while an operation runs and handed over only once
//! its changes are committed, so rolled-back work never shows up here.

use case_types::{ActivityId, ExecutionId, ExecutionState, StandardEvent};
use case_variables::{VariableEvent, VariableEventKind};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// History of all case instances, keyed by case instance id
#[derive(Debug, Default)]
pub struct CaseHistory {
    records: DashMap<ExecutionId, Vec<HistoryRecord>>,
}

impl CaseHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: HistoryRecord) {
        tracing::trace!(
            case_instance = %record.case_instance_id,
            event = %record.event_type,
            "History recorded"
        );
        self.records
            .entry(record.case_instance_id.clone())
            .or_default()
            .push(record);
    }

    pub fn record_all(&self, records: impl IntoIterator<Item = HistoryRecord>) {
        for record in records {
            self.record(record);
        }
    }

    // ── Query methods ────────────────────────────────────────────────

    /// All records of a case instance, oldest first
    pub fn records_for(&self, case_instance_id: &ExecutionId) -> Vec<HistoryRecord> {
        self.records
            .get(case_instance_id)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    /// Records about one execution
    pub fn records_for_execution(
        &self,
        case_instance_id: &ExecutionId,
        execution_id: &ExecutionId,
    ) -> Vec<HistoryRecord> {
        self.records_for(case_instance_id)
            .into_iter()
            .filter(|r| &r.execution_id == execution_id)
            .collect()
    }

    /// Standard events fired for activity `activity_id`, in order
    pub fn events_of_activity(
        &self,
        case_instance_id: &ExecutionId,
        activity_id: &ActivityId,
    ) -> Vec<StandardEvent> {
        self.records_for(case_instance_id)
            .into_iter()
            .filter_map(|r| match r.event_type {
                HistoryEventType::Transition {
                    activity_id: a,
                    event,
                    ..
                } if &a == activity_id => Some(event),
                _ => None,
            })
            .collect()
    }

    pub fn record_count(&self, case_instance_id: &ExecutionId) -> usize {
        self.records
            .get(case_instance_id)
            .map(|r| r.len())
            .unwrap_or(0)
    }

    pub fn clear(&self, case_instance_id: &ExecutionId) {
        self.records.remove(case_instance_id);
    }
}

/// One entry of a case's history
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub case_instance_id: ExecutionId,
    pub execution_id: ExecutionId,
    pub event_type: HistoryEventType,
    pub timestamp: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn transition(
        case_instance_id: ExecutionId,
        execution_id: ExecutionId,
        activity_id: ActivityId,
        from: Option<ExecutionState>,
        to: ExecutionState,
        event: StandardEvent,
    ) -> Self {
        Self {
            case_instance_id,
            execution_id,
            event_type: HistoryEventType::Transition {
                activity_id,
                from,
                to,
                event,
            },
            timestamp: Utc::now(),
        }
    }

    pub fn variable(case_instance_id: ExecutionId, event: VariableEvent) -> Self {
        Self {
            case_instance_id,
            execution_id: event.scope.clone(),
            event_type: HistoryEventType::Variable {
                name: event.name,
                kind: event.kind,
                origin: event.origin,
            },
            timestamp: Utc::now(),
        }
    }
}

/// Types of history events
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEventType {
    /// An execution changed state
    Transition {
        activity_id: ActivityId,
        from: Option<ExecutionState>,
        to: ExecutionState,
        event: StandardEvent,
    },
    /// A variable was created, updated or deleted
    Variable {
        name: String,
        kind: VariableEventKind,
        origin: ExecutionId,
    },
}

impl std::fmt::Display for HistoryEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transition {
                activity_id, event, ..
            } => write!(f, "{}:{}", event, activity_id),
            Self::Variable { name, kind, .. } => write!(f, "variable_{:?}:{}", kind, name),
        }
    }
}
