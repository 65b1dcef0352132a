//! Execution lifecycle: states and the standard events emitted by transitions

use serde::{Deserialize, Serialize};

/// Lifecycle state of an execution node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Created, waiting for an entry sentry
    Available,
    /// Entry criteria met, waiting for a manual start
    Enabled,
    /// Switched off by a caller; can be re-enabled
    Disabled,
    /// Work in progress
    Active,
    /// Paused while active
    Suspended,
    /// Finished normally (terminal)
    Completed,
    /// Exited or terminated (terminal)
    Terminated,
}

impl ExecutionState {
    /// Whether the lifecycle allows moving from `self` to `target`.
    ///
    /// Milestone occurrence (Available -> Completed) is not part of this
    /// table; the state machine handles it for milestones only.
    pub fn can_transition_to(&self, target: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, target),
            (Available, Enabled)
                | (Available, Disabled)
                | (Available, Active)
                | (Enabled, Active)
                | (Enabled, Disabled)
                | (Disabled, Enabled)
                | (Active, Completed)
                | (Active, Terminated)
                | (Active, Suspended)
                | (Suspended, Active)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Terminated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named lifecycle transition, observable by sentry on-parts
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StandardEvent {
    Create,
    Enable,
    Disable,
    Reenable,
    Start,
    ManualStart,
    Complete,
    Occur,
    Exit,
    Terminate,
    ParentTerminate,
    Suspend,
    ParentSuspend,
    Resume,
    ParentResume,
}

impl StandardEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Reenable => "reenable",
            Self::Start => "start",
            Self::ManualStart => "manualStart",
            Self::Complete => "complete",
            Self::Occur => "occur",
            Self::Exit => "exit",
            Self::Terminate => "terminate",
            Self::ParentTerminate => "parentTerminate",
            Self::Suspend => "suspend",
            Self::ParentSuspend => "parentSuspend",
            Self::Resume => "resume",
            Self::ParentResume => "parentResume",
        }
    }

    /// The state a node is in once this event has been applied
    pub fn target_state(&self) -> ExecutionState {
        match self {
            Self::Create => ExecutionState::Available,
            Self::Enable | Self::Reenable => ExecutionState::Enabled,
            Self::Disable => ExecutionState::Disabled,
            Self::Start | Self::ManualStart | Self::Resume | Self::ParentResume => {
                ExecutionState::Active
            }
            Self::Complete | Self::Occur => ExecutionState::Completed,
            Self::Exit | Self::Terminate | Self::ParentTerminate => ExecutionState::Terminated,
            Self::Suspend | Self::ParentSuspend => ExecutionState::Suspended,
        }
    }
}

impl std::fmt::Display for StandardEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StandardEvent {
    type Err = crate::CaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let event = match s {
            "create" => Self::Create,
            "enable" => Self::Enable,
            "disable" => Self::Disable,
            "reenable" => Self::Reenable,
            "start" => Self::Start,
            "manualStart" => Self::ManualStart,
            "complete" => Self::Complete,
            "occur" => Self::Occur,
            "exit" => Self::Exit,
            "terminate" => Self::Terminate,
            "parentTerminate" => Self::ParentTerminate,
            "suspend" => Self::Suspend,
            "parentSuspend" => Self::ParentSuspend,
            "resume" => Self::Resume,
            "parentResume" => Self::ParentResume,
            other => {
                return Err(crate::CaseError::Validation(format!(
                    "unknown standard event '{}'",
                    other
                )))
            }
        };
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ExecutionState::*;

    #[test]
    fn test_lifecycle_table() {
        assert!(Available.can_transition_to(Enabled));
        assert!(Available.can_transition_to(Active));
        assert!(Enabled.can_transition_to(Active));
        assert!(Disabled.can_transition_to(Enabled));
        assert!(Active.can_transition_to(Suspended));
        assert!(Suspended.can_transition_to(Active));

        assert!(!Available.can_transition_to(Completed));
        assert!(!Enabled.can_transition_to(Completed));
        assert!(!Disabled.can_transition_to(Active));
        assert!(!Completed.can_transition_to(Active));
        assert!(!Terminated.can_transition_to(Enabled));
    }

    #[test]
    fn test_terminal_states() {
        assert!(Completed.is_terminal());
        assert!(Terminated.is_terminal());
        assert!(!Suspended.is_terminal());
    }

    #[test]
    fn test_event_names_parse_back() {
        for event in [
            StandardEvent::Complete,
            StandardEvent::ManualStart,
            StandardEvent::ParentTerminate,
            StandardEvent::Occur,
        ] {
            assert_eq!(event.as_str().parse::<StandardEvent>().unwrap(), event);
        }
        assert!("explode".parse::<StandardEvent>().is_err());
    }

    #[test]
    fn test_event_target_state() {
        assert_eq!(StandardEvent::Exit.target_state(), Terminated);
        assert_eq!(StandardEvent::ManualStart.target_state(), Active);
        assert_eq!(StandardEvent::Occur.target_state(), Completed);
    }
}
