//! Error types for the case engine

use crate::{ActivityId, CaseDefinitionId, ExecutionId, SentryId};

/// Errors that can occur in case operations
#[derive(Debug, thiserror::Error)]
pub enum CaseError {
    #[error("Case execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    #[error("Case definition not found: {0}")]
    DefinitionNotFound(CaseDefinitionId),

    #[error("Activity '{activity}' not found in definition {definition}")]
    ActivityNotFound {
        definition: CaseDefinitionId,
        activity: ActivityId,
    },

    #[error("Sentry '{sentry}' not found in definition {definition}")]
    SentryNotFound {
        definition: CaseDefinitionId,
        sentry: SentryId,
    },

    #[error("Variable not found: {0}")]
    VariableNotFound(String),

    #[error("Not allowed: {0}")]
    NotAllowed(String),

    #[error("No serializer found for value: {0}")]
    NoSerializerFound(String),

    #[error("Unknown serializer: {0}")]
    UnknownSerializer(String),

    #[error("Cannot deserialize variable '{variable}': {message}")]
    Decode { variable: String, message: String },

    #[error("Cannot serialize variable '{variable}': {message}")]
    Encode { variable: String, message: String },

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("Cascade exceeded the maximum depth of {0}")]
    CascadeDepthExceeded(usize),

    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Lock poisoned")]
    LockPoisoned,
}

impl CaseError {
    /// True for every member of the not-found family
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ExecutionNotFound(_)
                | Self::DefinitionNotFound(_)
                | Self::ActivityNotFound { .. }
                | Self::SentryNotFound { .. }
                | Self::VariableNotFound(_)
        )
    }

    pub fn is_not_allowed(&self) -> bool {
        matches!(self, Self::NotAllowed(_))
    }

    pub fn not_allowed(reason: impl Into<String>) -> Self {
        Self::NotAllowed(reason.into())
    }

    /// Attach a variable name to a decode/encode error raised by a serializer
    pub fn with_variable(self, name: &str) -> Self {
        match self {
            Self::Decode { message, .. } => Self::Decode {
                variable: name.to_string(),
                message,
            },
            Self::Encode { message, .. } => Self::Encode {
                variable: name.to_string(),
                message,
            },
            other => other,
        }
    }
}

/// Result type alias for case operations
pub type CaseResult<T> = Result<T, CaseError>;
