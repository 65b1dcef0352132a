//! Engine configuration

use case_types::{CaseError, CaseResult};
use serde::{Deserialize, Serialize};

/// How concurrent operations on one execution tree are kept apart
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    /// One exclusive lock per tree, held for a whole operation
    Pessimistic,
    /// No lock; a commit against a stale revision fails
    Optimistic,
}

/// Configuration for the case engine
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub concurrency: ConcurrencyMode,
    /// Deepest nesting of transitions one operation may trigger
    pub max_cascade_depth: usize,
    /// Record transitions and variable changes in the case history
    pub history_enabled: bool,
    /// Start with the default serializer set
    pub default_serializers: bool,
}

impl EngineConfig {
    /// Parse a configuration from TOML; missing keys keep their defaults
    pub fn from_toml_str(text: &str) -> CaseResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| CaseError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CaseResult<()> {
        if self.max_cascade_depth == 0 {
            return Err(CaseError::Configuration(
                "max_cascade_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: ConcurrencyMode::Pessimistic,
            max_cascade_depth: 64,
            history_enabled: true,
            default_serializers: true,
        }
    }
}
