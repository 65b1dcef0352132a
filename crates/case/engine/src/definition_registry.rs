//! Definition registry: stores and resolves deployed case definitions
//!
//! Definitions are immutable once deployed. Deploying a definition whose
//! key is already known creates the next version; the registry keeps all
//! versions so running cases keep resolving the version they started on.

use case_types::{
    Activity, ActivityId, CaseDefinition, CaseDefinitionId, CaseError, CaseResult,
    SentryDeclaration, SentryId,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Read access to case models, as the execution tree needs it
pub trait DefinitionProvider: Send + Sync {
    fn definition(&self, id: &CaseDefinitionId) -> CaseResult<Arc<CaseDefinition>>;

    fn resolve_activity(
        &self,
        definition_id: &CaseDefinitionId,
        activity_id: &ActivityId,
    ) -> CaseResult<Activity> {
        let definition = self.definition(definition_id)?;
        definition
            .activity(activity_id)
            .cloned()
            .ok_or_else(|| CaseError::ActivityNotFound {
                definition: definition_id.clone(),
                activity: activity_id.clone(),
            })
    }

    fn resolve_sentry(
        &self,
        definition_id: &CaseDefinitionId,
        sentry_id: &SentryId,
    ) -> CaseResult<SentryDeclaration> {
        let definition = self.definition(definition_id)?;
        definition
            .sentry(sentry_id)
            .cloned()
            .ok_or_else(|| CaseError::SentryNotFound {
                definition: definition_id.clone(),
                sentry: sentry_id.clone(),
            })
    }
}

/// Registry of case definitions
#[derive(Clone, Debug, Default)]
pub struct DefinitionRegistry {
    /// All deployed definitions, keyed by ID
    definitions: HashMap<CaseDefinitionId, Arc<CaseDefinition>>,
    /// Index by key → definition IDs in version order
    by_key: HashMap<String, Vec<CaseDefinitionId>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deploy a case definition as the next version of its key.
    ///
    /// Validates the definition before storing. Returns the definition ID.
    pub fn deploy(&mut self, mut definition: CaseDefinition) -> CaseResult<CaseDefinitionId> {
        let version = self
            .by_key
            .get(&definition.key)
            .map(|ids| ids.len() as u32 + 1)
            .unwrap_or(1);
        definition.set_version(version);
        definition.validate()?;

        let id = definition.id.clone();
        self.by_key
            .entry(definition.key.clone())
            .or_default()
            .push(id.clone());
        self.definitions.insert(id.clone(), Arc::new(definition));

        tracing::info!(definition_id = %id, version, "Case definition deployed");
        Ok(id)
    }

    pub fn get(&self, id: &CaseDefinitionId) -> CaseResult<Arc<CaseDefinition>> {
        self.definitions
            .get(id)
            .cloned()
            .ok_or_else(|| CaseError::DefinitionNotFound(id.clone()))
    }

    /// Latest version deployed under `key`
    pub fn latest_by_key(&self, key: &str) -> Option<Arc<CaseDefinition>> {
        self.by_key
            .get(key)
            .and_then(|ids| ids.last())
            .and_then(|id| self.definitions.get(id))
            .cloned()
    }

    pub fn versions_by_key(&self, key: &str) -> Vec<Arc<CaseDefinition>> {
        self.by_key
            .get(key)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.definitions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.definitions.len()
    }

    pub fn contains(&self, id: &CaseDefinitionId) -> bool {
        self.definitions.contains_key(id)
    }
}

impl DefinitionProvider for DefinitionRegistry {
    fn definition(&self, id: &CaseDefinitionId) -> CaseResult<Arc<CaseDefinition>> {
        self.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use case_types::StandardEvent;

    fn make_definition(key: &str) -> CaseDefinition {
        let mut def = CaseDefinition::new(key, "Claim Handling");
        def.add_sentry(SentryDeclaration::new("after_a").on("a", StandardEvent::Complete))
            .unwrap();
        def.add_to_plan(Activity::task("a", "Assess")).unwrap();
        def.add_to_plan(Activity::task("b", "Pay").with_entry_criterion("after_a"))
            .unwrap();
        def
    }

    #[test]
    fn test_deploy_and_get() {
        let mut registry = DefinitionRegistry::new();
        let id = registry.deploy(make_definition("claim")).unwrap();
        assert_eq!(id, CaseDefinitionId::new("claim:1"));
        assert_eq!(registry.get(&id).unwrap().name, "Claim Handling");
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_versions() {
        let mut registry = DefinitionRegistry::new();
        registry.deploy(make_definition("claim")).unwrap();
        let second = registry.deploy(make_definition("claim")).unwrap();

        assert_eq!(second, CaseDefinitionId::new("claim:2"));
        assert_eq!(registry.versions_by_key("claim").len(), 2);
        assert_eq!(registry.latest_by_key("claim").unwrap().version, 2);
        assert!(registry.latest_by_key("other").is_none());
    }

    #[test]
    fn test_invalid_definition_rejected() {
        let mut registry = DefinitionRegistry::new();
        let mut def = make_definition("broken");
        def.add_to_plan(Activity::task("c", "C").with_entry_criterion("nope"))
            .unwrap();
        assert!(registry.deploy(def).is_err());
        assert_eq!(registry.count(), 0);
        assert!(registry.latest_by_key("broken").is_none());
    }

    #[test]
    fn test_resolve_through_provider() {
        let mut registry = DefinitionRegistry::new();
        let id = registry.deploy(make_definition("claim")).unwrap();

        let activity = registry.resolve_activity(&id, &ActivityId::new("b")).unwrap();
        assert_eq!(activity.entry_criteria, vec![SentryId::new("after_a")]);

        let sentry = registry
            .resolve_sentry(&id, &SentryId::new("after_a"))
            .unwrap();
        assert_eq!(sentry.on_parts.len(), 1);

        assert!(matches!(
            registry.resolve_activity(&id, &ActivityId::new("zzz")),
            Err(CaseError::ActivityNotFound { .. })
        ));
        assert!(matches!(
            registry.resolve_sentry(&CaseDefinitionId::new("x:1"), &SentryId::new("s")),
            Err(CaseError::DefinitionNotFound(_))
        ));
    }
}
