//! Case definitions: the activity model a case instance executes
//!
//! A CaseDefinition is a tree of activities rooted at the case plan:
//! - Stages (and the case plan) contain child activities
//! - Tasks are units of work started automatically or by hand
//! - Milestones occur once their entry criteria hold
//!
//! Sentries are declared once per definition and referenced by id from the
//! entry and exit criteria of activities. Definitions are read-only to the
//! engine once deployed.

use crate::{
    ActivityId, CaseDefinitionId, CaseError, CaseResult, SentryId, StandardEvent,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Activity id given to the case plan of definitions built with [`CaseDefinition::new`]
pub const CASE_PLAN_ACTIVITY: &str = "CasePlanModel";

// ── Case Definition ──────────────────────────────────────────────────

/// A deployed case model
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaseDefinition {
    /// Unique identifier (`key:version`)
    pub id: CaseDefinitionId,
    /// Stable key shared by all versions
    pub key: String,
    /// Human-readable name
    pub name: String,
    /// Version, assigned on deployment
    pub version: u32,
    /// The root activity
    pub case_plan: ActivityId,
    /// All activities, including the case plan
    pub activities: HashMap<ActivityId, Activity>,
    /// Sentry declarations referenced by activities
    pub sentries: HashMap<SentryId, SentryDeclaration>,
    /// When this definition was created
    pub created_at: DateTime<Utc>,
}

impl CaseDefinition {
    /// Create a definition containing only an auto-completing case plan
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        let key = key.into();
        let plan = Activity::case_plan(CASE_PLAN_ACTIVITY, "Case Plan");
        let mut activities = HashMap::new();
        activities.insert(plan.id.clone(), plan);
        Self {
            id: CaseDefinitionId::for_version(&key, 1),
            key,
            name: name.into(),
            version: 1,
            case_plan: ActivityId::new(CASE_PLAN_ACTIVITY),
            activities,
            sentries: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Set the version and recompute the id
    pub fn set_version(&mut self, version: u32) {
        self.version = version;
        self.id = CaseDefinitionId::for_version(&self.key, version);
    }

    /// Add an activity directly below the case plan
    pub fn add_to_plan(&mut self, activity: Activity) -> CaseResult<()> {
        let plan = self.case_plan.clone();
        self.add_to_stage(&plan, activity)
    }

    /// Add an activity below a stage (or the case plan)
    pub fn add_to_stage(&mut self, stage: &ActivityId, mut activity: Activity) -> CaseResult<()> {
        if self.activities.contains_key(&activity.id) {
            return Err(CaseError::Validation(format!(
                "duplicate activity id '{}'",
                activity.id
            )));
        }
        let parent = self
            .activities
            .get_mut(stage)
            .ok_or_else(|| CaseError::ActivityNotFound {
                definition: self.id.clone(),
                activity: stage.clone(),
            })?;
        if !parent.kind.is_container() {
            return Err(CaseError::Validation(format!(
                "activity '{}' cannot contain children",
                stage
            )));
        }
        parent.children.push(activity.id.clone());
        activity.parent = Some(stage.clone());
        self.activities.insert(activity.id.clone(), activity);
        Ok(())
    }

    /// Declare a sentry
    pub fn add_sentry(&mut self, sentry: SentryDeclaration) -> CaseResult<()> {
        if self.sentries.contains_key(&sentry.id) {
            return Err(CaseError::Validation(format!(
                "duplicate sentry id '{}'",
                sentry.id
            )));
        }
        self.sentries.insert(sentry.id.clone(), sentry);
        Ok(())
    }

    pub fn activity(&self, id: &ActivityId) -> Option<&Activity> {
        self.activities.get(id)
    }

    pub fn sentry(&self, id: &SentryId) -> Option<&SentryDeclaration> {
        self.sentries.get(id)
    }

    pub fn case_plan_activity(&self) -> Option<&Activity> {
        self.activities.get(&self.case_plan)
    }

    /// Validate the definition for structural correctness
    pub fn validate(&self) -> CaseResult<()> {
        let plan = self.case_plan_activity().ok_or_else(|| {
            CaseError::Validation(format!("case plan '{}' is not declared", self.case_plan))
        })?;
        if plan.kind != ActivityKind::CasePlan {
            return Err(CaseError::Validation(format!(
                "root activity '{}' is not a case plan",
                plan.id
            )));
        }

        let mut seen_children = HashSet::new();
        for activity in self.activities.values() {
            if activity.kind == ActivityKind::CasePlan && activity.id != self.case_plan {
                return Err(CaseError::Validation(format!(
                    "activity '{}' is a second case plan",
                    activity.id
                )));
            }
            if !activity.children.is_empty() && !activity.kind.is_container() {
                return Err(CaseError::Validation(format!(
                    "activity '{}' cannot contain children",
                    activity.id
                )));
            }
            for child in &activity.children {
                if !self.activities.contains_key(child) {
                    return Err(CaseError::ActivityNotFound {
                        definition: self.id.clone(),
                        activity: child.clone(),
                    });
                }
                if !seen_children.insert(child) {
                    return Err(CaseError::Validation(format!(
                        "activity '{}' has more than one parent",
                        child
                    )));
                }
            }
            for sentry_id in activity.entry_criteria.iter().chain(&activity.exit_criteria) {
                if !self.sentries.contains_key(sentry_id) {
                    return Err(CaseError::SentryNotFound {
                        definition: self.id.clone(),
                        sentry: sentry_id.clone(),
                    });
                }
            }
        }

        for sentry in self.sentries.values() {
            for on_part in &sentry.on_parts {
                if !self.activities.contains_key(&on_part.source) {
                    return Err(CaseError::Validation(format!(
                        "sentry '{}' listens to unknown activity '{}'",
                        sentry.id, on_part.source
                    )));
                }
            }
        }

        Ok(())
    }
}

// ── Activity ─────────────────────────────────────────────────────────

/// The kind of an activity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// The root of the model; instantiated as the case instance
    CasePlan,
    /// Container of nested activities
    Stage,
    /// A unit of work
    Task,
    /// Marks an achievement; occurs instead of running
    Milestone,
}

impl ActivityKind {
    pub fn is_container(&self) -> bool {
        matches!(self, Self::CasePlan | Self::Stage)
    }
}

/// One activity of a case model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub name: String,
    pub kind: ActivityKind,
    /// Start as soon as the entry criteria hold, instead of waiting in Enabled
    pub auto_start: bool,
    /// Containers complete once their last child is gone
    pub auto_complete: bool,
    /// Any satisfied sentry here makes the activity enabled/active
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry_criteria: Vec<SentryId>,
    /// Any satisfied sentry here exits the activity
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exit_criteria: Vec<SentryId>,
    /// Child activities, in creation order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ActivityId>,
    /// The enclosing stage, none for the case plan
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ActivityId>,
}

impl Activity {
    fn with_kind(id: impl Into<String>, name: impl Into<String>, kind: ActivityKind) -> Self {
        Self {
            id: ActivityId::new(id),
            name: name.into(),
            kind,
            auto_start: false,
            auto_complete: false,
            entry_criteria: Vec::new(),
            exit_criteria: Vec::new(),
            children: Vec::new(),
            parent: None,
        }
    }

    pub fn case_plan(id: impl Into<String>, name: impl Into<String>) -> Self {
        let mut plan = Self::with_kind(id, name, ActivityKind::CasePlan);
        plan.auto_start = true;
        plan.auto_complete = true;
        plan
    }

    pub fn stage(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_kind(id, name, ActivityKind::Stage)
    }

    pub fn task(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_kind(id, name, ActivityKind::Task)
    }

    pub fn milestone(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_kind(id, name, ActivityKind::Milestone)
    }

    pub fn auto_start(mut self) -> Self {
        self.auto_start = true;
        self
    }

    pub fn auto_complete(mut self) -> Self {
        self.auto_complete = true;
        self
    }

    pub fn with_entry_criterion(mut self, sentry: impl Into<String>) -> Self {
        self.entry_criteria.push(SentryId::new(sentry));
        self
    }

    pub fn with_exit_criterion(mut self, sentry: impl Into<String>) -> Self {
        self.exit_criteria.push(SentryId::new(sentry));
        self
    }

    pub fn is_milestone(&self) -> bool {
        self.kind == ActivityKind::Milestone
    }

    pub fn is_container(&self) -> bool {
        self.kind.is_container()
    }
}

// ── Sentries ─────────────────────────────────────────────────────────

/// A required lifecycle signal: `source` activity emitting `event`
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OnPart {
    pub source: ActivityId,
    pub event: StandardEvent,
}

impl OnPart {
    pub fn new(source: impl Into<String>, event: StandardEvent) -> Self {
        Self {
            source: ActivityId::new(source),
            event,
        }
    }

    pub fn matches(&self, source: &ActivityId, event: StandardEvent) -> bool {
        &self.source == source && self.event == event
    }
}

/// A boolean guard over case variables
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IfPart {
    pub expression: String,
}

/// A join condition: all on-parts observed and the if-part true
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentryDeclaration {
    pub id: SentryId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_parts: Vec<OnPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub if_part: Option<IfPart>,
}

impl SentryDeclaration {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: SentryId::new(id),
            on_parts: Vec::new(),
            if_part: None,
        }
    }

    pub fn on(mut self, source: impl Into<String>, event: StandardEvent) -> Self {
        self.on_parts.push(OnPart::new(source, event));
        self
    }

    pub fn when(mut self, expression: impl Into<String>) -> Self {
        self.if_part = Some(IfPart {
            expression: expression.into(),
        });
        self
    }

    /// Whether any on-part listens to `event` emitted by `source`
    pub fn listens_to(&self, source: &ActivityId, event: StandardEvent) -> bool {
        self.on_parts.iter().any(|p| p.matches(source, event))
    }

    /// No on-parts and no if-part: never satisfied by signals
    pub fn is_empty(&self) -> bool {
        self.on_parts.is_empty() && self.if_part.is_none()
    }
}
