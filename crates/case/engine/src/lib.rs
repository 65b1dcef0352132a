//! Case Engine
//!
//! Runs case instances: trees of execution nodes whose lifecycle is gated
//! by sentries. A transition of one node is forwarded as a signal to the
//! sentries of its siblings and parent, and whatever becomes satisfied
//! fires in the same call. Every node is also a variable scope.
//!
//! # Architecture
//!
//! The [`CaseService`] composes:
//!
//! - [`DefinitionRegistry`]: deployed case models, by id and by key
//! - [`ExecutionTree`]: the nodes one operation works on, loaded lazily
//!   from a [`CaseStore`] and committed as one [`ChangeSet`]
//! - [`StateMachine`]: lifecycle transitions and their cascades
//! - [`SentryEvaluator`]: join tracking of observed on-parts and if-parts
//! - [`TreeLocks`]: one writer per execution tree
//! - [`CaseHistory`]: committed transitions and variable changes
//!
//! # Example
//!
//! ```rust
//! use case_engine::{CaseService, EngineConfig};
//! use case_types::*;
//! use case_variables::VariableMap;
//!
//! let service = CaseService::new(EngineConfig::default()).unwrap();
//!
//! let mut def = CaseDefinition::new("claim", "Insurance Claim");
//! def.add_sentry(SentryDeclaration::new("assessed").on("assess", StandardEvent::Complete))
//!     .unwrap();
//! def.add_to_plan(Activity::task("assess", "Assess").auto_start()).unwrap();
//! def.add_to_plan(Activity::task("pay", "Pay").with_entry_criterion("assessed"))
//!     .unwrap();
//! let def_id = service.deploy(def).unwrap();
//!
//! let case = service.create_case_instance(&def_id, VariableMap::new()).unwrap();
//! let assess = service.find_executions(&case, &ActivityId::new("assess")).unwrap();
//! service.complete(&assess[0].id).unwrap();
//!
//! let pay = service.find_executions(&case, &ActivityId::new("pay")).unwrap();
//! assert_eq!(pay[0].state, ExecutionState::Enabled);
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod definition_registry;
pub mod expression;
pub mod history;
pub mod locks;
pub mod node;
pub mod sentry;
pub mod service;
pub mod state_machine;
pub mod store;
pub mod tree;

pub use config::{ConcurrencyMode, EngineConfig};
pub use definition_registry::{DefinitionProvider, DefinitionRegistry};
pub use expression::{ConditionEvaluator, ExpressionEvaluator};
pub use history::{CaseHistory, HistoryEventType, HistoryRecord};
pub use locks::TreeLocks;
pub use node::{ExecutionNode, SentryPart};
pub use sentry::SentryEvaluator;
pub use service::CaseService;
pub use state_machine::StateMachine;
pub use store::{CaseStore, ChangeSet, InMemoryCaseStore};
pub use tree::ExecutionTree;
