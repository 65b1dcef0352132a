//! Case Domain Types
//!
//! A running case is a tree of **execution nodes**. Each node instantiates
//! one activity of a [`CaseDefinition`] and moves through the lifecycle
//! described by [`ExecutionState`]. Transitions are gated by **sentries**:
//! join conditions made of on-parts (lifecycle signals of other nodes) and an
//! optional if-part (a guard over case variables).
//!
//! # Key Concepts
//!
//! - **CaseDefinition**: the activity model (case plan, stages, tasks,
//!   milestones) plus its sentry declarations.
//! - **ExecutionState / StandardEvent**: the node lifecycle and the named
//!   transitions observable as sentry signals.
//! - **TypedValue**: a variable value with an optional declared
//!   [`VariableType`]. Untyped values get their type detected on write.
//! - **SerializedValue**: the neutral byte form a serializer exchanges with
//!   callers that do not want to decode a value.
//! - **CaseError**: the error taxonomy shared by every case crate.

#![deny(unsafe_code)]

mod definition;
mod errors;
mod ids;
mod state;
mod value;

pub use definition::*;
pub use errors::*;
pub use ids::*;
pub use state::*;
pub use value::*;
