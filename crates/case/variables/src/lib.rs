//! Case Variables
//!
//! Every execution node of a case is a variable scope. This crate holds the
//! scope semantics and the typed persistence model beneath them:
//!
//! - [`SerializerRegistry`]: ordered catalog of [`ValueSerializer`]s,
//!   probed in order to pick the serializer for a value
//! - [`VariableRecord`]: one stored variable, its raw [`ValueFields`], the
//!   serializer that owns them and the lazily decoded value
//! - [`VariableStore`]: the local name → record map of one scope
//! - [`VariableScope`]: get/set/remove with parent delegation
//!
//! Large payloads live in blobs reached through [`BlobAccess`]. A record
//! owns its blob: replacing or deleting the record deletes the blob.

#![deny(unsafe_code)]

mod blob;
mod fields;
mod record;
mod registry;
mod scope;
mod serializer;
mod serializers;
mod store;

pub use blob::{BlobAccess, InMemoryBlobs};
pub use fields::ValueFields;
pub use record::VariableRecord;
pub use registry::SerializerRegistry;
pub use scope::{VariableContext, VariableMap, VariableScope};
pub use serializer::ValueSerializer;
pub use serializers::{BytesSerializer, JsonSerializer, NullSerializer, PrimitiveSerializer};
pub use store::{VariableEvent, VariableEventKind, VariableStore};
