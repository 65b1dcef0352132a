//! The value serializer contract

use crate::{BlobAccess, ValueFields};
use case_types::{CaseError, CaseResult, SerializedValue, TypedValue, VariableType};

/// Encodes typed values into [`ValueFields`] and decodes them back.
///
/// A serializer is identified by its name, which is persisted with every
/// record it writes. The registry asks [`can_serialize`](Self::can_serialize)
/// only for values whose declared type matches [`variable_type`](Self::variable_type)
/// (or for untyped values).
pub trait ValueSerializer: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn variable_type(&self) -> VariableType;

    fn can_serialize(&self, value: &TypedValue) -> bool;

    fn write_value(
        &self,
        value: &TypedValue,
        fields: &mut ValueFields,
        blobs: &mut dyn BlobAccess,
    ) -> CaseResult<()>;

    fn read_value(&self, fields: &ValueFields, blobs: &dyn BlobAccess) -> CaseResult<TypedValue>;

    /// Neutral byte form of the stored value, without decoding objects
    fn to_serialized(
        &self,
        fields: &ValueFields,
        blobs: &dyn BlobAccess,
    ) -> CaseResult<SerializedValue>;

    /// Rebuild a writable value from its neutral byte form
    fn from_serialized(&self, serialized: &SerializedValue) -> CaseResult<TypedValue>;
}

pub(crate) fn decode_error(message: impl Into<String>) -> CaseError {
    CaseError::Decode {
        variable: String::new(),
        message: message.into(),
    }
}

pub(crate) fn encode_error(message: impl Into<String>) -> CaseError {
    CaseError::Encode {
        variable: String::new(),
        message: message.into(),
    }
}
