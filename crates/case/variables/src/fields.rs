//! Raw storage fields of a variable record

use crate::BlobAccess;
use case_types::{BlobId, CaseError, CaseResult};
use serde::{Deserialize, Serialize};

/// The columns a serializer may populate. Which ones are meaningful is
/// decided by the record's serializer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub double: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_id: Option<BlobId>,
}

impl ValueFields {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Store `bytes` in a fresh blob, deleting the one previously referenced
    pub fn set_blob(&mut self, bytes: Vec<u8>, blobs: &mut dyn BlobAccess) -> CaseResult<()> {
        if let Some(old) = self.blob_id.take() {
            blobs.delete_blob(&old)?;
        }
        let id = BlobId::generate();
        blobs.insert_blob(id.clone(), bytes)?;
        self.blob_id = Some(id);
        Ok(())
    }

    /// Bytes of the referenced blob; `None` when no blob is referenced
    pub fn blob(&self, blobs: &dyn BlobAccess) -> CaseResult<Option<Vec<u8>>> {
        match &self.blob_id {
            Some(id) => blobs.find_blob(id)?.map(Some).ok_or_else(|| CaseError::Decode {
                variable: String::new(),
                message: format!("blob {} is missing", id),
            }),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryBlobs;

    #[test]
    fn test_set_blob_replaces_previous() {
        let mut blobs = InMemoryBlobs::new();
        let mut fields = ValueFields::default();
        fields.set_blob(vec![1], &mut blobs).unwrap();
        let first = fields.blob_id.clone().unwrap();
        fields.set_blob(vec![2], &mut blobs).unwrap();

        assert!(!blobs.contains(&first));
        assert_eq!(blobs.len(), 1);
        assert_eq!(fields.blob(&blobs).unwrap(), Some(vec![2]));
    }

    #[test]
    fn test_missing_blob_is_decode_error() {
        let blobs = InMemoryBlobs::new();
        let fields = ValueFields {
            blob_id: Some(BlobId::new("gone")),
            ..Default::default()
        };
        assert!(matches!(fields.blob(&blobs), Err(CaseError::Decode { .. })));
        assert!(ValueFields::default().is_empty());
    }
}
