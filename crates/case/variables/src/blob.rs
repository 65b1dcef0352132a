//! Byte blob access

use case_types::{BlobId, CaseResult};
use std::collections::HashMap;

/// Access to the blob table a record's payload may live in
pub trait BlobAccess {
    fn find_blob(&self, id: &BlobId) -> CaseResult<Option<Vec<u8>>>;

    fn insert_blob(&mut self, id: BlobId, bytes: Vec<u8>) -> CaseResult<()>;

    fn delete_blob(&mut self, id: &BlobId) -> CaseResult<()>;
}

/// Blob table held in memory
#[derive(Clone, Debug, Default)]
pub struct InMemoryBlobs {
    blobs: HashMap<BlobId, Vec<u8>>,
}

impl InMemoryBlobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn contains(&self, id: &BlobId) -> bool {
        self.blobs.contains_key(id)
    }

    /// Overwrite a blob's bytes in place
    pub fn replace(&mut self, id: &BlobId, bytes: Vec<u8>) -> bool {
        match self.blobs.get_mut(id) {
            Some(existing) => {
                *existing = bytes;
                true
            }
            None => false,
        }
    }
}

impl BlobAccess for InMemoryBlobs {
    fn find_blob(&self, id: &BlobId) -> CaseResult<Option<Vec<u8>>> {
        Ok(self.blobs.get(id).cloned())
    }

    fn insert_blob(&mut self, id: BlobId, bytes: Vec<u8>) -> CaseResult<()> {
        self.blobs.insert(id, bytes);
        Ok(())
    }

    fn delete_blob(&mut self, id: &BlobId) -> CaseResult<()> {
        self.blobs.remove(id);
        Ok(())
    }
}
