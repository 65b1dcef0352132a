//! Persistence of execution trees
//!
//! The engine reads rows lazily through [`CaseStore`] and writes all changes
//! of one operation in a single [`ChangeSet`]. Commits are atomic and check
//! row revisions, so a commit built from stale rows fails as a whole.

use crate::ExecutionNode;
use case_types::{BlobId, CaseError, CaseResult, ExecutionId};
use std::collections::HashMap;
use std::sync::RwLock;

/// The persistence provider of the engine
pub trait CaseStore: Send + Sync {
    fn find_execution(&self, id: &ExecutionId) -> CaseResult<Option<ExecutionNode>>;

    fn find_children(&self, parent_id: &ExecutionId) -> CaseResult<Vec<ExecutionNode>>;

    fn find_blob(&self, id: &BlobId) -> CaseResult<Option<Vec<u8>>>;

    /// Apply every change or none
    fn commit(&self, changes: ChangeSet) -> CaseResult<()>;
}

/// All writes of one operation
#[derive(Clone, Debug, Default)]
pub struct ChangeSet {
    pub inserts: Vec<ExecutionNode>,
    /// Updated rows, carrying the revision they were loaded with
    pub updates: Vec<ExecutionNode>,
    /// Deleted rows with the revision they were loaded with
    pub deletes: Vec<(ExecutionId, u64)>,
    pub blob_inserts: Vec<(BlobId, Vec<u8>)>,
    pub blob_deletes: Vec<BlobId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty()
            && self.updates.is_empty()
            && self.deletes.is_empty()
            && self.blob_inserts.is_empty()
            && self.blob_deletes.is_empty()
    }
}

#[derive(Default)]
struct Tables {
    executions: HashMap<ExecutionId, ExecutionNode>,
    by_parent: HashMap<ExecutionId, Vec<ExecutionId>>,
    blobs: HashMap<BlobId, Vec<u8>>,
}

impl Tables {
    fn check_revision(&self, id: &ExecutionId, expected: u64) -> CaseResult<()> {
        match self.executions.get(id) {
            Some(row) if row.revision == expected => Ok(()),
            Some(row) => Err(CaseError::ConcurrentModification(format!(
                "execution {} is at revision {}, expected {}",
                id, row.revision, expected
            ))),
            None => Err(CaseError::ConcurrentModification(format!(
                "execution {} was deleted concurrently",
                id
            ))),
        }
    }

    fn unlink(&mut self, row: &ExecutionNode) {
        if let Some(parent) = &row.parent_id {
            if let Some(ids) = self.by_parent.get_mut(parent) {
                ids.retain(|i| i != &row.id);
                if ids.is_empty() {
                    self.by_parent.remove(parent);
                }
            }
        }
    }
}

/// Case store held in memory
#[derive(Default)]
pub struct InMemoryCaseStore {
    tables: RwLock<Tables>,
}

impl InMemoryCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn execution_count(&self) -> CaseResult<usize> {
        Ok(self.tables.read().map_err(|_| CaseError::LockPoisoned)?.executions.len())
    }

    pub fn blob_count(&self) -> CaseResult<usize> {
        Ok(self.tables.read().map_err(|_| CaseError::LockPoisoned)?.blobs.len())
    }

    /// Overwrite a stored blob, bypassing the engine
    pub fn replace_blob(&self, id: &BlobId, bytes: Vec<u8>) -> CaseResult<bool> {
        let mut tables = self.tables.write().map_err(|_| CaseError::LockPoisoned)?;
        Ok(match tables.blobs.get_mut(id) {
            Some(existing) => {
                *existing = bytes;
                true
            }
            None => false,
        })
    }
}

impl CaseStore for InMemoryCaseStore {
    fn find_execution(&self, id: &ExecutionId) -> CaseResult<Option<ExecutionNode>> {
        let tables = self.tables.read().map_err(|_| CaseError::LockPoisoned)?;
        Ok(tables.executions.get(id).cloned())
    }

    fn find_children(&self, parent_id: &ExecutionId) -> CaseResult<Vec<ExecutionNode>> {
        let tables = self.tables.read().map_err(|_| CaseError::LockPoisoned)?;
        Ok(tables
            .by_parent
            .get(parent_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.executions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn find_blob(&self, id: &BlobId) -> CaseResult<Option<Vec<u8>>> {
        let tables = self.tables.read().map_err(|_| CaseError::LockPoisoned)?;
        Ok(tables.blobs.get(id).cloned())
    }

    fn commit(&self, changes: ChangeSet) -> CaseResult<()> {
        let mut tables = self.tables.write().map_err(|_| CaseError::LockPoisoned)?;

        for row in &changes.inserts {
            if tables.executions.contains_key(&row.id) {
                return Err(CaseError::ConcurrentModification(format!(
                    "execution {} already exists",
                    row.id
                )));
            }
        }
        for row in &changes.updates {
            tables.check_revision(&row.id, row.revision)?;
        }
        for (id, revision) in &changes.deletes {
            tables.check_revision(id, *revision)?;
        }

        for (id, _) in &changes.deletes {
            if let Some(row) = tables.executions.remove(id) {
                tables.unlink(&row);
                tables.by_parent.remove(id);
            }
        }
        for mut row in changes.updates {
            row.revision += 1;
            tables.executions.insert(row.id.clone(), row);
        }
        for mut row in changes.inserts {
            row.revision = 1;
            if let Some(parent) = &row.parent_id {
                tables
                    .by_parent
                    .entry(parent.clone())
                    .or_default()
                    .push(row.id.clone());
            }
            tables.executions.insert(row.id.clone(), row);
        }
        for id in &changes.blob_deletes {
            tables.blobs.remove(id);
        }
        for (id, bytes) in changes.blob_inserts {
            tables.blobs.insert(id, bytes);
        }

        tracing::trace!(executions = tables.executions.len(), "Changes committed");
        Ok(())
    }
}
