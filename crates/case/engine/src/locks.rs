//! Per-tree exclusive locks

use case_types::ExecutionId;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};

/// One mutex per execution tree, keyed by the case instance id.
///
/// A caller holds the guard of a tree's mutex for the whole of one
/// operation; cascaded transitions inside it never lock again.
#[derive(Debug, Default)]
pub struct TreeLocks {
    locks: DashMap<ExecutionId, Arc<Mutex<()>>>,
}

impl TreeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex guarding tree `case_instance_id`
    pub fn handle(&self, case_instance_id: &ExecutionId) -> Arc<Mutex<()>> {
        self.locks
            .entry(case_instance_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Mutexes for several trees, in a stable order so two callers never
    /// wait on each other crosswise
    pub fn handles(&self, case_instance_ids: &[&ExecutionId]) -> Vec<Arc<Mutex<()>>> {
        let mut ids: Vec<&ExecutionId> = case_instance_ids.to_vec();
        ids.sort();
        ids.dedup();
        ids.into_iter().map(|id| self.handle(id)).collect()
    }

    /// Forget the mutex of a closed tree
    pub fn release(&self, case_instance_id: &ExecutionId) {
        self.locks.remove(case_instance_id);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_tree_same_mutex() {
        let locks = TreeLocks::new();
        let a = ExecutionId::new("a");
        assert!(Arc::ptr_eq(&locks.handle(&a), &locks.handle(&a)));
        assert!(!Arc::ptr_eq(&locks.handle(&a), &locks.handle(&ExecutionId::new("b"))));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_handles_sorted_and_deduplicated() {
        let locks = TreeLocks::new();
        let (a, b) = (ExecutionId::new("a"), ExecutionId::new("b"));
        let handles = locks.handles(&[&b, &a, &b]);
        assert_eq!(handles.len(), 2);
        assert!(Arc::ptr_eq(&handles[0], &locks.handle(&a)));
    }

    #[test]
    fn test_release() {
        let locks = TreeLocks::new();
        let a = ExecutionId::new("a");
        locks.handle(&a);
        locks.release(&a);
        assert!(locks.is_empty());
    }
}
