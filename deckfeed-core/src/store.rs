use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::model::{ContentNode, Index, NodeId};

/// Identifier-keyed cache of fetched cards.
///
/// A missing key means "not loaded yet". Entries are inserted once and never
/// removed, so merging a node that is already present is a no-op.
#[derive(Debug, Default)]
pub struct SparseStore {
    nodes: Mutex<HashMap<NodeId, Arc<ContentNode>>>,
    fully_loaded: AtomicBool,
}

impl SparseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &NodeId) -> Option<Arc<ContentNode>> {
        self.nodes.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts the nodes not already present and returns the ones that were new.
    pub fn merge<I>(&self, nodes: I) -> Vec<Arc<ContentNode>>
    where
        I: IntoIterator<Item = ContentNode>,
    {
        let mut inserted = Vec::new();
        let mut guard = self.nodes.lock();
        for node in nodes {
            if guard.contains_key(&node.id) {
                continue;
            }
            let node = Arc::new(node);
            guard.insert(node.id.clone(), Arc::clone(&node));
            inserted.push(node);
        }
        let total = guard.len();
        drop(guard);
        debug!(inserted = inserted.len(), total, "merged nodes into store");
        inserted
    }

    /// Runs `f` with a presence check that sees one consistent snapshot.
    pub fn with_presence<R>(&self, f: impl FnOnce(&dyn Fn(&NodeId) -> bool) -> R) -> R {
        let guard = self.nodes.lock();
        f(&|id: &NodeId| guard.contains_key(id))
    }

    /// True when every id of `index` has an entry.
    pub fn covers(&self, index: &Index) -> bool {
        let guard = self.nodes.lock();
        guard.len() >= index.len() && index.content_ids().iter().all(|id| guard.contains_key(id))
    }

    pub fn is_fully_loaded(&self) -> bool {
        self.fully_loaded.load(Ordering::Acquire)
    }

    /// Sets the sticky flag. Returns true only for the call that flipped it.
    pub(crate) fn mark_fully_loaded(&self) -> bool {
        !self.fully_loaded.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn mark_fully_loaded_if_covered(&self, index: &Index) -> bool {
        if self.is_fully_loaded() {
            return false;
        }
        self.covers(index) && self.mark_fully_loaded()
    }
}
