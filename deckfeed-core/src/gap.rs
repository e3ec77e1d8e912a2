use tracing::info;

use crate::model::{Index, NodeId};
use crate::provider::RangeRequest;
use crate::store::SparseStore;

/// The nearest unloaded ordinal found by [`GapFinder`], with the fetch that fills it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gap {
    /// Hole at or ahead of the viewer. `start_id` is the node just before the
    /// hole; it is `None` when the hole is ordinal 0.
    Forward {
        start_id: Option<NodeId>,
        hole_id: NodeId,
        hole: usize,
    },
    /// Hole behind the viewer. `end_id` is the node just after the hole.
    Backward { end_id: NodeId, hole: usize },
}

impl Gap {
    pub fn hole(&self) -> usize {
        match self {
            Gap::Forward { hole, .. } | Gap::Backward { hole, .. } => *hole,
        }
    }

    /// Fetch that fills the hole. Forward fills start at the hole itself, so a
    /// full page of unloaded cards comes back.
    pub fn request(&self) -> RangeRequest {
        match self {
            Gap::Forward { start_id: None, .. } => RangeRequest::first_page(),
            Gap::Forward { hole_id, .. } => RangeRequest::after(hole_id.clone()),
            Gap::Backward { end_id, .. } => RangeRequest::before(end_id.clone()),
        }
    }
}

/// Scans outward from the viewer's ordinal for the closest missing node,
/// advancing the forward cursor `forward_bias` times per backward step.
#[derive(Debug, Clone, Copy)]
pub struct GapFinder {
    forward_bias: usize,
}

impl GapFinder {
    pub fn new(forward_bias: usize) -> Self {
        Self {
            forward_bias: forward_bias.max(1),
        }
    }

    /// Finds a gap around `current`. When there is none the store is fully
    /// covered and its sticky flag is set.
    pub fn find(&self, current: usize, index: &Index, store: &SparseStore) -> Option<Gap> {
        if store.is_fully_loaded() {
            return None;
        }
        let gap = store.with_presence(|present| self.scan(current, index, present));
        if gap.is_none() && store.mark_fully_loaded() {
            info!(index = %index.id, nodes = index.len(), "deck fully loaded");
        }
        gap
    }

    fn scan(&self, current: usize, index: &Index, present: &dyn Fn(&NodeId) -> bool) -> Option<Gap> {
        let ids = index.content_ids();
        let len = ids.len();
        if len == 0 {
            return None;
        }
        let current = current.min(len - 1);

        let mut forward = Some(current);
        let mut backward = current.checked_sub(1);
        let mut steps = 0usize;

        while forward.is_some() || backward.is_some() {
            if let Some(ordinal) = forward {
                if !present(&ids[ordinal]) {
                    return Some(Gap::Forward {
                        start_id: ordinal.checked_sub(1).map(|prev| ids[prev].clone()),
                        hole_id: ids[ordinal].clone(),
                        hole: ordinal,
                    });
                }
                forward = (ordinal + 1 < len).then_some(ordinal + 1);
                steps += 1;
            }

            if forward.is_none() || steps % self.forward_bias == 0 {
                if let Some(ordinal) = backward {
                    if !present(&ids[ordinal]) {
                        return Some(Gap::Backward {
                            end_id: ids[ordinal + 1].clone(),
                            hole: ordinal,
                        });
                    }
                    backward = ordinal.checked_sub(1);
                }
            }
        }

        None
    }
}

impl Default for GapFinder {
    fn default() -> Self {
        Self::new(6)
    }
}
