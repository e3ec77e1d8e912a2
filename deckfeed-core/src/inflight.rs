use std::collections::HashMap;
use std::ops::Range;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::error::FeedError;
use crate::provider::RangeRequest;

/// Result of one range fetch: how many nodes it newly merged.
pub type FetchOutcome = Result<usize, FeedError>;

pub type PendingFetch = Shared<BoxFuture<'static, FetchOutcome>>;

struct Pending {
    span: Range<usize>,
    fetch: PendingFetch,
}

/// Range fetches currently on the wire, shared by on-demand and background loading.
///
/// Each entry records the ordinals it is expected to fill so a caller waiting on
/// one node can join a fetch that was issued for a different anchor.
#[derive(Default)]
pub struct InFlightTable {
    pending: Mutex<HashMap<RangeRequest, Pending>>,
}

impl InFlightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pending fetch for `request`, registering the one built by
    /// `start` if there is none. The flag is true when an existing fetch was joined.
    pub fn join_or_start<F>(&self, request: &RangeRequest, span: Range<usize>, start: F) -> (PendingFetch, bool)
    where
        F: FnOnce() -> BoxFuture<'static, FetchOutcome>,
    {
        let mut pending = self.pending.lock();
        if let Some(existing) = pending.get(request) {
            return (existing.fetch.clone(), true);
        }
        let fetch = start().shared();
        pending.insert(
            request.clone(),
            Pending {
                span,
                fetch: fetch.clone(),
            },
        );
        (fetch, false)
    }

    /// A pending fetch expected to populate `ordinal`, if any.
    pub fn covering(&self, ordinal: usize) -> Option<PendingFetch> {
        self.pending
            .lock()
            .values()
            .find(|pending| pending.span.contains(&ordinal))
            .map(|pending| pending.fetch.clone())
    }

    pub fn complete(&self, request: &RangeRequest) {
        self.pending.lock().remove(request);
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn second_caller_joins_the_first_fetch() {
        let table = InFlightTable::new();
        let started = Arc::new(AtomicUsize::new(0));
        let request = RangeRequest::after(NodeId::from("a"));

        let make = |started: Arc<AtomicUsize>| {
            move || {
                started.fetch_add(1, Ordering::SeqCst);
                async { Ok::<usize, FeedError>(5) }.boxed()
            }
        };

        let (first, joined_first) = table.join_or_start(&request, 0..10, make(started.clone()));
        let (second, joined_second) = table.join_or_start(&request, 0..10, make(started.clone()));
        assert!(!joined_first);
        assert!(joined_second);
        assert_eq!(started.load(Ordering::SeqCst), 1);

        assert!(table.covering(4).is_some());
        assert!(table.covering(10).is_none());

        assert_eq!(first.await, Ok(5));
        assert_eq!(second.await, Ok(5));
        table.complete(&request);
        assert!(table.is_empty());
    }
}
