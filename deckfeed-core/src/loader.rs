use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{self, FutureExt};
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument, warn};

use crate::config::LoaderConfig;
use crate::error::{FeedError, Result};
use crate::gap::{Gap, GapFinder};
use crate::inflight::InFlightTable;
use crate::location::{LocationStore, LocationTracker, PersistedLocation};
use crate::model::{ContentNode, Index, IndexId, NodeId, TocEntry};
use crate::provider::{RangeProvider, RangeRequest};
use crate::retry::RetryPolicy;
use crate::store::SparseStore;

/// Notifications the loader queues for whatever drives the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    IndexLoaded { index_id: IndexId, nodes: usize },
    /// The primary node changed. Mirrors the deep-link fragment.
    LocationChanged { ordinal: usize, id: NodeId },
    NodesMerged { count: usize },
    FullyLoaded,
}

/// What one background prefetch step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchOutcome {
    /// No index has been loaded yet.
    Waiting,
    /// Every node is in the store.
    Complete,
    Filled { hole: usize, merged: usize },
}

/// State reachable from fetches that outlive the call that started them.
struct Shared {
    store: SparseStore,
    inflight: InFlightTable,
    observed_toc: Mutex<BTreeMap<usize, TocEntry>>,
    events: Arc<Mutex<Vec<FeedEvent>>>,
    announced: AtomicBool,
}

impl Shared {
    /// Merges provider output for `index`, dropping cards the index does not list.
    fn absorb(&self, index: &Index, nodes: Vec<ContentNode>) -> Result<usize> {
        let mut accepted = Vec::with_capacity(nodes.len());
        let mut toc = Vec::new();
        for mut node in nodes {
            let Some(ordinal) = index.position(&node.id) else {
                warn!(node = %node.id, index = %index.id, "provider returned a card outside the index");
                continue;
            };
            if node.kind.trim().is_empty() {
                error!(node = %node.id, "card without a type tag");
                return Err(FeedError::InvariantViolation(format!(
                    "card {} has no type tag",
                    node.id
                )));
            }
            node.order = Some(ordinal);
            if let Some(entry) = node.toc_entry() {
                toc.push((ordinal, entry));
            }
            accepted.push(node);
        }

        if !toc.is_empty() {
            let mut observed = self.observed_toc.lock();
            for (ordinal, entry) in toc {
                observed.entry(ordinal).or_insert(entry);
            }
        }

        let merged = self.store.merge(accepted).len();
        if merged > 0 {
            self.events.lock().push(FeedEvent::NodesMerged { count: merged });
        }
        self.store.mark_fully_loaded_if_covered(index);
        self.announce_if_loaded(index);
        Ok(merged)
    }

    fn announce_if_loaded(&self, index: &Index) {
        if self.store.is_fully_loaded() && !self.announced.swap(true, Ordering::AcqRel) {
            info!(index = %index.id, nodes = index.len(), "all cards loaded");
            self.events.lock().push(FeedEvent::FullyLoaded);
        }
    }
}

/// Incremental loader for one deck.
///
/// Owns the sparse store and the reading position. Cards arrive through three
/// paths that share one in-flight table: the initial window of
/// [`load_index`](Self::load_index), on-demand windows of
/// [`get_content`](Self::get_content), and background
/// [`prefetch_step`](Self::prefetch_step) calls.
pub struct DeckLoader {
    provider: Arc<dyn RangeProvider>,
    config: LoaderConfig,
    gap_finder: GapFinder,
    shared: Arc<Shared>,
    index: OnceCell<Arc<Index>>,
    location: Mutex<LocationTracker>,
    locations: Option<Arc<dyn LocationStore>>,
}

impl DeckLoader {
    pub fn new(provider: Arc<dyn RangeProvider>, config: LoaderConfig) -> Self {
        let gap_finder = GapFinder::new(config.forward_bias);
        Self {
            provider,
            config,
            gap_finder,
            shared: Arc::new(Shared {
                store: SparseStore::new(),
                inflight: InFlightTable::new(),
                observed_toc: Mutex::new(BTreeMap::new()),
                events: Arc::new(Mutex::new(Vec::new())),
                announced: AtomicBool::new(false),
            }),
            index: OnceCell::new(),
            location: Mutex::new(LocationTracker::new()),
            locations: None,
        }
    }

    /// Resumes decks at their saved position and saves it on [`persist_location`](Self::persist_location).
    pub fn with_location_store(mut self, store: Arc<dyn LocationStore>) -> Self {
        self.locations = Some(store);
        self
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn store(&self) -> &SparseStore {
        &self.shared.store
    }

    pub fn is_fully_loaded(&self) -> bool {
        self.shared.store.is_fully_loaded()
    }

    pub fn drain_events(&self) -> Vec<FeedEvent> {
        std::mem::take(&mut *self.shared.events.lock())
    }

    /// Resolves and loads a deck, then fills the first window.
    ///
    /// With a `target`, the window is centred on it and the reading position
    /// moves there. Without one, a saved position is used if the location
    /// store has one, otherwise the first page is loaded. Decks that the first
    /// window covers entirely are marked fully loaded; larger ones also get
    /// their end caps. A failed load leaves nothing published, so calling
    /// again starts over.
    #[instrument(skip(self), fields(page_size = self.config.page_size))]
    pub async fn load_index(
        &self,
        user_slug: Option<&str>,
        content_slug: Option<&str>,
        target: Option<&NodeId>,
    ) -> Result<Arc<Index>> {
        let once = RetryPolicy::none();
        let timeout = self.config.fetch_timeout;
        let provider = &self.provider;

        let index_id = once
            .run(timeout, "index resolve", || {
                provider.resolve_index_id(user_slug, content_slug)
            })
            .await?;

        if self.index.get().is_some_and(|existing| existing.id == index_id) {
            debug!(index = %index_id, "index already loaded");
        }
        let index = self
            .index
            .get_or_try_init(|| self.open_index(&index_id, target))
            .await?;
        if index.id != index_id {
            return Err(FeedError::InvariantViolation(format!(
                "loader is bound to {}, cannot switch to {}",
                index.id, index_id
            )));
        }
        Ok(Arc::clone(index))
    }

    /// Fetches the index, its first window and end caps. The index is only
    /// published once all of them are in; concurrent callers wait on the cell.
    async fn open_index(&self, index_id: &IndexId, target: Option<&NodeId>) -> Result<Arc<Index>> {
        let once = RetryPolicy::none();
        let provider = &self.provider;
        let index = Arc::new(
            once.run(self.config.fetch_timeout, "index fetch", || {
                provider.get_index(index_id)
            })
            .await?,
        );
        info!(index = %index.id, nodes = index.len(), name = %index.metadata.name, "index loaded");

        let target_ordinal = match target {
            Some(id) => Some(
                index
                    .position(id)
                    .ok_or_else(|| FeedError::NotFound(format!("node {} in {}", id, index.id)))?,
            ),
            None => self.saved_ordinal(&index),
        };

        match target_ordinal {
            Some(ordinal) => self.load_window(&index, ordinal).await?,
            None => {
                self.fetch_range(&index, RangeRequest::first_page()).await?;
            }
        }

        let covered = self.shared.store.mark_fully_loaded_if_covered(&index);
        if covered {
            debug!(index = %index.id, "first window covers the whole deck");
        } else if !self.shared.store.is_fully_loaded() {
            self.load_end_caps_for(&index).await?;
        }

        let ordinal = target_ordinal.unwrap_or(0);
        let located = if index.is_empty() {
            None
        } else {
            Some(self.location.lock().set(&index, ordinal)?)
        };
        {
            let mut events = self.shared.events.lock();
            events.push(FeedEvent::IndexLoaded {
                index_id: index.id.clone(),
                nodes: index.len(),
            });
            if let Some(id) = located {
                events.push(FeedEvent::LocationChanged { ordinal, id });
            }
        }
        self.shared.announce_if_loaded(&index);
        Ok(index)
    }

    fn saved_ordinal(&self, index: &Index) -> Option<usize> {
        let store = self.locations.as_ref()?;
        match store.load(&index.id) {
            Ok(Some(saved)) => {
                let ordinal = index.position(&saved.node_id);
                if ordinal.is_none() {
                    debug!(node = %saved.node_id, "saved position no longer in index");
                }
                ordinal
            }
            Ok(None) => None,
            Err(err) => {
                warn!(%err, "failed to read saved position");
                None
            }
        }
    }

    /// Ensures ordinals {0, 1, len-2, len-1} are loaded.
    pub async fn load_end_caps(&self) -> Result<()> {
        let index = self.index()?;
        self.load_end_caps_for(&index).await
    }

    async fn load_end_caps_for(&self, index: &Arc<Index>) -> Result<()> {
        let Some(last) = index.last_id() else {
            return Ok(());
        };
        if self.shared.store.contains(last) {
            debug!("end caps already present");
            return Ok(());
        }

        let ids: Vec<NodeId> = index
            .end_cap_ordinals()
            .into_iter()
            .filter_map(|ordinal| index.id_at(ordinal).cloned())
            .collect();
        let provider = &self.provider;
        let nodes = self
            .config
            .retry
            .run(self.config.fetch_timeout, "end-cap fetch", || {
                provider.get_nodes(&index.id, &ids)
            })
            .await?;
        self.shared.absorb(index, nodes)?;

        let first = &ids[0];
        match self.shared.store.get(first) {
            Some(node) if &node.id == first => Ok(()),
            _ => {
                error!(node = %first, "end-cap fetch did not return the first card");
                Err(FeedError::InvariantViolation(format!(
                    "end-cap fetch for {} did not return card {}",
                    index.id, first
                )))
            }
        }
    }

    /// Loaded card for `id` without any I/O.
    pub fn cached(&self, id: &NodeId) -> Option<Arc<ContentNode>> {
        self.shared.store.get(id)
    }

    /// Returns the card for `id`, fetching the window around it if needed.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_content(&self, id: &NodeId) -> Result<Arc<ContentNode>> {
        if let Some(node) = self.shared.store.get(id) {
            return validate(id, node);
        }
        let index = self.index()?;
        let ordinal = index
            .position(id)
            .ok_or_else(|| FeedError::NotFound(format!("node {} in {}", id, index.id)))?;

        if let Some(pending) = self.shared.inflight.covering(ordinal) {
            debug!(ordinal, "joining pending fetch");
            if let Err(err) = pending.await {
                debug!(%err, "pending fetch failed, loading window directly");
            }
        }
        if !self.shared.store.contains(id) {
            self.load_window(&index, ordinal).await?;
        }

        let node = self.shared.store.get(id).ok_or_else(|| {
            error!(node = %id, ordinal, "window fetch did not return the requested card");
            FeedError::InvariantViolation(format!("range around {} did not contain it", id))
        })?;
        validate(id, node)
    }

    /// Fetches the half-page before and after `ordinal` concurrently.
    async fn load_window(&self, index: &Arc<Index>, ordinal: usize) -> Result<()> {
        let ids = index.content_ids();
        let Some(anchor) = ids.get(ordinal) else {
            return Err(FeedError::OrdinalOutOfRange {
                ordinal,
                len: ids.len(),
            });
        };
        let half = self.config.half_page();
        let start = ordinal.saturating_sub(half);

        let behind_request =
            (start < ordinal).then(|| RangeRequest::between(ids[start].clone(), anchor.clone()));
        let ahead_request = match ids.get(ordinal + half) {
            Some(end) => RangeRequest::between(anchor.clone(), end.clone()),
            None => RangeRequest::after(anchor.clone()),
        };

        let behind = async move {
            match behind_request {
                Some(request) => self.fetch_range(index, request).await,
                None => Ok(0),
            }
        };
        let ahead = self.fetch_range(index, ahead_request);
        let (behind, ahead) = future::try_join(behind, ahead).await?;
        debug!(ordinal, behind, ahead, "window loaded");
        Ok(())
    }

    /// Issues `request`, or joins an identical one already on the wire.
    async fn fetch_range(&self, index: &Arc<Index>, request: RangeRequest) -> Result<usize> {
        let span = request.expected_span(index, self.config.page_size);
        let (fetch, joined) = self.shared.inflight.join_or_start(&request, span, || {
            let provider = Arc::clone(&self.provider);
            let shared = Arc::clone(&self.shared);
            let index = Arc::clone(index);
            let retry = self.config.retry.clone();
            let timeout = self.config.fetch_timeout;
            let request = request.clone();
            async move {
                let label = format!("range fetch {}", request);
                let fetched = retry
                    .run(timeout, &label, || provider.get_range(&index.id, &request))
                    .await;
                let outcome = fetched.and_then(|nodes| shared.absorb(&index, nodes));
                shared.inflight.complete(&request);
                outcome
            }
            .boxed()
        });
        if joined {
            debug!(%request, "joined in-flight range fetch");
        }
        fetch.await
    }

    pub fn index(&self) -> Result<Arc<Index>> {
        self.index.get().cloned().ok_or(FeedError::IndexNotLoaded)
    }

    /// Ordinal of `id`; `None` when the index does not list it or is not loaded.
    pub fn content_order(&self, id: &NodeId) -> Option<usize> {
        self.index.get()?.position(id)
    }

    pub fn next_content_id(&self) -> Option<NodeId> {
        let index = self.index.get().cloned()?;
        self.location.lock().next_id(&index).cloned()
    }

    pub fn previous_content_id(&self) -> Option<NodeId> {
        let index = self.index.get().cloned()?;
        self.location.lock().previous_id(&index).cloned()
    }

    pub fn first_content_id(&self) -> Option<NodeId> {
        self.index.get()?.first_id().cloned()
    }

    pub fn last_content_id(&self) -> Option<NodeId> {
        self.index.get()?.last_id().cloned()
    }

    pub fn set_current_location(&self, ordinal: usize) -> Result<NodeId> {
        let index = self.index()?;
        let id = self.location.lock().set(&index, ordinal)?;
        debug!(ordinal, node = %id, "location changed");
        self.shared.events.lock().push(FeedEvent::LocationChanged {
            ordinal,
            id: id.clone(),
        });
        Ok(id)
    }

    pub fn current_location(&self) -> usize {
        self.location.lock().ordinal()
    }

    pub fn current_id(&self) -> Option<NodeId> {
        self.location.lock().current_id().cloned()
    }

    /// Nearest unloaded card around the reading position.
    pub fn find_gap(&self) -> Option<Gap> {
        let index = self.index.get().cloned()?;
        let current = self.current_location();
        let gap = self.gap_finder.find(current, &index, &self.shared.store);
        if gap.is_none() {
            self.shared.announce_if_loaded(&index);
        }
        gap
    }

    /// One tick of background loading: find a gap and fill it.
    pub async fn prefetch_step(&self) -> Result<PrefetchOutcome> {
        let Some(index) = self.index.get().cloned() else {
            return Ok(PrefetchOutcome::Waiting);
        };
        if self.shared.store.is_fully_loaded() {
            return Ok(PrefetchOutcome::Complete);
        }
        let Some(gap) = self.find_gap() else {
            return Ok(PrefetchOutcome::Complete);
        };
        let hole = gap.hole();
        let merged = self.fetch_range(&index, gap.request()).await?;
        debug!(hole, merged, "prefetch filled gap");
        Ok(PrefetchOutcome::Filled { hole, merged })
    }

    /// Index entries merged with those announced by fetched cards, in deck order.
    pub fn table_of_contents(&self) -> Vec<TocEntry> {
        let Some(index) = self.index.get().cloned() else {
            return Vec::new();
        };
        let mut merged: BTreeMap<usize, TocEntry> = index
            .toc
            .iter()
            .filter_map(|entry| Some((index.position(&entry.target)?, entry.clone())))
            .collect();
        for (ordinal, entry) in self.shared.observed_toc.lock().iter() {
            merged.entry(*ordinal).or_insert_with(|| entry.clone());
        }
        merged.into_values().collect()
    }

    /// Saves the reading position, if a location store is attached.
    pub fn persist_location(&self) -> Result<()> {
        let Some(store) = self.locations.as_ref() else {
            return Ok(());
        };
        let index = self.index()?;
        let tracker = self.location.lock().clone();
        let Some(node_id) = tracker.current_id().cloned() else {
            return Ok(());
        };
        store.save(
            &index.id,
            &PersistedLocation {
                node_id,
                ordinal: tracker.ordinal(),
            },
        )
    }
}

fn validate(id: &NodeId, node: Arc<ContentNode>) -> Result<Arc<ContentNode>> {
    if &node.id != id {
        error!(requested = %id, stored = %node.id, "store returned a different card");
        return Err(FeedError::InvariantViolation(format!(
            "requested {} but store holds {}",
            id, node.id
        )));
    }
    if node.kind.trim().is_empty() {
        return Err(FeedError::InvariantViolation(format!(
            "card {} has no type tag",
            id
        )));
    }
    Ok(node)
}
