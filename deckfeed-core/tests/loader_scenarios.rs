use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deckfeed_core::{
    ContentNode, DeckLoader, FeedError, FixtureProvider, Index, IndexId, LoaderConfig, NodeId,
    PrefetchHandle, PrefetchOutcome, RangeProvider, RangeRequest, RetryPolicy, Sitemap,
};

fn config(page_size: usize) -> LoaderConfig {
    LoaderConfig {
        page_size,
        prefetch_interval: Duration::from_millis(1),
        retry: RetryPolicy {
            attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            multiplier: 2.0,
        },
        ..LoaderConfig::default()
    }
}

fn setup(nodes: usize, page_size: usize) -> (Arc<FixtureProvider>, DeckLoader) {
    let provider = Arc::new(FixtureProvider::generated(nodes, page_size).unwrap());
    let loader = DeckLoader::new(provider.clone(), config(page_size));
    (provider, loader)
}

fn assert_all_present(loader: &DeckLoader) {
    let index = loader.index().unwrap();
    for id in index.content_ids() {
        assert!(loader.cached(id).is_some(), "missing {}", id);
    }
}

async fn steps_to_converge(loader: &DeckLoader, budget: usize) -> usize {
    for step in 1..=budget {
        match loader.prefetch_step().await.unwrap() {
            PrefetchOutcome::Complete => return step - 1,
            PrefetchOutcome::Filled { .. } if loader.is_fully_loaded() => return step,
            PrefetchOutcome::Filled { .. } => {}
            PrefetchOutcome::Waiting => panic!("index should be loaded"),
        }
    }
    panic!("not fully loaded after {} steps", budget);
}

#[tokio::test]
async fn coverage_converges_from_the_start() {
    let (n, p) = (1000, 100);
    let (_, loader) = setup(n, p);
    loader.load_index(None, None, None).await.unwrap();

    let budget = n.div_ceil(p) + 2;
    steps_to_converge(&loader, budget).await;
    assert!(loader.is_fully_loaded());
    assert_all_present(&loader);
    assert_eq!(loader.find_gap(), None);
}

#[tokio::test]
async fn forward_fills_fetch_whole_pages() {
    for (n, p) in [(30, 3), (50_000, 100)] {
        let (provider, loader) = setup(n, p);
        loader.load_index(None, None, None).await.unwrap();
        let before = provider.calls().range;

        assert_eq!(
            loader.prefetch_step().await.unwrap(),
            PrefetchOutcome::Filled { hole: p, merged: p }
        );
        steps_to_converge(&loader, n.div_ceil(p) + 1).await;
        assert_all_present(&loader);
        assert!(provider.calls().range - before <= n.div_ceil(p));
    }
}

#[tokio::test]
async fn coverage_converges_from_a_deep_link() {
    let (n, p) = (10_000, 100);
    let (provider, loader) = setup(n, p);
    let target = provider.first_index().unwrap().id_at(5000).cloned().unwrap();
    loader.load_index(None, None, Some(&target)).await.unwrap();

    steps_to_converge(&loader, n.div_ceil(p) + 2).await;
    assert_all_present(&loader);
}

#[tokio::test]
async fn end_caps_are_loaded_after_index_load() {
    let (n, p) = (1000, 100);
    let (provider, loader) = setup(n, p);
    let index = loader.load_index(None, None, None).await.unwrap();

    for ordinal in [0, 1, n - 2, n - 1] {
        assert!(loader.cached(index.id_at(ordinal).unwrap()).is_some());
    }
    let calls = provider.calls();
    assert_eq!(calls.range, 1);
    assert_eq!(calls.batch, 1);
    assert!(!loader.is_fully_loaded());
    assert_eq!(loader.first_content_id(), index.first_id().cloned());
    assert_eq!(loader.last_content_id(), index.last_id().cloned());

    loader.load_end_caps().await.unwrap();
    assert_eq!(provider.calls().batch, 1);
}

#[tokio::test]
async fn small_deck_loads_in_one_shot() {
    let (provider, loader) = setup(50, 100);
    loader.load_index(None, None, None).await.unwrap();

    assert!(loader.is_fully_loaded());
    assert_eq!(loader.store().len(), 50);
    let calls = provider.calls();
    assert_eq!(calls.range, 1);
    assert_eq!(calls.batch, 0);
    assert_eq!(
        loader.prefetch_step().await.unwrap(),
        PrefetchOutcome::Complete
    );
    assert_eq!(provider.calls().content_fetches(), 1);
}

#[tokio::test]
async fn deep_link_loads_window_and_end_caps() {
    let (provider, loader) = setup(10_000, 100);
    let index = provider.first_index().unwrap().clone();
    let target = index.id_at(5000).cloned().unwrap();

    loader.load_index(None, None, Some(&target)).await.unwrap();

    let calls = provider.calls();
    assert_eq!(calls.range, 2);
    assert_eq!(calls.batch, 1);
    assert_eq!(loader.current_location(), 5000);
    assert_eq!(loader.current_id(), Some(target.clone()));
    for ordinal in [0, 1, 9998, 9999, 4950, 4999, 5049] {
        assert!(
            loader.cached(index.id_at(ordinal).unwrap()).is_some(),
            "ordinal {} missing",
            ordinal
        );
    }
    assert!(loader.cached(index.id_at(4949).unwrap()).is_none());
    assert!(loader.cached(index.id_at(5050).unwrap()).is_none());

    let node = loader.get_content(&target).await.unwrap();
    assert_eq!(node.id, target);
    assert_eq!(node.order, Some(5000));
    assert_eq!(provider.calls().content_fetches(), calls.content_fetches());
}

#[tokio::test]
async fn on_demand_fetch_populates_the_surrounding_window() {
    let (provider, loader) = setup(1000, 100);
    let index = loader.load_index(None, None, None).await.unwrap();
    let target = index.id_at(500).cloned().unwrap();
    assert!(loader.cached(&target).is_none());

    let node = loader.get_content(&target).await.unwrap();
    assert_eq!(node.id, target);
    for ordinal in 450..550 {
        assert!(loader.cached(index.id_at(ordinal).unwrap()).is_some());
    }
    assert_eq!(provider.calls().range, 3);
}

#[tokio::test]
async fn concurrent_requests_share_one_window() {
    let provider = Arc::new(
        FixtureProvider::generated(1000, 100)
            .unwrap()
            .with_latency(Duration::from_millis(20)),
    );
    let loader = DeckLoader::new(provider.clone(), config(100));
    let index = loader.load_index(None, None, None).await.unwrap();
    let before = provider.calls().range;

    let a = index.id_at(500).cloned().unwrap();
    let b = index.id_at(510).cloned().unwrap();
    let (first, second) = tokio::join!(loader.get_content(&a), loader.get_content(&b));
    assert_eq!(first.unwrap().id, a);
    assert_eq!(second.unwrap().id, b);
    assert_eq!(provider.calls().range - before, 2);
}

#[tokio::test]
async fn navigation_stops_at_the_bounds() {
    let (_, loader) = setup(10, 100);
    let index = loader.load_index(None, None, None).await.unwrap();

    assert_eq!(loader.current_location(), 0);
    assert_eq!(loader.previous_content_id(), None);
    assert_eq!(loader.next_content_id(), index.id_at(1).cloned());

    loader.set_current_location(9).unwrap();
    assert_eq!(loader.next_content_id(), None);
    assert_eq!(loader.previous_content_id(), index.id_at(8).cloned());

    let err = loader.set_current_location(10).unwrap_err();
    assert_eq!(err, FeedError::OrdinalOutOfRange { ordinal: 10, len: 10 });
    assert_eq!(loader.current_location(), 9);
}

#[tokio::test]
async fn content_order_distinguishes_membership_from_loading() {
    let (_, loader) = setup(1000, 100);
    let index = loader.load_index(None, None, None).await.unwrap();
    let far = index.id_at(800).unwrap();

    assert!(loader.cached(far).is_none());
    assert_eq!(loader.content_order(far), Some(800));
    assert_eq!(loader.content_order(&NodeId::from("stranger")), None);
}

#[tokio::test]
async fn unknown_content_is_not_found() {
    let (provider, loader) = setup(100, 10);
    loader.load_index(None, None, None).await.unwrap();
    let before = provider.calls();

    let err = loader.get_content(&NodeId::from("stranger")).await.unwrap_err();
    assert!(matches!(err, FeedError::NotFound(_)));
    assert_eq!(provider.calls(), before);
}

#[tokio::test]
async fn unknown_deck_is_not_found() {
    let (_, loader) = setup(10, 10);
    let err = loader
        .load_index(Some("nobody"), Some("nothing"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, FeedError::NotFound(_)));
    assert_eq!(loader.index().unwrap_err(), FeedError::IndexNotLoaded);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let (provider, loader) = setup(1000, 100);
    let index = loader.load_index(None, None, None).await.unwrap();

    provider.fail_next(2);
    let target = index.id_at(700).cloned().unwrap();
    let node = loader.get_content(&target).await.unwrap();
    assert_eq!(node.id, target);
}

#[tokio::test]
async fn exhausted_retries_surface_as_unavailable() {
    let (provider, loader) = setup(1000, 100);
    let index = loader.load_index(None, None, None).await.unwrap();

    provider.fail_next(100);
    let target = index.id_at(700).cloned().unwrap();
    let err = loader.get_content(&target).await.unwrap_err();
    assert!(matches!(err, FeedError::Unavailable { attempts: 3, .. }));
    assert!(loader.cached(&target).is_none());

    provider.fail_next(0);
    assert_eq!(loader.get_content(&target).await.unwrap().id, target);
}

#[tokio::test]
async fn background_loop_survives_failed_ticks() {
    let provider = Arc::new(FixtureProvider::generated(600, 100).unwrap());
    let loader = Arc::new(DeckLoader::new(
        provider.clone(),
        LoaderConfig {
            retry: RetryPolicy::none(),
            ..config(100)
        },
    ));
    loader.load_index(None, None, None).await.unwrap();

    provider.fail_next(3);
    let handle = PrefetchHandle::spawn(Arc::clone(&loader));
    let report = tokio::time::timeout(Duration::from_secs(10), handle.join())
        .await
        .unwrap();

    assert_eq!(report.failures, 3);
    assert!(report.fully_loaded);
    assert_all_present(&loader);
}

/// Fixture provider that misbehaves in configurable ways.
#[derive(Default)]
struct Faults {
    batch_failures: AtomicUsize,
    untyped_cards: bool,
    batch_skips_first: bool,
    range_skips: Option<NodeId>,
}

struct FaultyProvider {
    inner: FixtureProvider,
    faults: Faults,
}

impl FaultyProvider {
    fn new(nodes: usize, page_size: usize, faults: impl FnOnce(&Index) -> Faults) -> Arc<Self> {
        let inner = FixtureProvider::generated(nodes, page_size).unwrap();
        let faults = faults(inner.first_index().unwrap());
        Arc::new(Self { inner, faults })
    }
}

#[async_trait]
impl RangeProvider for FaultyProvider {
    async fn resolve_index_id(
        &self,
        user_slug: Option<&str>,
        content_slug: Option<&str>,
    ) -> deckfeed_core::Result<IndexId> {
        self.inner.resolve_index_id(user_slug, content_slug).await
    }

    async fn get_index(&self, index_id: &IndexId) -> deckfeed_core::Result<Index> {
        self.inner.get_index(index_id).await
    }

    async fn get_range(
        &self,
        index_id: &IndexId,
        request: &RangeRequest,
    ) -> deckfeed_core::Result<Vec<ContentNode>> {
        let mut nodes = self.inner.get_range(index_id, request).await?;
        if let Some(skip) = &self.faults.range_skips {
            nodes.retain(|node| &node.id != skip);
        }
        if self.faults.untyped_cards {
            for node in &mut nodes {
                node.kind.clear();
            }
        }
        Ok(nodes)
    }

    async fn get_node(
        &self,
        index_id: &IndexId,
        node_id: &NodeId,
    ) -> deckfeed_core::Result<ContentNode> {
        self.inner.get_node(index_id, node_id).await
    }

    async fn get_nodes(
        &self,
        index_id: &IndexId,
        node_ids: &[NodeId],
    ) -> deckfeed_core::Result<Vec<ContentNode>> {
        let failing = self
            .faults
            .batch_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(FeedError::Transport("batch endpoint down".into()));
        }
        let mut nodes = self.inner.get_nodes(index_id, node_ids).await?;
        if self.faults.batch_skips_first {
            nodes.retain(|node| Some(&node.id) != node_ids.first());
        }
        Ok(nodes)
    }

    async fn get_sitemap(&self) -> deckfeed_core::Result<Sitemap> {
        self.inner.get_sitemap().await
    }
}

#[tokio::test]
async fn failed_end_caps_are_fetched_again_on_the_next_load() {
    let provider = FaultyProvider::new(1000, 100, |_| Faults {
        batch_failures: AtomicUsize::new(1),
        ..Faults::default()
    });
    let loader = DeckLoader::new(
        provider.clone(),
        LoaderConfig {
            retry: RetryPolicy::none(),
            ..config(100)
        },
    );

    let err = loader.load_index(None, None, None).await.unwrap_err();
    assert!(matches!(err, FeedError::Unavailable { attempts: 1, .. }));
    assert_eq!(loader.index().unwrap_err(), FeedError::IndexNotLoaded);

    let index = loader.load_index(None, None, None).await.unwrap();
    for ordinal in [0, 1, 998, 999] {
        assert!(loader.cached(index.id_at(ordinal).unwrap()).is_some());
    }
    assert_eq!(provider.inner.calls().batch, 1);
}

#[tokio::test]
async fn concurrent_loads_share_one_index_fetch() {
    let provider = Arc::new(
        FixtureProvider::generated(1000, 100)
            .unwrap()
            .with_latency(Duration::from_millis(20)),
    );
    let loader = DeckLoader::new(provider.clone(), config(100));

    let (first, second) = tokio::join!(
        loader.load_index(None, None, None),
        loader.load_index(None, None, None)
    );
    assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
    let calls = provider.calls();
    assert_eq!(calls.index, 1);
    assert_eq!(calls.range, 1);
    assert_eq!(calls.batch, 1);
}

#[tokio::test]
async fn untyped_cards_are_rejected() {
    let provider = FaultyProvider::new(300, 100, |_| Faults {
        untyped_cards: true,
        ..Faults::default()
    });
    let loader = DeckLoader::new(provider, config(100));

    let err = loader.load_index(None, None, None).await.unwrap_err();
    assert!(matches!(err, FeedError::InvariantViolation(_)));
    assert!(loader.store().is_empty());
}

#[tokio::test]
async fn end_caps_without_the_first_card_are_rejected() {
    let provider = FaultyProvider::new(1000, 100, |_| Faults {
        batch_skips_first: true,
        ..Faults::default()
    });
    let target = provider.inner.first_index().unwrap().id_at(500).cloned().unwrap();
    let loader = DeckLoader::new(provider, config(100));

    let err = loader.load_index(None, None, Some(&target)).await.unwrap_err();
    assert!(matches!(err, FeedError::InvariantViolation(_)));
}

#[tokio::test]
async fn window_missing_the_requested_card_is_rejected() {
    let provider = FaultyProvider::new(1000, 100, |index| Faults {
        range_skips: index.id_at(500).cloned(),
        ..Faults::default()
    });
    let target = provider.inner.first_index().unwrap().id_at(500).cloned().unwrap();
    let loader = DeckLoader::new(provider, config(100));
    loader.load_index(None, None, None).await.unwrap();

    let err = loader.get_content(&target).await.unwrap_err();
    assert!(matches!(err, FeedError::InvariantViolation(_)));
    assert!(loader.cached(&target).is_none());
}
