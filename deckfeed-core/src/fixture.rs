use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{FeedError, Result};
use crate::model::{
    ContentNode, DeckSummary, Index, IndexId, IndexMetadata, NodeId, Sitemap, TocEntry,
};
use crate::provider::{RangeProvider, RangeRequest};

/// One deck as stored in a fixture file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureDeck {
    pub user_slug: String,
    pub content_slug: String,
    pub index: Index,
    pub nodes: Vec<ContentNode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureSet {
    pub decks: Vec<FixtureDeck>,
}

/// Snapshot of how many times each provider operation was called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixtureCalls {
    pub resolve: usize,
    pub index: usize,
    pub range: usize,
    pub node: usize,
    pub batch: usize,
    pub sitemap: usize,
}

impl FixtureCalls {
    /// Calls that move card payloads: range, single and batched fetches.
    pub fn content_fetches(&self) -> usize {
        self.range + self.node + self.batch
    }
}

#[derive(Default)]
struct Counters {
    resolve: AtomicUsize,
    index: AtomicUsize,
    range: AtomicUsize,
    node: AtomicUsize,
    batch: AtomicUsize,
    sitemap: AtomicUsize,
}

struct LoadedDeck {
    user_slug: String,
    content_slug: String,
    index: Index,
    nodes: HashMap<NodeId, ContentNode>,
}

/// In-memory range provider backed by fixture decks.
pub struct FixtureProvider {
    decks: Vec<LoadedDeck>,
    page_size: usize,
    latency: Option<Duration>,
    failures: AtomicUsize,
    counters: Counters,
}

impl FixtureProvider {
    pub fn from_decks(decks: Vec<FixtureDeck>, page_size: usize) -> Result<Self> {
        let mut loaded = Vec::with_capacity(decks.len());
        for deck in decks {
            let mut nodes: HashMap<NodeId, ContentNode> = deck
                .nodes
                .into_iter()
                .map(|node| (node.id.clone(), node))
                .collect();
            for (ordinal, id) in deck.index.content_ids().iter().enumerate() {
                let node = nodes.get_mut(id).ok_or_else(|| {
                    FeedError::InvariantViolation(format!(
                        "fixture deck {} lists {} without a card",
                        deck.index.id, id
                    ))
                })?;
                node.order = Some(ordinal);
            }
            loaded.push(LoadedDeck {
                user_slug: deck.user_slug,
                content_slug: deck.content_slug,
                index: deck.index,
                nodes,
            });
        }
        Ok(Self {
            decks: loaded,
            page_size: page_size.max(1),
            latency: None,
            failures: AtomicUsize::new(0),
            counters: Counters::default(),
        })
    }

    pub fn from_path(path: &Path, page_size: usize) -> Result<Self> {
        let source = fs::read_to_string(path)
            .map_err(|err| FeedError::Io(format!("failed to read fixture {:?}: {}", path, err)))?;
        let set: FixtureSet = serde_json::from_str(&source)?;
        Self::from_decks(set.decks, page_size)
    }

    /// A single synthetic deck of `nodes` cards under `/s/demo/generated`.
    pub fn generated(nodes: usize, page_size: usize) -> Result<Self> {
        Self::from_decks(vec![generated_deck("demo", "generated", nodes)?], page_size)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// The next `count` range or batch calls fail with a transport error.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> FixtureCalls {
        let c = &self.counters;
        FixtureCalls {
            resolve: c.resolve.load(Ordering::SeqCst),
            index: c.index.load(Ordering::SeqCst),
            range: c.range.load(Ordering::SeqCst),
            node: c.node.load(Ordering::SeqCst),
            batch: c.batch.load(Ordering::SeqCst),
            sitemap: c.sitemap.load(Ordering::SeqCst),
        }
    }

    pub fn first_index(&self) -> Option<&Index> {
        self.decks.first().map(|deck| &deck.index)
    }

    fn deck(&self, index_id: &IndexId) -> Result<&LoadedDeck> {
        self.decks
            .iter()
            .find(|deck| &deck.index.id == index_id)
            .ok_or_else(|| FeedError::NotFound(format!("index {}", index_id)))
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn take_failure(&self) -> Result<()> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            Err(FeedError::Transport("injected fixture failure".into()))
        } else {
            Ok(())
        }
    }
}

fn generated_deck(user_slug: &str, content_slug: &str, count: usize) -> Result<FixtureDeck> {
    let index_id = IndexId::new(format!("/s/{}/{}", user_slug, content_slug));
    let mut nodes = Vec::with_capacity(count);
    let mut toc = Vec::new();
    for ordinal in 0..count {
        let id = NodeId::new(Uuid::new_v4().to_string());
        let mut node = ContentNode::new(id.clone(), if ordinal == 0 { "title" } else { "markdown" });
        node.order = Some(ordinal);
        node.body = Some(format!("## Node {}", ordinal));
        if ordinal % 100 == 0 {
            let title = format!("Part {}", ordinal / 100 + 1);
            node.title = Some(title.clone());
            node.toc_depth = Some(1);
            toc.push(TocEntry {
                title,
                target: id,
                depth: 1,
                start_seconds: None,
            });
        }
        nodes.push(node);
    }
    let content_ids = nodes.iter().map(|node| node.id.clone()).collect();
    let metadata = IndexMetadata {
        name: format!("Generated deck ({} cards)", count),
        author: Some(user_slug.to_owned()),
        author_slug: Some(user_slug.to_owned()),
        content_slug: Some(content_slug.to_owned()),
        ..IndexMetadata::default()
    };
    let index = Index::new(index_id, metadata, content_ids, toc, None)?;
    Ok(FixtureDeck {
        user_slug: user_slug.to_owned(),
        content_slug: content_slug.to_owned(),
        index,
        nodes,
    })
}

#[async_trait]
impl RangeProvider for FixtureProvider {
    async fn resolve_index_id(
        &self,
        user_slug: Option<&str>,
        content_slug: Option<&str>,
    ) -> Result<IndexId> {
        self.counters.resolve.fetch_add(1, Ordering::SeqCst);
        self.decks
            .iter()
            .find(|deck| {
                user_slug.map_or(true, |slug| slug == deck.user_slug)
                    && content_slug.map_or(true, |slug| slug == deck.content_slug)
            })
            .map(|deck| deck.index.id.clone())
            .ok_or_else(|| {
                FeedError::NotFound(format!(
                    "no deck for /s/{}/{}",
                    user_slug.unwrap_or("-"),
                    content_slug.unwrap_or("-")
                ))
            })
    }

    async fn get_index(&self, index_id: &IndexId) -> Result<Index> {
        self.counters.index.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        Ok(self.deck(index_id)?.index.clone())
    }

    async fn get_range(
        &self,
        index_id: &IndexId,
        request: &RangeRequest,
    ) -> Result<Vec<ContentNode>> {
        self.counters.range.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        self.take_failure()?;
        let deck = self.deck(index_id)?;
        for bound in request.start.iter().chain(request.end.iter()) {
            if !deck.index.contains(bound) {
                return Err(FeedError::NotFound(format!("node {} in {}", bound, index_id)));
            }
        }
        let span = request.expected_span(&deck.index, self.page_size);
        debug!(%index_id, %request, start = span.start, end = span.end, "fixture range");
        span.filter_map(|ordinal| deck.index.id_at(ordinal))
            .map(|id| {
                deck.nodes
                    .get(id)
                    .cloned()
                    .ok_or_else(|| FeedError::NotFound(format!("node {}", id)))
            })
            .collect()
    }

    async fn get_node(&self, index_id: &IndexId, node_id: &NodeId) -> Result<ContentNode> {
        self.counters.node.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        self.deck(index_id)?
            .nodes
            .get(node_id)
            .cloned()
            .ok_or_else(|| FeedError::NotFound(format!("node {} in {}", node_id, index_id)))
    }

    async fn get_nodes(
        &self,
        index_id: &IndexId,
        node_ids: &[NodeId],
    ) -> Result<Vec<ContentNode>> {
        self.counters.batch.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        self.take_failure()?;
        let deck = self.deck(index_id)?;
        node_ids
            .iter()
            .map(|id| {
                deck.nodes
                    .get(id)
                    .cloned()
                    .ok_or_else(|| FeedError::NotFound(format!("node {} in {}", id, index_id)))
            })
            .collect()
    }

    async fn get_sitemap(&self) -> Result<Sitemap> {
        self.counters.sitemap.fetch_add(1, Ordering::SeqCst);
        let mut sitemap = Sitemap::new();
        for deck in &self.decks {
            let metadata = &deck.index.metadata;
            sitemap
                .entry(deck.user_slug.clone())
                .or_default()
                .push(DeckSummary {
                    author: metadata.author.clone().unwrap_or_else(|| deck.user_slug.clone()),
                    title: metadata.name.clone(),
                    description: metadata.description.clone(),
                    slug: deck.content_slug.clone(),
                    updated_at: metadata.updated_at,
                    visible: true,
                });
        }
        Ok(sitemap)
    }
}
