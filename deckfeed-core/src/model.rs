use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::FeedError;

/// Identifier of a single card, unique within its index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of a deck as understood by the range provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexId(String);

impl IndexId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_slug: Option<String>,
    #[serde(default)]
    pub author_link: Option<String>,
    #[serde(default)]
    pub content_slug: Option<String>,
    #[serde(default)]
    pub thumbnail_image_url: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub updated_at: Option<SystemTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocEntry {
    pub title: String,
    pub target: NodeId,
    #[serde(default)]
    pub depth: usize,
    /// Offset into the companion audio track, when the deck has one.
    #[serde(default)]
    pub start_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioTrack {
    pub url: String,
}

/// Plain serialized shape of an [`Index`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub id: IndexId,
    #[serde(default)]
    pub metadata: IndexMetadata,
    pub content_ids: Vec<NodeId>,
    #[serde(default)]
    pub toc: Vec<TocEntry>,
    #[serde(default)]
    pub audio: Option<AudioTrack>,
}

/// The ordered manifest of one deck. Node order is fixed once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "IndexDescriptor", into = "IndexDescriptor")]
pub struct Index {
    pub id: IndexId,
    pub metadata: IndexMetadata,
    pub toc: Vec<TocEntry>,
    pub audio: Option<AudioTrack>,
    content_ids: Vec<NodeId>,
    positions: HashMap<NodeId, usize>,
}

impl Index {
    pub fn new(
        id: IndexId,
        metadata: IndexMetadata,
        content_ids: Vec<NodeId>,
        toc: Vec<TocEntry>,
        audio: Option<AudioTrack>,
    ) -> Result<Self, FeedError> {
        let mut positions = HashMap::with_capacity(content_ids.len());
        for (ordinal, node_id) in content_ids.iter().enumerate() {
            if positions.insert(node_id.clone(), ordinal).is_some() {
                return Err(FeedError::InvariantViolation(format!(
                    "node {} appears more than once in index {}",
                    node_id, id
                )));
            }
        }
        Ok(Self {
            id,
            metadata,
            toc,
            audio,
            content_ids,
            positions,
        })
    }

    pub fn len(&self) -> usize {
        self.content_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content_ids.is_empty()
    }

    pub fn content_ids(&self) -> &[NodeId] {
        &self.content_ids
    }

    pub fn id_at(&self, ordinal: usize) -> Option<&NodeId> {
        self.content_ids.get(ordinal)
    }

    /// Ordinal of `id`, or `None` when the id is not part of this index.
    pub fn position(&self, id: &NodeId) -> Option<usize> {
        self.positions.get(id).copied()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.positions.contains_key(id)
    }

    pub fn first_id(&self) -> Option<&NodeId> {
        self.content_ids.first()
    }

    pub fn last_id(&self) -> Option<&NodeId> {
        self.content_ids.last()
    }

    /// Ordinals {0, 1, len-2, len-1}, deduplicated for tiny decks.
    pub fn end_cap_ordinals(&self) -> Vec<usize> {
        let len = self.len();
        let mut ordinals: Vec<usize> = [Some(0), Some(1), len.checked_sub(2), len.checked_sub(1)]
            .into_iter()
            .flatten()
            .filter(|ordinal| *ordinal < len)
            .collect();
        ordinals.sort_unstable();
        ordinals.dedup();
        ordinals
    }
}

impl TryFrom<IndexDescriptor> for Index {
    type Error = FeedError;

    fn try_from(value: IndexDescriptor) -> Result<Self, Self::Error> {
        Index::new(
            value.id,
            value.metadata,
            value.content_ids,
            value.toc,
            value.audio,
        )
    }
}

impl From<Index> for IndexDescriptor {
    fn from(value: Index) -> Self {
        Self {
            id: value.id,
            metadata: value.metadata,
            content_ids: value.content_ids,
            toc: value.toc,
            audio: value.audio,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaRefs {
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub video_has_sound: bool,
    #[serde(default)]
    pub video_controls: bool,
    #[serde(default)]
    pub looped: bool,
    #[serde(default)]
    pub pngs: Vec<String>,
    #[serde(default)]
    pub pngs_fps: Option<f32>,
}

/// Presentation hints passed through untouched to whatever renders the card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionHints {
    #[serde(default)]
    pub fade_in: bool,
    #[serde(default)]
    pub fade_out: bool,
    #[serde(default)]
    pub shake: bool,
    #[serde(default)]
    pub pan_left: bool,
    #[serde(default)]
    pub pan_right: bool,
    #[serde(default)]
    pub pan_up: bool,
    #[serde(default)]
    pub pan_down: bool,
    #[serde(default)]
    pub dolly_in: bool,
    #[serde(default)]
    pub dolly_out: bool,
    #[serde(default)]
    pub spin_clockwise: bool,
    #[serde(default)]
    pub duration: Option<f32>,
    #[serde(default)]
    pub amount: Option<f32>,
    #[serde(default)]
    pub delay: Option<f32>,
    #[serde(default)]
    pub easing: Option<String>,
    #[serde(default)]
    pub animate_container: bool,
    #[serde(default)]
    pub extra_class: Option<String>,
    #[serde(default)]
    pub container_class: Option<String>,
}

/// One card of a deck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentNode {
    pub id: NodeId,
    #[serde(default)]
    pub order: Option<usize>,
    /// Type tag, e.g. `markdown`, `title`, `image`, `stack`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub media: MediaRefs,
    #[serde(default)]
    pub transition: TransitionHints,
    /// Child cards of composite types.
    #[serde(default)]
    pub stack: Vec<ContentNode>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub toc_depth: Option<usize>,
    #[serde(default)]
    pub created_at: Option<SystemTime>,
    #[serde(default)]
    pub updated_at: Option<SystemTime>,
}

impl ContentNode {
    pub fn new(id: impl Into<NodeId>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            order: None,
            kind: kind.into(),
            title: None,
            body: None,
            media: MediaRefs::default(),
            transition: TransitionHints::default(),
            stack: Vec::new(),
            next: None,
            toc_depth: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// The table-of-contents entry this card announces, if any.
    pub fn toc_entry(&self) -> Option<TocEntry> {
        let depth = self.toc_depth?;
        let title = self.title.as_ref().filter(|t| !t.trim().is_empty())?;
        Some(TocEntry {
            title: title.clone(),
            target: self.id.clone(),
            depth,
            start_seconds: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeckSummary {
    pub author: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub slug: String,
    #[serde(default)]
    pub updated_at: Option<SystemTime>,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

/// Author identifier to the decks they publish.
pub type Sitemap = BTreeMap<String, Vec<DeckSummary>>;

/// URL fragment that deep-links to `id`.
pub fn fragment_for(id: &NodeId) -> String {
    format!("#{}", id)
}

/// Node id carried by a URL fragment; `None` for an empty fragment.
pub fn parse_fragment(fragment: &str) -> Option<NodeId> {
    let trimmed = fragment.trim().trim_start_matches('#');
    if trimmed.is_empty() {
        None
    } else {
        Some(NodeId::from(trimmed))
    }
}
