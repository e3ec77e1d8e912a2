//! JSON bodies served by the deck backend, and their conversion to domain types.

use std::collections::BTreeMap;
use std::time::SystemTime;

use deckfeed_core::{
    AudioTrack, ContentNode, DeckSummary, FeedError, Index, IndexId, IndexMetadata, MediaRefs,
    NodeId, Sitemap, TocEntry, TransitionHints,
};
use serde::Deserialize;

/// Type tag used when a card does not name one.
pub const DEFAULT_CARD_TYPE: &str = "title";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_slug: Option<String>,
    #[serde(default)]
    pub author_link: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub mp3: Option<String>,
    #[serde(default)]
    pub last_update_time: Option<SystemTime>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireTocEntry {
    pub title: String,
    #[serde(alias = "id")]
    pub target: String,
    #[serde(default)]
    pub depth: usize,
    #[serde(default, alias = "start")]
    pub start_seconds: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireIndex {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub metadata: WireMetadata,
    #[serde(default)]
    pub deck_ids: Option<Vec<String>>,
    #[serde(default)]
    pub toc: Option<Vec<WireTocEntry>>,
}

impl WireIndex {
    /// Builds the index under `index_id`, the path it was requested by.
    pub fn into_index(self, index_id: IndexId) -> Result<Index, FeedError> {
        let meta = self.metadata;
        let metadata = IndexMetadata {
            name: meta.title,
            description: meta.description,
            author: meta.author,
            author_slug: meta.author_slug,
            author_link: meta.author_link,
            content_slug: meta.slug,
            thumbnail_image_url: meta.image_url,
            locale: meta.locale,
            updated_at: meta.last_update_time,
        };
        let content_ids = self
            .deck_ids
            .unwrap_or_default()
            .into_iter()
            .map(NodeId::from)
            .collect();
        let toc = self
            .toc
            .unwrap_or_default()
            .into_iter()
            .map(|entry| TocEntry {
                title: entry.title,
                target: NodeId::from(entry.target),
                depth: entry.depth,
                start_seconds: entry.start_seconds,
            })
            .collect();
        let audio = meta.mp3.filter(|url| !url.is_empty()).map(|url| AudioTrack { url });
        Index::new(index_id, metadata, content_ids, toc, audio)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WireCard {
    pub id: String,
    pub title: Option<String>,
    pub card_type: Option<String>,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
    pub video_has_sound: bool,
    pub video_controls: bool,
    pub is_loop: bool,
    pub pngs: Vec<String>,
    pub pngs_fps: Option<f32>,
    pub fade_in: bool,
    pub fade_out: bool,
    pub shake: bool,
    pub pan_left: bool,
    pub pan_right: bool,
    pub pan_up: bool,
    pub pan_down: bool,
    pub dolly_in: bool,
    pub dolly_out: bool,
    pub spin_clockwise: bool,
    pub duration: Option<f32>,
    pub amount: Option<f32>,
    pub delay: Option<f32>,
    pub easing: Option<String>,
    pub animate_container: bool,
    pub extra_class: Option<String>,
    pub container_class: Option<String>,
    pub next: Option<String>,
    pub stack: Vec<WireCard>,
    pub toc_depth: Option<usize>,
    pub created_at: Option<SystemTime>,
    pub updated_at: Option<SystemTime>,
}

impl WireCard {
    pub fn into_node(self) -> ContentNode {
        let kind = self
            .card_type
            .filter(|kind| !kind.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CARD_TYPE.to_owned());
        let mut node = ContentNode::new(self.id, kind);
        node.title = self.title;
        node.body = self.content;
        node.media = MediaRefs {
            image_url: self.image_url,
            video_url: self.video_url,
            video_has_sound: self.video_has_sound,
            video_controls: self.video_controls,
            looped: self.is_loop,
            pngs: self.pngs,
            pngs_fps: self.pngs_fps,
        };
        node.transition = TransitionHints {
            fade_in: self.fade_in,
            fade_out: self.fade_out,
            shake: self.shake,
            pan_left: self.pan_left,
            pan_right: self.pan_right,
            pan_up: self.pan_up,
            pan_down: self.pan_down,
            dolly_in: self.dolly_in,
            dolly_out: self.dolly_out,
            spin_clockwise: self.spin_clockwise,
            duration: self.duration,
            amount: self.amount,
            delay: self.delay,
            easing: self.easing,
            animate_container: self.animate_container,
            extra_class: self.extra_class,
            container_class: self.container_class,
        };
        node.stack = self.stack.into_iter().map(WireCard::into_node).collect();
        node.next = self.next;
        node.toc_depth = self.toc_depth;
        node.created_at = self.created_at;
        node.updated_at = self.updated_at;
        node
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireDeckSummary {
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub slug: String,
    #[serde(default)]
    pub last_update_time: Option<SystemTime>,
    #[serde(default = "visible_by_default")]
    pub visible: bool,
}

fn visible_by_default() -> bool {
    true
}

pub type WireSitemap = BTreeMap<String, Vec<WireDeckSummary>>;

pub fn into_sitemap(wire: WireSitemap) -> Sitemap {
    wire.into_iter()
        .map(|(author, decks)| {
            let decks = decks
                .into_iter()
                .map(|deck| DeckSummary {
                    author: deck.author,
                    title: deck.title,
                    description: deck.description,
                    slug: deck.slug,
                    updated_at: deck.last_update_time,
                    visible: deck.visible,
                })
                .collect();
            (author, decks)
        })
        .collect()
}
