use std::fmt;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{ContentNode, Index, IndexId, NodeId, Sitemap};

/// A contiguous range of an index, half-open: `start` is included, `end` is not.
///
/// With only `start`, the provider pages forward from it; with only `end`, it
/// pages backward up to it; with neither, it returns the first page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RangeRequest {
    pub start: Option<NodeId>,
    pub end: Option<NodeId>,
}

impl RangeRequest {
    pub fn first_page() -> Self {
        Self::default()
    }

    pub fn after(start: NodeId) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    pub fn before(end: NodeId) -> Self {
        Self {
            start: None,
            end: Some(end),
        }
    }

    pub fn between(start: NodeId, end: NodeId) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Ordinals this request should populate for `index` given a page size.
    pub fn expected_span(&self, index: &Index, page_size: usize) -> std::ops::Range<usize> {
        let len = index.len();
        let start = self.start.as_ref().and_then(|id| index.position(id));
        let end = self.end.as_ref().and_then(|id| index.position(id));
        match (start, end) {
            (Some(s), Some(e)) => s..e.max(s),
            (Some(s), None) => s..(s + page_size).min(len),
            (None, Some(e)) => e.saturating_sub(page_size)..e,
            (None, None) => 0..page_size.min(len),
        }
    }
}

impl fmt::Display for RangeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |id: &Option<NodeId>| {
            id.as_ref()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_owned())
        };
        write!(f, "[{}, {})", show(&self.start), show(&self.end))
    }
}

/// Remote source of decks and their cards.
#[async_trait]
pub trait RangeProvider: Send + Sync {
    /// Resolves slugs to an index id; both absent selects the default deck.
    async fn resolve_index_id(
        &self,
        user_slug: Option<&str>,
        content_slug: Option<&str>,
    ) -> Result<IndexId>;

    async fn get_index(&self, index_id: &IndexId) -> Result<Index>;

    async fn get_range(&self, index_id: &IndexId, request: &RangeRequest)
        -> Result<Vec<ContentNode>>;

    async fn get_node(&self, index_id: &IndexId, node_id: &NodeId) -> Result<ContentNode>;

    /// Batched lookup; results come back in request order.
    async fn get_nodes(&self, index_id: &IndexId, node_ids: &[NodeId])
        -> Result<Vec<ContentNode>>;

    async fn get_sitemap(&self) -> Result<Sitemap>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IndexMetadata;

    fn index(n: usize) -> Index {
        let ids = (0..n).map(|i| NodeId::new(i.to_string())).collect();
        Index::new(IndexId::new("d"), IndexMetadata::default(), ids, vec![], None).unwrap()
    }

    #[test]
    fn expected_span_follows_half_open_contract() {
        let index = index(1000);
        let id = |i: usize| NodeId::new(i.to_string());
        assert_eq!(RangeRequest::first_page().expected_span(&index, 100), 0..100);
        assert_eq!(RangeRequest::after(id(990)).expected_span(&index, 100), 990..1000);
        assert_eq!(RangeRequest::before(id(30)).expected_span(&index, 100), 0..30);
        assert_eq!(
            RangeRequest::between(id(450), id(500)).expected_span(&index, 100),
            450..500
        );
    }

    #[test]
    fn display_marks_open_bounds() {
        let request = RangeRequest::after(NodeId::from("a"));
        assert_eq!(request.to_string(), "[a, -)");
    }
}
