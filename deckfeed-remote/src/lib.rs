use std::time::Duration;

use async_trait::async_trait;
use deckfeed_core::{
    ContentNode, FeedError, Index, IndexId, NodeId, RangeProvider, RangeRequest, Sitemap,
};
use futures::future;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

pub mod wire;

use wire::{WireCard, WireIndex, WireSitemap};

/// Index id the backend serves at `{base}/index`.
pub const DEFAULT_INDEX_ID: &str = "/s/default/default";

/// Range provider backed by the deck HTTP API.
#[derive(Clone)]
pub struct RemoteHttpProvider {
    client: reqwest::Client,
    base: String,
}

impl RemoteHttpProvider {
    pub fn new(server_url: impl Into<String>, request_timeout: Duration) -> Result<Self, FeedError> {
        let base = server_url.into().trim_end_matches('/').to_owned();
        if base.is_empty() {
            return Err(FeedError::Config("server_url must not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|err| FeedError::Config(format!("failed to build HTTP client: {}", err)))?;
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn index_url(&self, index_id: &IndexId) -> String {
        if index_id.as_str() == DEFAULT_INDEX_ID {
            format!("{}/index", self.base)
        } else {
            format!("{}{}/index", self.base, index_id)
        }
    }

    fn range_url(&self, index_id: &IndexId, request: &RangeRequest) -> String {
        let bound = |id: &Option<NodeId>| id.as_ref().map_or("0", |id| id.as_str()).to_owned();
        format!(
            "{}{}/range/{}/{}",
            self.base,
            index_id,
            bound(&request.start),
            bound(&request.end)
        )
    }

    fn content_url(&self, index_id: &IndexId, node_id: &NodeId) -> String {
        format!("{}{}/content/{}", self.base, index_id, node_id)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FeedError> {
        debug!(%url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| FeedError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, url, &body));
        }

        let body = response
            .text()
            .await
            .map_err(|err| FeedError::Transport(err.to_string()))?;
        serde_json::from_str(&body)
            .map_err(|err| FeedError::Decode(format!("{}: {}", url, err)))
    }
}

/// Maps a non-success status to the loader's error taxonomy.
pub fn status_error(status: StatusCode, url: &str, body: &str) -> FeedError {
    if status == StatusCode::NOT_FOUND {
        FeedError::NotFound(url.to_owned())
    } else {
        let detail = body.trim();
        if detail.is_empty() {
            FeedError::Transport(format!("{} returned {}", url, status))
        } else {
            FeedError::Transport(format!("{} returned {}: {}", url, status, detail))
        }
    }
}

#[async_trait]
impl RangeProvider for RemoteHttpProvider {
    async fn resolve_index_id(
        &self,
        user_slug: Option<&str>,
        content_slug: Option<&str>,
    ) -> Result<IndexId, FeedError> {
        match (user_slug, content_slug) {
            (Some(user), Some(content)) => Ok(IndexId::new(format!("/s/{}/{}", user, content))),
            _ => Ok(IndexId::new(DEFAULT_INDEX_ID)),
        }
    }

    #[instrument(skip(self))]
    async fn get_index(&self, index_id: &IndexId) -> Result<Index, FeedError> {
        let wire: WireIndex = self.get_json(&self.index_url(index_id)).await?;
        wire.into_index(index_id.clone())
    }

    #[instrument(skip(self, request), fields(request = %request))]
    async fn get_range(
        &self,
        index_id: &IndexId,
        request: &RangeRequest,
    ) -> Result<Vec<ContentNode>, FeedError> {
        let cards: Vec<WireCard> = self.get_json(&self.range_url(index_id, request)).await?;
        Ok(cards.into_iter().map(WireCard::into_node).collect())
    }

    async fn get_node(&self, index_id: &IndexId, node_id: &NodeId) -> Result<ContentNode, FeedError> {
        let card: WireCard = self.get_json(&self.content_url(index_id, node_id)).await?;
        Ok(card.into_node())
    }

    async fn get_nodes(
        &self,
        index_id: &IndexId,
        node_ids: &[NodeId],
    ) -> Result<Vec<ContentNode>, FeedError> {
        future::try_join_all(node_ids.iter().map(|id| self.get_node(index_id, id))).await
    }

    async fn get_sitemap(&self) -> Result<Sitemap, FeedError> {
        let wire: WireSitemap = self.get_json(&format!("{}/sitemap", self.base)).await?;
        Ok(wire::into_sitemap(wire))
    }
}
