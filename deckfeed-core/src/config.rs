use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

use crate::error::{FeedError, Result};
use crate::retry::RetryPolicy;

/// Tunables of the loading layer.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Nodes per provider page. Windows around a node span half a page each side.
    pub page_size: usize,
    /// Forward gap-scan steps taken per backward step.
    pub forward_bias: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "fetch_timeout_ms")]
    pub fetch_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "prefetch_interval_ms")]
    pub prefetch_interval: Duration,
    /// Exit the background loop once every node is loaded.
    pub stop_when_loaded: bool,
    pub retry: RetryPolicy,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            forward_bias: 6,
            fetch_timeout: Duration::from_secs(10),
            prefetch_interval: Duration::from_secs(2),
            stop_when_loaded: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl LoaderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.page_size < 2 {
            return Err(FeedError::Config(format!(
                "page_size must be at least 2, got {}",
                self.page_size
            )));
        }
        if self.forward_bias == 0 {
            return Err(FeedError::Config("forward_bias must be positive".into()));
        }
        self.retry.validate()
    }

    pub fn half_page(&self) -> usize {
        (self.page_size / 2).max(1)
    }
}

/// Which range provider backs the loader.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Decks served from memory: a JSON fixture file, or generated cards.
    Fixture {
        #[serde(default)]
        path: Option<PathBuf>,
        #[serde(default = "default_fixture_nodes")]
        nodes: usize,
    },
    Remote {
        server_url: String,
        #[serde_as(as = "DurationMilliSeconds<u64>")]
        #[serde(rename = "request_timeout_ms", default = "default_request_timeout")]
        request_timeout: Duration,
    },
}

fn default_fixture_nodes() -> usize {
    1000
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Fixture {
            path: None,
            nodes: default_fixture_nodes(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub provider: ProviderConfig,
    pub loader: LoaderConfig,
}

impl FeedConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: FeedConfig =
            toml::from_str(source).map_err(|err| FeedError::Config(err.to_string()))?;
        config.loader.validate()?;
        Ok(config)
    }

    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let source = fs::read_to_string(path)
            .map_err(|err| FeedError::Config(format!("failed to read {:?}: {}", path, err)))?;
        Self::from_toml_str(&source)
    }
}
