use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FeedError, Result};
use crate::model::{Index, IndexId, NodeId};

const DECK_NAMESPACE: Uuid = Uuid::from_u128(0x5d1e_7c0a_42b9_5f6e_9a31_c4d2_08be_71f3);

/// Stable key for per-deck files, derived from the index id.
pub fn deck_key(index_id: &IndexId) -> Uuid {
    Uuid::new_v5(&DECK_NAMESPACE, index_id.as_str().as_bytes())
}

/// The node the viewer is focused on.
#[derive(Debug, Clone, Default)]
pub struct LocationTracker {
    ordinal: usize,
    current_id: Option<NodeId>,
}

impl LocationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves to `ordinal` and returns the node id found there.
    pub fn set(&mut self, index: &Index, ordinal: usize) -> Result<NodeId> {
        let id = index
            .id_at(ordinal)
            .cloned()
            .ok_or(FeedError::OrdinalOutOfRange {
                ordinal,
                len: index.len(),
            })?;
        self.ordinal = ordinal;
        self.current_id = Some(id.clone());
        Ok(id)
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn current_id(&self) -> Option<&NodeId> {
        self.current_id.as_ref()
    }

    pub fn next_id<'a>(&self, index: &'a Index) -> Option<&'a NodeId> {
        index.id_at(self.ordinal.checked_add(1)?)
    }

    pub fn previous_id<'a>(&self, index: &'a Index) -> Option<&'a NodeId> {
        index.id_at(self.ordinal.checked_sub(1)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedLocation {
    pub node_id: NodeId,
    pub ordinal: usize,
}

/// Where the last reading position of each deck is kept between sessions.
pub trait LocationStore: Send + Sync {
    fn load(&self, index_id: &IndexId) -> Result<Option<PersistedLocation>>;
    fn save(&self, index_id: &IndexId, location: &PersistedLocation) -> Result<()>;
}

pub struct FileLocationStore {
    root: PathBuf,
}

impl FileLocationStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root).map_err(|err| {
            FeedError::Io(format!("failed to create state directory at {:?}: {}", root, err))
        })?;
        Ok(Self { root })
    }

    fn location_path(&self, index_id: &IndexId) -> PathBuf {
        self.root.join(format!("{}.json", deck_key(index_id)))
    }
}

impl LocationStore for FileLocationStore {
    fn load(&self, index_id: &IndexId) -> Result<Option<PersistedLocation>> {
        let path = self.location_path(index_id);
        if !path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&path)
            .map_err(|err| FeedError::Io(format!("failed to open {:?}: {}", path, err)))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        let location = serde_json::from_str(&buf)
            .map_err(|err| FeedError::Decode(format!("failed to decode {:?}: {}", path, err)))?;
        Ok(Some(location))
    }

    fn save(&self, index_id: &IndexId, location: &PersistedLocation) -> Result<()> {
        let path = self.location_path(index_id);
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(location)?;
        let mut file = File::create(&tmp)
            .map_err(|err| FeedError::Io(format!("failed to open {:?}: {}", tmp, err)))?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(tmp, path)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryLocationStore {
    inner: Mutex<HashMap<IndexId, PersistedLocation>>,
}

impl MemoryLocationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocationStore for MemoryLocationStore {
    fn load(&self, index_id: &IndexId) -> Result<Option<PersistedLocation>> {
        Ok(self.inner.lock().get(index_id).cloned())
    }

    fn save(&self, index_id: &IndexId, location: &PersistedLocation) -> Result<()> {
        self.inner.lock().insert(index_id.clone(), location.clone());
        Ok(())
    }
}
