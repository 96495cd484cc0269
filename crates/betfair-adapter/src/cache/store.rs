//! Persistence collaborator for rendered payloads
//!
//! The freshness cache reads through a [`PayloadStore`] on a memory miss and
//! writes every successful refetch back to it, so payloads survive restarts
//! and can be shared across processes. `fetched_at` travels with the payload
//! so freshness is recomputed on reload.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::CacheKey;

/// Payload as persisted: rendered JSON plus its fetch stamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPayload {
    pub key: String,
    pub fetched_at: DateTime<Utc>,
    pub payload: Value,
}

#[async_trait]
pub trait PayloadStore: Send + Sync {
    async fn load(&self, key: &CacheKey) -> Result<Option<StoredPayload>>;

    async fn save(&self, key: &CacheKey, stored: &StoredPayload) -> Result<()>;
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    payloads: Mutex<HashMap<CacheKey, StoredPayload>>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads stored
    pub fn len(&self) -> usize {
        self.payloads.lock().len()
    }

    /// Nothing stored yet
    pub fn is_empty(&self) -> bool {
        self.payloads.lock().is_empty()
    }
}

#[async_trait]
impl PayloadStore for MemoryStore {
    async fn load(&self, key: &CacheKey) -> Result<Option<StoredPayload>> {
        Ok(self.payloads.lock().get(key).cloned())
    }

    async fn save(&self, key: &CacheKey, stored: &StoredPayload) -> Result<()> {
        self.payloads.lock().insert(key.clone(), stored.clone());
        Ok(())
    }
}

/// One pretty-printed JSON file per key under a directory
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    dir: PathBuf,
}

impl JsonDirStore {
    /// Store rooted at `dir`; created on first save
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<class>-<id>.json`. Bytes outside `[A-Za-z0-9.-]` (including `_`) become
    /// `_XX` hex, so distinct ids never share a file.
    fn path_for(&self, key: &CacheKey) -> PathBuf {
        let mut id = String::with_capacity(key.id.len());
        for byte in key.id.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'.' || byte == b'-' {
                id.push(char::from(byte));
            } else {
                id.push_str(&format!("_{byte:02X}"));
            }
        }
        self.dir.join(format!("{}-{}.json", key.class.as_str(), id))
    }
}

#[async_trait]
impl PayloadStore for JsonDirStore {
    async fn load(&self, key: &CacheKey) -> Result<Option<StoredPayload>> {
        let path = self.path_for(key);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };

        let stored = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        debug!("Loaded {} from {}", key, path.display());
        Ok(Some(stored))
    }

    async fn save(&self, key: &CacheKey, stored: &StoredPayload) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.path_for(key);
        let content = serde_json::to_string_pretty(stored).context("Failed to serialize payload")?;
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}
