//! Persisted session artifacts
//!
//! Artifacts are opaque blobs keyed by protocol family. They are only ever
//! cleared wholesale.

use super::ProtocolFamily;
use crate::config::{SessionConfig, StoreBackend};
use crate::error::{OrchestratorError, OrchestratorResult};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Opaque per-family storage entries
pub type SessionArtifacts = BTreeMap<String, Vec<u8>>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, family: ProtocolFamily) -> OrchestratorResult<Option<SessionArtifacts>>;

    async fn save(&self, family: ProtocolFamily, artifacts: &SessionArtifacts)
        -> OrchestratorResult<()>;

    /// Remove everything stored for the family
    async fn purge(&self, family: ProtocolFamily) -> OrchestratorResult<()>;
}

/// On-disk layout: one JSON document per family
#[derive(Debug, Serialize, Deserialize)]
struct StoredArtifacts {
    family: ProtocolFamily,
    saved_at: DateTime<Utc>,
    /// Hex-encoded blobs
    entries: BTreeMap<String, String>,
}

/// Directory-backed store
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, family: ProtocolFamily) -> PathBuf {
        self.dir.join(format!("{}.json", family.as_str()))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, family: ProtocolFamily) -> OrchestratorResult<Option<SessionArtifacts>> {
        let data = match tokio::fs::read(self.path(family)).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let stored: StoredArtifacts = serde_json::from_slice(&data)?;
        let entries = stored
            .entries
            .into_iter()
            .map(|(k, v)| {
                hex::decode(&v)
                    .map(|blob| (k, blob))
                    .map_err(|e| OrchestratorError::Storage(e.to_string()))
            })
            .collect::<OrchestratorResult<SessionArtifacts>>()?;

        debug!(
            "Loaded {} artifacts for {} (saved {})",
            entries.len(),
            family,
            stored.saved_at
        );
        Ok(Some(entries))
    }

    async fn save(
        &self,
        family: ProtocolFamily,
        artifacts: &SessionArtifacts,
    ) -> OrchestratorResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let stored = StoredArtifacts {
            family,
            saved_at: Utc::now(),
            entries: artifacts
                .iter()
                .map(|(k, v)| (k.clone(), hex::encode(v)))
                .collect(),
        };
        tokio::fs::write(self.path(family), serde_json::to_vec_pretty(&stored)?).await?;
        Ok(())
    }

    async fn purge(&self, family: ProtocolFamily) -> OrchestratorResult<()> {
        match tokio::fs::remove_file(self.path(family)).await {
            Ok(()) => {
                info!("Purged stored session artifacts for {}", family);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process store
#[derive(Default)]
pub struct MemorySessionStore {
    entries: DashMap<ProtocolFamily, SessionArtifacts>,
    purges: AtomicUsize,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of purges performed so far
    pub fn purge_count(&self) -> usize {
        self.purges.load(Ordering::SeqCst)
    }

    pub fn contains(&self, family: ProtocolFamily) -> bool {
        self.entries.contains_key(&family)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, family: ProtocolFamily) -> OrchestratorResult<Option<SessionArtifacts>> {
        Ok(self.entries.get(&family).map(|e| e.value().clone()))
    }

    async fn save(
        &self,
        family: ProtocolFamily,
        artifacts: &SessionArtifacts,
    ) -> OrchestratorResult<()> {
        self.entries.insert(family, artifacts.clone());
        Ok(())
    }

    async fn purge(&self, family: ProtocolFamily) -> OrchestratorResult<()> {
        self.entries.remove(&family);
        self.purges.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Open the store backend named in the session config
pub fn open_store(config: &SessionConfig) -> Arc<dyn SessionStore> {
    match config.store {
        StoreBackend::File => {
            info!("Session artifacts persisted under {}", config.store_dir);
            Arc::new(FileSessionStore::new(&config.store_dir))
        }
        StoreBackend::Memory => Arc::new(MemorySessionStore::new()),
    }
}
