//! Repository state persistence
//!
//! The core keeps its state in memory; a [`SnapshotStore`] saves and loads
//! the whole of it. [`FileStore`] keeps one JSON document per repository
//! directory:
//!
//! ```text
//! {root}/
//!   metadata.json    repository UUID and creation time
//!   state.json       versions, branches, merge requests, backups
//!   config.json      RepositoryConfig
//!   hooks/           hook scripts
//! ```

use crate::backup::BackupRecord;
use crate::branch::ContentBranches;
use crate::merge::MergeRequest;
use crate::object::Version;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Everything needed to rebuild a repository
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositorySnapshot {
    pub versions: Vec<Version>,
    /// Last allocated version number per content item
    pub version_counters: BTreeMap<String, u64>,
    pub branches: Vec<ContentBranches>,
    pub merge_requests: Vec<MergeRequest>,
    pub backups: Vec<BackupRecord>,
}

/// Repository metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    pub uuid: String,
    pub created_at: i64,
}

/// Storage backend for repository snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the last saved snapshot, if any
    async fn load(&self) -> Result<Option<RepositorySnapshot>>;

    /// Replace the saved snapshot
    async fn save(&self, snapshot: &RepositorySnapshot) -> Result<()>;
}

/// Snapshot store on the local filesystem
pub struct FileStore {
    root: PathBuf,
    metadata: RepositoryMetadata,
}

impl FileStore {
    /// Open or create a repository directory
    pub fn open(path: &Path) -> Result<Self> {
        let root = path.to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create repository directory {:?}", root))?;

        let metadata_path = root.join("metadata.json");
        let metadata = if metadata_path.exists() {
            let file = File::open(&metadata_path)?;
            let reader = BufReader::new(file);
            serde_json::from_reader::<_, RepositoryMetadata>(reader)
                .with_context(|| format!("Failed to parse {:?}", metadata_path))?
        } else {
            let meta = RepositoryMetadata {
                uuid: uuid::Uuid::new_v4().to_string(),
                created_at: chrono::Utc::now().timestamp(),
            };
            let file = File::create(&metadata_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &meta)?;
            writer.flush()?;
            meta
        };

        Ok(Self { root, metadata })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata(&self) -> &RepositoryMetadata {
        &self.metadata
    }

    fn state_path(&self) -> PathBuf {
        self.root.join("state.json")
    }
}

#[async_trait]
impl SnapshotStore for FileStore {
    async fn load(&self) -> Result<Option<RepositorySnapshot>> {
        let state_path = self.state_path();
        if !state_path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read(&state_path)
            .await
            .with_context(|| format!("Failed to read repository state from {:?}", state_path))?;
        let snapshot: RepositorySnapshot = serde_json::from_slice(&data)
            .with_context(|| "Failed to parse repository state JSON")?;
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &RepositorySnapshot) -> Result<()> {
        let state_path = self.state_path();
        let tmp_path = state_path.with_extension("tmp");
        let data = serde_json::to_vec_pretty(snapshot)?;
        tokio::fs::write(&tmp_path, &data).await?;
        tokio::fs::rename(&tmp_path, &state_path)
            .await
            .with_context(|| format!("Failed to replace {:?}", state_path))?;
        tracing::debug!(path = ?state_path, bytes = data.len(), "Saved repository state");
        Ok(())
    }
}

/// Snapshot store that keeps the last snapshot in memory
#[derive(Default)]
pub struct MemoryStore {
    snapshot: RwLock<Option<RepositorySnapshot>>,
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load(&self) -> Result<Option<RepositorySnapshot>> {
        Ok(self.snapshot.read().await.clone())
    }

    async fn save(&self, snapshot: &RepositorySnapshot) -> Result<()> {
        *self.snapshot.write().await = Some(snapshot.clone());
        Ok(())
    }
}
