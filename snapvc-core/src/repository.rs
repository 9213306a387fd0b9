//! Version-control facade
//!
//! [`VersionControl`] is the single entry point for callers (a REST or RPC
//! layer, the CLI, or in-process use). Inputs are plain serde records;
//! callers never touch the version graph directly.

use crate::backup::{BackupManager, BackupPolicy, BackupRecord, BackupType};
use crate::branch::{Branch, BranchRegistry, validate_branch_name};
use crate::clock::{Clock, SystemClock};
use crate::config::RepositoryConfig;
use crate::diff::{Diff, DiffEngine};
use crate::document::{DocPath, Document};
use crate::error::{Result, VcsError};
use crate::hooks::HookManager;
use crate::merge::{MergeCoordinator, MergeRequest};
use crate::object::{CommitKind, NewVersion, Version, VersionId};
use crate::persistent::{RepositorySnapshot, SnapshotStore};
use crate::revert::RevertCoordinator;
use crate::version_store::{HistoryPage, VersionStore};
use crate::writer::HeadWriter;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRequest {
    pub data: Document,
    pub message: String,
    /// Defaults to the configured default branch
    #[serde(default)]
    pub branch: Option<String>,
    /// The head the caller's edit is based on; defaults to the current head
    #[serde(default)]
    pub expected_head: Option<VersionId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBranchRequest {
    pub branch_name: String,
    /// Defaults to the primary branch head
    #[serde(default)]
    pub from_version: Option<VersionId>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeBranchesRequest {
    pub source_branch: String,
    pub target_branch: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveMergeRequest {
    pub merge_id: Uuid,
    /// Value per conflicting path; `null` deletes the path
    pub resolutions: BTreeMap<DocPath, Option<Document>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevertRequest {
    pub version_id: VersionId,
    /// Defaults to the primary branch
    #[serde(default)]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBackupRequest {
    #[serde(default = "default_backup_type")]
    pub backup_type: BackupType,
}

fn default_backup_type() -> BackupType {
    BackupType::Manual
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub backup_id: Uuid,
    /// Defaults to the branch the backup was taken from
    #[serde(default)]
    pub branch: Option<String>,
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(VcsError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

/// Builder for [`VersionControl`]
pub struct VersionControlBuilder {
    config: RepositoryConfig,
    clock: Arc<dyn Clock>,
    hooks: Option<HookManager>,
    persistence: Option<Arc<dyn SnapshotStore>>,
    snapshot: RepositorySnapshot,
}

impl VersionControlBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn hooks(mut self, hooks: HookManager) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Attach a snapshot store used by [`VersionControl::persist`]
    pub fn persistence(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.persistence = Some(store);
        self
    }

    /// Start from previously saved state
    pub fn snapshot(mut self, snapshot: RepositorySnapshot) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Load the initial state from the attached snapshot store, then build
    pub async fn load(mut self) -> Result<VersionControl> {
        if let Some(store) = &self.persistence {
            if let Some(snapshot) = store
                .load()
                .await
                .map_err(|e| VcsError::Storage(format!("{:#}", e)))?
            {
                self.snapshot = snapshot;
            }
        }
        Ok(self.build())
    }

    pub fn build(self) -> VersionControl {
        let RepositorySnapshot {
            versions,
            version_counters,
            branches,
            merge_requests,
            backups,
        } = self.snapshot;

        let store = Arc::new(VersionStore::from_parts(
            self.clock.clone(),
            versions,
            version_counters,
        ));
        let registry = Arc::new(BranchRegistry::from_parts(self.clock.clone(), branches));
        let diff = Arc::new(DiffEngine::new(self.config.diff_cache_capacity));
        let hooks = if self.config.hooks_enabled {
            self.hooks.map(Arc::new)
        } else {
            None
        };
        let writer = Arc::new(HeadWriter::new(store.clone(), registry.clone(), hooks));

        let merges = MergeCoordinator::new(
            store.clone(),
            registry.clone(),
            diff.clone(),
            writer.clone(),
            self.clock.clone(),
            merge_requests,
        );
        let reverts = RevertCoordinator::new(store.clone(), registry.clone(), writer.clone());
        let policy = BackupPolicy {
            retention: Duration::days(i64::from(self.config.backup_retention_days)),
            scope: self.config.backup_scope,
        };
        let backups = BackupManager::new(
            store.clone(),
            registry.clone(),
            writer.clone(),
            policy,
            self.clock.clone(),
            backups,
        );

        VersionControl {
            config: self.config,
            store,
            branches: registry,
            diff,
            writer,
            merges,
            reverts,
            backups,
            persistence: self.persistence,
        }
    }
}

/// Entry point for all version-control operations
pub struct VersionControl {
    config: RepositoryConfig,
    store: Arc<VersionStore>,
    branches: Arc<BranchRegistry>,
    diff: Arc<DiffEngine>,
    writer: Arc<HeadWriter>,
    merges: MergeCoordinator,
    reverts: RevertCoordinator,
    backups: BackupManager,
    persistence: Option<Arc<dyn SnapshotStore>>,
}

impl VersionControl {
    pub fn builder(config: RepositoryConfig) -> VersionControlBuilder {
        VersionControlBuilder {
            config,
            clock: Arc::new(SystemClock),
            hooks: None,
            persistence: None,
            snapshot: RepositorySnapshot::default(),
        }
    }

    /// Empty repository with default configuration and no persistence
    pub fn in_memory() -> Self {
        Self::builder(RepositoryConfig::default()).build()
    }

    /// Rebuild a repository from saved state, without persistence
    pub fn from_snapshot(config: RepositoryConfig, snapshot: RepositorySnapshot) -> Self {
        Self::builder(config).snapshot(snapshot).build()
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    async fn ensure_content(&self, content_id: &str) -> Result<()> {
        require("content_id", content_id)?;
        if !self.branches.has_content(content_id).await {
            return Err(VcsError::not_found("Content", content_id));
        }
        Ok(())
    }

    async fn branch_or_primary(&self, content_id: &str, branch: Option<String>) -> Result<String> {
        match branch {
            Some(branch) => Ok(branch),
            None => self.branches.primary_branch(content_id).await,
        }
    }

    // ── Versions ───────────────────────────────────────────────

    /// Commit a new snapshot on a branch
    ///
    /// The first commit of a content item creates its primary branch.
    /// Later commits fail with `StaleHead` if the branch moved past
    /// `expected_head`.
    pub async fn commit_changes(
        &self,
        content_id: &str,
        request: CommitRequest,
        actor_id: &str,
    ) -> Result<Version> {
        require("content_id", content_id)?;
        require("author_id", actor_id)?;
        require("message", &request.message)?;
        let branch_name = request
            .branch
            .unwrap_or_else(|| self.config.default_branch.clone());
        validate_branch_name(&branch_name)?;

        let mut draft = NewVersion {
            content_id: content_id.to_string(),
            branch_name,
            data: request.data,
            commit_message: request.message,
            author_id: actor_id.to_string(),
            parent_version_id: None,
            merge_parent_id: None,
        };

        if !self.branches.has_content(content_id).await {
            if let Some(expected) = request.expected_head {
                return Err(VcsError::StaleHead {
                    branch: draft.branch_name,
                    expected: expected.to_string(),
                    actual: "<none>".to_string(),
                });
            }
            let (version, _) = self.writer.commit_initial(draft).await?;
            return Ok(version);
        }

        let parent = match request.expected_head {
            Some(expected) => expected,
            None => {
                self.branches
                    .get_head(content_id, &draft.branch_name)
                    .await?
            }
        };
        draft.parent_version_id = Some(parent);
        self.writer.commit_on_branch(draft, CommitKind::Commit).await
    }

    pub async fn get_version(&self, content_id: &str, version_id: &VersionId) -> Result<Version> {
        self.store.get_for_content(content_id, version_id).await
    }

    /// Structural diff between two versions of the same content item
    pub async fn get_version_diff(
        &self,
        content_id: &str,
        version_a: &VersionId,
        version_b: &VersionId,
    ) -> Result<Diff> {
        let a = self.store.get_for_content(content_id, version_a).await?;
        let b = self.store.get_for_content(content_id, version_b).await?;
        Ok(self.diff.diff(&a, &b).as_ref().clone())
    }

    /// Versions reachable from a branch head, newest first
    pub async fn get_version_history(&self, content_id: &str, branch: &str) -> Result<Vec<Version>> {
        let head = self.branches.get_head(content_id, branch).await?;
        self.store.history(&head).await
    }

    pub async fn get_version_history_page(
        &self,
        content_id: &str,
        branch: &str,
        after: Option<VersionId>,
        limit: usize,
    ) -> Result<HistoryPage> {
        let head = self.branches.get_head(content_id, branch).await?;
        self.store.history_page(&head, after, limit).await
    }

    // ── Branches ───────────────────────────────────────────────

    pub async fn create_branch(
        &self,
        content_id: &str,
        request: CreateBranchRequest,
        actor_id: &str,
    ) -> Result<Branch> {
        require("content_id", content_id)?;
        require("created_by", actor_id)?;
        validate_branch_name(&request.branch_name)?;
        if !self.store.has_versions(content_id).await {
            return Err(VcsError::NoVersions(content_id.to_string()));
        }

        let from = match request.from_version {
            Some(id) => id,
            None => {
                let primary = self.branches.primary_branch(content_id).await?;
                self.branches.get_head(content_id, &primary).await?
            }
        };
        if !self.store.contains(content_id, &from).await {
            return Err(VcsError::not_found("Version", from));
        }

        self.branches
            .create_branch(
                content_id,
                &request.branch_name,
                from,
                request.description,
                actor_id,
            )
            .await
    }

    pub async fn get_branches(&self, content_id: &str) -> Result<Vec<Branch>> {
        self.ensure_content(content_id).await?;
        Ok(self.branches.list_branches(content_id).await)
    }

    pub async fn primary_branch(&self, content_id: &str) -> Result<String> {
        self.branches.primary_branch(content_id).await
    }

    pub async fn get_head(&self, content_id: &str, branch: &str) -> Result<VersionId> {
        self.branches.get_head(content_id, branch).await
    }

    pub async fn delete_branch(&self, content_id: &str, branch: &str) -> Result<Branch> {
        self.ensure_content(content_id).await?;
        self.branches.delete_branch(content_id, branch).await
    }

    // ── Merges ─────────────────────────────────────────────────

    pub async fn merge_branches(
        &self,
        content_id: &str,
        request: MergeBranchesRequest,
        actor_id: &str,
    ) -> Result<MergeRequest> {
        require("actor_id", actor_id)?;
        self.ensure_content(content_id).await?;
        self.merges
            .merge_branches(
                content_id,
                &request.source_branch,
                &request.target_branch,
                &request.message,
                actor_id,
            )
            .await
    }

    pub async fn resolve_merge(
        &self,
        content_id: &str,
        request: ResolveMergeRequest,
        actor_id: &str,
    ) -> Result<MergeRequest> {
        require("actor_id", actor_id)?;
        self.merges
            .resolve_merge(content_id, request.merge_id, request.resolutions, actor_id)
            .await
    }

    pub async fn reject_merge(&self, content_id: &str, merge_id: Uuid) -> Result<MergeRequest> {
        self.merges.reject_merge(content_id, merge_id).await
    }

    pub async fn get_merge_request(&self, content_id: &str, merge_id: Uuid) -> Result<MergeRequest> {
        self.merges.get_merge_request(content_id, merge_id).await
    }

    pub async fn get_merge_requests(&self, content_id: &str) -> Result<Vec<MergeRequest>> {
        self.ensure_content(content_id).await?;
        Ok(self.merges.list_merge_requests(content_id).await)
    }

    // ── Revert ─────────────────────────────────────────────────

    pub async fn revert_to_version(
        &self,
        content_id: &str,
        request: RevertRequest,
        actor_id: &str,
    ) -> Result<Version> {
        require("actor_id", actor_id)?;
        self.ensure_content(content_id).await?;
        let branch = self.branch_or_primary(content_id, request.branch).await?;
        self.reverts
            .revert_to_version(content_id, &branch, &request.version_id, actor_id)
            .await
    }

    // ── Backups ────────────────────────────────────────────────

    pub async fn create_backup(
        &self,
        content_id: &str,
        request: CreateBackupRequest,
    ) -> Result<BackupRecord> {
        require("content_id", content_id)?;
        if !self.store.has_versions(content_id).await {
            return Err(VcsError::NoVersions(content_id.to_string()));
        }
        self.backups
            .create_backup(content_id, request.backup_type)
            .await
    }

    pub async fn restore_from_backup(
        &self,
        content_id: &str,
        request: RestoreRequest,
        actor_id: &str,
    ) -> Result<Version> {
        require("actor_id", actor_id)?;
        self.ensure_content(content_id).await?;
        match request.branch {
            Some(branch) => {
                self.backups
                    .restore_branch_from_backup(content_id, request.backup_id, &branch, actor_id)
                    .await
            }
            None => {
                self.backups
                    .restore_from_backup(content_id, request.backup_id, actor_id)
                    .await
            }
        }
    }

    pub async fn get_backups(&self, content_id: &str) -> Result<Vec<BackupRecord>> {
        self.ensure_content(content_id).await?;
        Ok(self.backups.list_backups(content_id).await)
    }

    /// One pass of the scheduled-backup job over every content item
    pub async fn run_scheduled_backups(&self) -> Vec<BackupRecord> {
        self.backups.run_scheduled().await
    }

    // ── State ──────────────────────────────────────────────────

    pub async fn content_ids(&self) -> Vec<String> {
        self.store.content_ids().await
    }

    /// Copy of the full repository state
    pub async fn snapshot(&self) -> RepositorySnapshot {
        let (versions, version_counters) = self.store.export().await;
        RepositorySnapshot {
            versions,
            version_counters,
            branches: self.branches.export().await,
            merge_requests: self.merges.export().await,
            backups: self.backups.export().await,
        }
    }

    /// Save the current state to the attached snapshot store, if any
    pub async fn persist(&self) -> Result<()> {
        let Some(store) = &self.persistence else {
            return Ok(());
        };
        let snapshot = self.snapshot().await;
        store
            .save(&snapshot)
            .await
            .map_err(|e| VcsError::Storage(format!("{:#}", e)))
    }
}
