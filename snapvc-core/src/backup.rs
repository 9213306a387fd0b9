//! Retention-bounded backups
//!
//! A backup records which versions were the branch heads at a point in
//! time. It lives outside the branch graph: restoring commits the captured
//! data as a new version and never rewinds history. Expiry is checked
//! lazily on list and restore; records are never deleted.

use crate::branch::BranchRegistry;
use crate::clock::Clock;
use crate::config::BackupScope;
use crate::error::{Result, VcsError};
use crate::object::{CommitKind, NewVersion, Version, VersionId};
use crate::version_store::VersionStore;
use crate::writer::HeadWriter;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupType {
    Manual,
    Scheduled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub backup_id: Uuid,
    pub content_id: String,
    /// Captured head of `branch_name`
    pub version_id: VersionId,
    /// Primary branch at capture time; the default restore target
    pub branch_name: String,
    /// Every captured head, keyed by branch
    pub branch_heads: BTreeMap<String, VersionId>,
    pub backup_type: BackupType,
    pub created_at: DateTime<Utc>,
    pub retention_until: DateTime<Utc>,
}

impl BackupRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.retention_until
    }
}

/// Retention and scope applied to new backups
#[derive(Debug, Clone, Copy)]
pub struct BackupPolicy {
    pub retention: Duration,
    pub scope: BackupScope,
}

impl Default for BackupPolicy {
    fn default() -> Self {
        Self {
            retention: Duration::days(30),
            scope: BackupScope::PrimaryBranch,
        }
    }
}

/// Owner of all [`BackupRecord`]s
pub struct BackupManager {
    store: Arc<VersionStore>,
    branches: Arc<BranchRegistry>,
    writer: Arc<HeadWriter>,
    records: Arc<RwLock<HashMap<Uuid, BackupRecord>>>,
    policy: BackupPolicy,
    clock: Arc<dyn Clock>,
}

impl BackupManager {
    pub(crate) fn new(
        store: Arc<VersionStore>,
        branches: Arc<BranchRegistry>,
        writer: Arc<HeadWriter>,
        policy: BackupPolicy,
        clock: Arc<dyn Clock>,
        records: Vec<BackupRecord>,
    ) -> Self {
        Self {
            store,
            branches,
            writer,
            records: Arc::new(RwLock::new(
                records.into_iter().map(|r| (r.backup_id, r)).collect(),
            )),
            policy,
            clock,
        }
    }

    /// Capture the current head(s) of a content item
    pub async fn create_backup(
        &self,
        content_id: &str,
        backup_type: BackupType,
    ) -> Result<BackupRecord> {
        let primary = self.branches.primary_branch(content_id).await?;
        let version_id = self.branches.get_head(content_id, &primary).await?;

        let branch_heads: BTreeMap<String, VersionId> = match self.policy.scope {
            BackupScope::PrimaryBranch => BTreeMap::from([(primary.clone(), version_id)]),
            BackupScope::AllBranches => self
                .branches
                .list_branches(content_id)
                .await
                .into_iter()
                .map(|b| (b.branch_name, b.head_version_id))
                .collect(),
        };

        let created_at = self.clock.now();
        let record = BackupRecord {
            backup_id: Uuid::new_v4(),
            content_id: content_id.to_string(),
            version_id,
            branch_name: primary,
            branch_heads,
            backup_type,
            created_at,
            retention_until: created_at + self.policy.retention,
        };
        self.records
            .write()
            .await
            .insert(record.backup_id, record.clone());

        tracing::info!(
            content_id,
            backup_id = %record.backup_id,
            ?backup_type,
            branches = record.branch_heads.len(),
            "Created backup"
        );
        Ok(record)
    }

    /// Restore the backup's primary head onto the branch it came from
    pub async fn restore_from_backup(
        &self,
        content_id: &str,
        backup_id: Uuid,
        actor_id: &str,
    ) -> Result<Version> {
        let record = self.live_record(content_id, backup_id).await?;
        self.restore(&record, &record.branch_name, actor_id).await
    }

    /// Restore one of the captured heads onto its branch
    pub async fn restore_branch_from_backup(
        &self,
        content_id: &str,
        backup_id: Uuid,
        branch_name: &str,
        actor_id: &str,
    ) -> Result<Version> {
        let record = self.live_record(content_id, backup_id).await?;
        self.restore(&record, branch_name, actor_id).await
    }

    /// Look up an unexpired record of `content_id`
    async fn live_record(&self, content_id: &str, backup_id: Uuid) -> Result<BackupRecord> {
        let record = self
            .records
            .read()
            .await
            .get(&backup_id)
            .filter(|r| r.content_id == content_id)
            .cloned()
            .ok_or_else(|| VcsError::not_found("Backup", backup_id))?;

        if record.is_expired(self.clock.now()) {
            tracing::warn!(content_id, %backup_id, "Refusing to restore expired backup");
            return Err(VcsError::ExpiredBackup {
                backup_id: backup_id.to_string(),
                retention_until: record.retention_until,
            });
        }
        Ok(record)
    }

    async fn restore(
        &self,
        record: &BackupRecord,
        branch_name: &str,
        actor_id: &str,
    ) -> Result<Version> {
        let content_id = record.content_id.as_str();
        let captured = record
            .branch_heads
            .get(branch_name)
            .ok_or_else(|| VcsError::not_found("Captured branch", branch_name))?;
        let snapshot = self.store.get_for_content(content_id, captured).await?;
        let head = self.branches.get_head(content_id, branch_name).await?;

        tracing::info!(
            content_id,
            backup_id = %record.backup_id,
            branch = branch_name,
            "Restoring backup"
        );
        self.writer
            .commit_on_branch(
                NewVersion {
                    content_id: content_id.to_string(),
                    branch_name: branch_name.to_string(),
                    data: snapshot.data,
                    commit_message: format!("Restore from backup {}", record.backup_id),
                    author_id: actor_id.to_string(),
                    parent_version_id: Some(head),
                    merge_parent_id: None,
                },
                CommitKind::Restore,
            )
            .await
    }

    /// Unexpired backups of a content item, newest first
    pub async fn list_backups(&self, content_id: &str) -> Vec<BackupRecord> {
        let now = self.clock.now();
        let mut list: Vec<BackupRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.content_id == content_id && !r.is_expired(now))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    /// Create a scheduled backup for every content item
    ///
    /// Failures are logged per content item and do not stop the run.
    pub async fn run_scheduled(&self) -> Vec<BackupRecord> {
        let mut created = Vec::new();
        for content_id in self.store.content_ids().await {
            match self.create_backup(&content_id, BackupType::Scheduled).await {
                Ok(record) => created.push(record),
                Err(e) => {
                    tracing::warn!(content_id = %content_id, error = %e, "Scheduled backup failed")
                }
            }
        }
        created
    }

    /// Copy out every record, expired ones included, for persistence
    pub async fn export(&self) -> Vec<BackupRecord> {
        let mut list: Vec<BackupRecord> = self.records.read().await.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }
}
