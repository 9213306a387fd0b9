//! Branch registry
//!
//! Branches are named, mutable pointers into a content item's version graph.
//! [`BranchRegistry::advance_head`] is the only way a head moves; every write
//! path funnels through it.

use crate::clock::Clock;
use crate::error::{Result, VcsError};
use crate::object::VersionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Longest accepted branch name
pub const MAX_BRANCH_NAME_LEN: usize = 100;

/// Named pointer to a version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub branch_id: Uuid,
    pub content_id: String,
    pub branch_name: String,
    pub head_version_id: VersionId,
    /// Version the branch was created at
    pub created_from: VersionId,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
}

/// Persisted branch table of one content item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBranches {
    pub content_id: String,
    /// Branch created by the content item's first commit
    pub primary_branch: String,
    pub branches: Vec<Branch>,
}

struct BranchTable {
    primary: String,
    branches: BTreeMap<String, Branch>,
}

/// Check a branch name against the naming policy
///
/// Names are non-empty, at most [`MAX_BRANCH_NAME_LEN`] characters of
/// `[A-Za-z0-9._/-]`, and shaped like a path (`feature/x`) without empty or
/// dot-dot components.
pub fn validate_branch_name(name: &str) -> Result<()> {
    let reject = |reason: &str| {
        Err(VcsError::Validation(format!(
            "invalid branch name {:?}: {}",
            name, reason
        )))
    };

    if name.is_empty() {
        return reject("name is empty");
    }
    if name.chars().count() > MAX_BRANCH_NAME_LEN {
        return reject("name is too long");
    }
    if name.chars().any(char::is_whitespace) {
        return reject("name contains whitespace");
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-')))
    {
        return reject(&format!("character {:?} is not allowed", bad));
    }
    if name.starts_with(['-', '.', '/']) {
        return reject("name must start with a letter, digit or '_'");
    }
    if name.ends_with(['/', '.']) {
        return reject("name must not end with '/' or '.'");
    }
    if name.contains("..") || name.contains("//") {
        return reject("name must not contain '..' or '//'");
    }
    Ok(())
}

/// Owner of all [`Branch`] records
pub struct BranchRegistry {
    tables: Arc<RwLock<HashMap<String, BranchTable>>>,
    clock: Arc<dyn Clock>,
}

impl BranchRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Rebuild the registry from persisted tables
    pub fn from_parts(clock: Arc<dyn Clock>, contents: Vec<ContentBranches>) -> Self {
        let tables = contents
            .into_iter()
            .map(|content| {
                let branches = content
                    .branches
                    .into_iter()
                    .map(|b| (b.branch_name.clone(), b))
                    .collect();
                (
                    content.content_id,
                    BranchTable {
                        primary: content.primary_branch,
                        branches,
                    },
                )
            })
            .collect();
        Self {
            tables: Arc::new(RwLock::new(tables)),
            clock,
        }
    }

    fn new_branch(
        &self,
        content_id: &str,
        branch_name: &str,
        from: VersionId,
        description: String,
        created_by: &str,
    ) -> Branch {
        Branch {
            branch_id: Uuid::new_v4(),
            content_id: content_id.to_string(),
            branch_name: branch_name.to_string(),
            head_version_id: from,
            created_from: from,
            created_by: created_by.to_string(),
            created_at: self.clock.now(),
            description,
        }
    }

    /// Whether the content item has been initialized by a first commit
    pub async fn has_content(&self, content_id: &str) -> bool {
        self.tables.read().await.contains_key(content_id)
    }

    /// Create the primary branch for a content item's first version
    ///
    /// Losing a race against another first commit yields `StaleHead`.
    pub async fn init_branch(
        &self,
        content_id: &str,
        branch_name: &str,
        first_version: VersionId,
        created_by: &str,
    ) -> Result<Branch> {
        validate_branch_name(branch_name)?;
        let mut tables = self.tables.write().await;
        if let Some(table) = tables.get(content_id) {
            let actual = table
                .branches
                .get(branch_name)
                .map(|b| b.head_version_id.to_string())
                .unwrap_or_else(|| "<initialized>".to_string());
            return Err(VcsError::StaleHead {
                branch: branch_name.to_string(),
                expected: "<none>".to_string(),
                actual,
            });
        }

        let branch = self.new_branch(
            content_id,
            branch_name,
            first_version,
            "Primary branch".to_string(),
            created_by,
        );
        tables.insert(
            content_id.to_string(),
            BranchTable {
                primary: branch_name.to_string(),
                branches: BTreeMap::from([(branch_name.to_string(), branch.clone())]),
            },
        );
        tracing::info!(content_id, branch = branch_name, "Initialized primary branch");
        Ok(branch)
    }

    /// Create a branch at `from_version`
    ///
    /// The caller is responsible for checking that `from_version` belongs
    /// to the content item.
    pub async fn create_branch(
        &self,
        content_id: &str,
        branch_name: &str,
        from_version: VersionId,
        description: String,
        created_by: &str,
    ) -> Result<Branch> {
        validate_branch_name(branch_name)?;
        let mut tables = self.tables.write().await;
        let table = tables
            .get_mut(content_id)
            .ok_or_else(|| VcsError::NoVersions(content_id.to_string()))?;

        if table.branches.contains_key(branch_name) {
            return Err(VcsError::Validation(format!(
                "branch {:?} already exists for content {}",
                branch_name, content_id
            )));
        }

        let branch =
            self.new_branch(content_id, branch_name, from_version, description, created_by);
        table
            .branches
            .insert(branch_name.to_string(), branch.clone());
        tracing::info!(
            content_id,
            branch = branch_name,
            from = %from_version.short(),
            "Created branch"
        );
        Ok(branch)
    }

    /// Remove a branch pointer; its versions stay in the store
    pub async fn delete_branch(&self, content_id: &str, branch_name: &str) -> Result<Branch> {
        let mut tables = self.tables.write().await;
        let table = tables
            .get_mut(content_id)
            .ok_or_else(|| VcsError::not_found("Branch", branch_name))?;
        if table.primary == branch_name {
            return Err(VcsError::Validation(format!(
                "cannot delete primary branch {:?}",
                branch_name
            )));
        }
        let removed = table
            .branches
            .remove(branch_name)
            .ok_or_else(|| VcsError::not_found("Branch", branch_name))?;
        tracing::info!(content_id, branch = branch_name, "Deleted branch");
        Ok(removed)
    }

    /// All branches of a content item, sorted by name
    pub async fn list_branches(&self, content_id: &str) -> Vec<Branch> {
        self.tables
            .read()
            .await
            .get(content_id)
            .map(|table| table.branches.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn get_branch(&self, content_id: &str, branch_name: &str) -> Result<Branch> {
        self.tables
            .read()
            .await
            .get(content_id)
            .and_then(|table| table.branches.get(branch_name))
            .cloned()
            .ok_or_else(|| VcsError::not_found("Branch", branch_name))
    }

    /// Current head of a branch
    pub async fn get_head(&self, content_id: &str, branch_name: &str) -> Result<VersionId> {
        Ok(self.get_branch(content_id, branch_name).await?.head_version_id)
    }

    /// Name of the content item's primary branch
    pub async fn primary_branch(&self, content_id: &str) -> Result<String> {
        self.tables
            .read()
            .await
            .get(content_id)
            .map(|table| table.primary.clone())
            .ok_or_else(|| VcsError::NoVersions(content_id.to_string()))
    }

    /// Atomically move a branch head from `expected_head` to `new_head`
    pub async fn advance_head(
        &self,
        content_id: &str,
        branch_name: &str,
        expected_head: VersionId,
        new_head: VersionId,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let branch = tables
            .get_mut(content_id)
            .and_then(|table| table.branches.get_mut(branch_name))
            .ok_or_else(|| VcsError::not_found("Branch", branch_name))?;

        if branch.head_version_id != expected_head {
            tracing::warn!(
                content_id,
                branch = branch_name,
                expected = %expected_head.short(),
                actual = %branch.head_version_id.short(),
                "Head CAS lost"
            );
            return Err(VcsError::StaleHead {
                branch: branch_name.to_string(),
                expected: expected_head.to_string(),
                actual: branch.head_version_id.to_string(),
            });
        }

        branch.head_version_id = new_head;
        tracing::debug!(
            content_id,
            branch = branch_name,
            head = %new_head.short(),
            "Advanced head"
        );
        Ok(())
    }

    /// Copy out every branch table for persistence
    pub async fn export(&self) -> Vec<ContentBranches> {
        let tables = self.tables.read().await;
        let mut contents: Vec<ContentBranches> = tables
            .iter()
            .map(|(content_id, table)| ContentBranches {
                content_id: content_id.clone(),
                primary_branch: table.primary.clone(),
                branches: table.branches.values().cloned().collect(),
            })
            .collect();
        contents.sort_by(|a, b| a.content_id.cmp(&b.content_id));
        contents
    }
}
