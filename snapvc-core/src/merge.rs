//! Three-way merge and merge-request lifecycle
//!
//! A merge diffs both branch heads against their merge base. Paths changed on
//! one side only are taken from that side; paths changed identically on both
//! sides are taken once; anything else is a conflict. Conflicts are a normal
//! outcome: the request is stored with status `conflict` and the target
//! branch is left alone until [`MergeCoordinator::resolve_merge`] supplies
//! values.

use crate::branch::BranchRegistry;
use crate::clock::Clock;
use crate::diff::{Change, ChangeType, DiffEngine};
use crate::document::{DocPath, Document, PathError};
use crate::error::{Result, VcsError};
use crate::object::{CommitKind, NewVersion, Version, VersionId};
use crate::version_store::VersionStore;
use crate::writer::HeadWriter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    Pending,
    Merged,
    Conflict,
    Rejected,
}

impl std::fmt::Display for MergeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MergeStatus::Pending => "pending",
            MergeStatus::Merged => "merged",
            MergeStatus::Conflict => "conflict",
            MergeStatus::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// A path both sides changed incompatibly. A `None` value means the side
/// deleted the path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConflict {
    pub path: DocPath,
    pub source_value: Option<Document>,
    pub target_value: Option<Document>,
}

/// Record of an attempt to combine two branches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub merge_id: Uuid,
    pub content_id: String,
    pub source_branch: String,
    pub target_branch: String,
    pub merge_message: String,
    pub status: MergeStatus,
    #[serde(default)]
    pub conflicts: Vec<MergeConflict>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub base_version_id: VersionId,
    pub source_head: VersionId,
    pub target_head: VersionId,
    /// Version committed on the target; None while unresolved or when the
    /// target already contained the source
    pub merged_version_id: Option<VersionId>,
}

/// Result of combining two change sets
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// Target document with every non-conflicting source change applied
    pub merged: Document,
    pub conflicts: Vec<MergeConflict>,
}

/// Merge `source_changes` into `target`, given both sides' changes against
/// the same base
pub fn three_way_merge(
    source: &Document,
    target: &Document,
    source_changes: &[Change],
    target_changes: &[Change],
) -> MergeOutcome {
    let target_by_path: HashMap<&DocPath, &Change> =
        target_changes.iter().map(|c| (&c.path, c)).collect();
    let mut conflicts: BTreeMap<DocPath, MergeConflict> = BTreeMap::new();
    let mut to_apply: Vec<&Change> = Vec::new();

    for change in source_changes {
        if let Some(theirs) = target_by_path.get(&change.path) {
            if !change.same_outcome(theirs) {
                conflicts.insert(
                    change.path.clone(),
                    MergeConflict {
                        path: change.path.clone(),
                        source_value: change.new_value.clone(),
                        target_value: theirs.new_value.clone(),
                    },
                );
            }
            continue;
        }

        // One side replaced a whole subtree the other side edited inside
        let overlap = target_changes.iter().find_map(|theirs| {
            if change.path.is_descendant_of(&theirs.path) {
                Some(theirs.path.clone())
            } else if theirs.path.is_descendant_of(&change.path) {
                Some(change.path.clone())
            } else {
                None
            }
        });
        if let Some(path) = overlap {
            conflicts.entry(path.clone()).or_insert_with(|| MergeConflict {
                source_value: source.get(&path).cloned(),
                target_value: target.get(&path).cloned(),
                path,
            });
            continue;
        }

        to_apply.push(change);
    }

    // Additions and edits in canonical order, then removals from the back so
    // every removal hits the current tail of its sequence
    let mut merged = target.clone();
    let (removals, writes): (Vec<&Change>, Vec<&Change>) = to_apply
        .into_iter()
        .partition(|c| c.change_type == ChangeType::Deleted);

    for change in writes {
        let value = change.new_value.clone().unwrap_or(Document::Null);
        if merged.set(&change.path, value).is_err() {
            conflicts.entry(change.path.clone()).or_insert_with(|| MergeConflict {
                path: change.path.clone(),
                source_value: change.new_value.clone(),
                target_value: target.get(&change.path).cloned(),
            });
        }
    }
    for change in removals.into_iter().rev() {
        if merged.remove(&change.path).is_err() {
            conflicts.entry(change.path.clone()).or_insert_with(|| MergeConflict {
                path: change.path.clone(),
                source_value: None,
                target_value: target.get(&change.path).cloned(),
            });
        }
    }

    MergeOutcome {
        merged,
        conflicts: conflicts.into_values().collect(),
    }
}

/// Write the chosen conflict values into `merged`
///
/// Values go in path order, and a value for an index past the end of a
/// sequence is appended to it. Deletions run back to front; deleting a path
/// `merged` no longer has is already satisfied.
fn apply_resolutions(
    merged: &mut Document,
    resolutions: BTreeMap<DocPath, Option<Document>>,
) -> Result<()> {
    let rejected = |path: &DocPath, e: PathError| {
        VcsError::Validation(format!("cannot apply resolution for {}: {}", path, e))
    };

    let mut removals = Vec::new();
    for (path, value) in resolutions {
        let Some(value) = value else {
            removals.push(path);
            continue;
        };
        match merged.set(&path, value.clone()) {
            Ok(()) => {}
            Err(PathError::OutOfBounds { len, .. }) => {
                let end = match path.parent() {
                    Some(parent) => parent.index(len),
                    None => {
                        return Err(VcsError::Validation(format!("cannot append at {}", path)));
                    }
                };
                merged.set(&end, value).map_err(|e| rejected(&path, e))?;
            }
            Err(e) => return Err(rejected(&path, e)),
        }
    }

    for path in removals.into_iter().rev() {
        match merged.remove(&path) {
            Ok(_) | Err(PathError::Missing(_)) => {}
            Err(e) => return Err(rejected(&path, e)),
        }
    }
    Ok(())
}

/// Owner of all [`MergeRequest`] records
pub struct MergeCoordinator {
    store: Arc<VersionStore>,
    branches: Arc<BranchRegistry>,
    diff: Arc<DiffEngine>,
    writer: Arc<HeadWriter>,
    requests: Arc<RwLock<HashMap<Uuid, MergeRequest>>>,
    clock: Arc<dyn Clock>,
}

impl MergeCoordinator {
    pub(crate) fn new(
        store: Arc<VersionStore>,
        branches: Arc<BranchRegistry>,
        diff: Arc<DiffEngine>,
        writer: Arc<HeadWriter>,
        clock: Arc<dyn Clock>,
        requests: Vec<MergeRequest>,
    ) -> Self {
        Self {
            store,
            branches,
            diff,
            writer,
            requests: Arc::new(RwLock::new(
                requests.into_iter().map(|r| (r.merge_id, r)).collect(),
            )),
            clock,
        }
    }

    /// Combine `source_branch` into `target_branch`
    pub async fn merge_branches(
        &self,
        content_id: &str,
        source_branch: &str,
        target_branch: &str,
        merge_message: &str,
        actor_id: &str,
    ) -> Result<MergeRequest> {
        if source_branch == target_branch {
            return Err(VcsError::InvalidMerge(format!(
                "cannot merge branch {:?} into itself",
                source_branch
            )));
        }
        let source_head = self.branches.get_head(content_id, source_branch).await?;
        let target_head = self.branches.get_head(content_id, target_branch).await?;

        let base_id = self
            .store
            .merge_base(&source_head, &target_head)
            .await?
            .ok_or_else(|| {
                VcsError::InvalidMerge(format!(
                    "branches {:?} and {:?} share no history",
                    source_branch, target_branch
                ))
            })?;

        let mut request = MergeRequest {
            merge_id: Uuid::new_v4(),
            content_id: content_id.to_string(),
            source_branch: source_branch.to_string(),
            target_branch: target_branch.to_string(),
            merge_message: merge_message.to_string(),
            status: MergeStatus::Pending,
            conflicts: Vec::new(),
            created_by: actor_id.to_string(),
            created_at: self.clock.now(),
            resolved_at: None,
            base_version_id: base_id,
            source_head,
            target_head,
            merged_version_id: None,
        };

        if base_id == source_head {
            tracing::info!(
                content_id,
                source = source_branch,
                target = target_branch,
                "Target already contains source"
            );
            request.status = MergeStatus::Merged;
            request.resolved_at = Some(self.clock.now());
            return Ok(self.finish(request).await);
        }

        let (outcome, source) = self.combine(&request).await?;
        if outcome.conflicts.is_empty() {
            let version = self
                .commit_merge(&request, &source, outcome.merged, actor_id)
                .await?;
            request.status = MergeStatus::Merged;
            request.resolved_at = Some(self.clock.now());
            request.merged_version_id = Some(version.version_id);
        } else {
            tracing::info!(
                content_id,
                source = source_branch,
                target = target_branch,
                conflicts = outcome.conflicts.len(),
                "Merge produced conflicts"
            );
            request.status = MergeStatus::Conflict;
            request.conflicts = outcome.conflicts;
        }
        Ok(self.finish(request).await)
    }

    /// Complete a conflicted merge with caller-supplied values
    ///
    /// Every conflicting path needs an entry; `None` deletes the path.
    /// Deleting a path the merged document lacks is accepted, and a value
    /// past the end of a sequence is appended.
    pub async fn resolve_merge(
        &self,
        content_id: &str,
        merge_id: Uuid,
        resolutions: BTreeMap<DocPath, Option<Document>>,
        actor_id: &str,
    ) -> Result<MergeRequest> {
        let mut request = self.get_merge_request(content_id, merge_id).await?;
        if request.status != MergeStatus::Conflict {
            return Err(VcsError::InvalidMerge(format!(
                "merge {} is {}, only conflicted merges can be resolved",
                merge_id, request.status
            )));
        }

        let missing: Vec<String> = request
            .conflicts
            .iter()
            .filter(|c| !resolutions.contains_key(&c.path))
            .map(|c| c.path.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(VcsError::Validation(format!(
                "unresolved conflict paths: {}",
                missing.join(", ")
            )));
        }
        let extra: Vec<String> = resolutions
            .keys()
            .filter(|p| !request.conflicts.iter().any(|c| &c.path == *p))
            .map(|p| p.to_string())
            .collect();
        if !extra.is_empty() {
            return Err(VcsError::Validation(format!(
                "resolutions for paths without conflicts: {}",
                extra.join(", ")
            )));
        }

        let current = self
            .branches
            .get_head(content_id, &request.target_branch)
            .await?;
        if current != request.target_head {
            return Err(VcsError::StaleHead {
                branch: request.target_branch.clone(),
                expected: request.target_head.to_string(),
                actual: current.to_string(),
            });
        }

        let (outcome, source) = self.combine(&request).await?;
        let mut merged = outcome.merged;
        apply_resolutions(&mut merged, resolutions)?;

        let version = self
            .commit_merge(&request, &source, merged, actor_id)
            .await?;
        request.status = MergeStatus::Merged;
        request.resolved_at = Some(self.clock.now());
        request.merged_version_id = Some(version.version_id);
        tracing::info!(content_id, %merge_id, "Resolved conflicted merge");
        Ok(self.finish(request).await)
    }

    /// Abandon a merge request without touching the target branch
    pub async fn reject_merge(&self, content_id: &str, merge_id: Uuid) -> Result<MergeRequest> {
        let mut requests = self.requests.write().await;
        let request = requests
            .get_mut(&merge_id)
            .filter(|r| r.content_id == content_id)
            .ok_or_else(|| VcsError::not_found("Merge request", merge_id))?;

        if !matches!(request.status, MergeStatus::Conflict | MergeStatus::Pending) {
            return Err(VcsError::InvalidMerge(format!(
                "merge {} is {} and cannot be rejected",
                merge_id, request.status
            )));
        }
        request.status = MergeStatus::Rejected;
        request.resolved_at = Some(self.clock.now());
        tracing::info!(content_id, %merge_id, "Rejected merge");
        Ok(request.clone())
    }

    pub async fn get_merge_request(&self, content_id: &str, merge_id: Uuid) -> Result<MergeRequest> {
        self.requests
            .read()
            .await
            .get(&merge_id)
            .filter(|r| r.content_id == content_id)
            .cloned()
            .ok_or_else(|| VcsError::not_found("Merge request", merge_id))
    }

    /// Merge requests of a content item, newest first
    pub async fn list_merge_requests(&self, content_id: &str) -> Vec<MergeRequest> {
        let mut list: Vec<MergeRequest> = self
            .requests
            .read()
            .await
            .values()
            .filter(|r| r.content_id == content_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    /// Copy out every merge request for persistence
    pub async fn export(&self) -> Vec<MergeRequest> {
        let mut list: Vec<MergeRequest> = self.requests.read().await.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    /// Diff both heads against the recorded base and combine the changes
    async fn combine(&self, request: &MergeRequest) -> Result<(MergeOutcome, Version)> {
        let base = self.store.get(&request.base_version_id).await?;
        let source = self.store.get(&request.source_head).await?;
        let target = self.store.get(&request.target_head).await?;

        let source_diff = self.diff.diff(&base, &source);
        let target_diff = self.diff.diff(&base, &target);
        let outcome = three_way_merge(
            &source.data,
            &target.data,
            &source_diff.changes,
            &target_diff.changes,
        );
        Ok((outcome, source))
    }

    async fn commit_merge(
        &self,
        request: &MergeRequest,
        source: &Version,
        merged: Document,
        actor_id: &str,
    ) -> Result<Version> {
        let message = if request.merge_message.trim().is_empty() {
            format!(
                "Merge branch '{}' into '{}'",
                request.source_branch, request.target_branch
            )
        } else {
            request.merge_message.clone()
        };
        self.writer
            .commit_on_branch(
                NewVersion {
                    content_id: request.content_id.clone(),
                    branch_name: request.target_branch.clone(),
                    data: merged,
                    commit_message: message,
                    author_id: actor_id.to_string(),
                    parent_version_id: Some(request.target_head),
                    merge_parent_id: Some(source.version_id),
                },
                CommitKind::Merge,
            )
            .await
    }

    /// Store the request and notify the post-merge hook
    async fn finish(&self, request: MergeRequest) -> MergeRequest {
        self.requests
            .write()
            .await
            .insert(request.merge_id, request.clone());
        if let Some(hooks) = self.writer.hooks() {
            hooks.run_post_merge(
                &request.content_id,
                &request.merge_id.to_string(),
                &request.source_branch,
                &request.target_branch,
                &request.status.to_string(),
            )
            .await;
        }
        request
    }
}
