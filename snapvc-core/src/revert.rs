//! Revert a branch to an earlier version's content
//!
//! A revert is an ordinary forward commit whose data is copied from the
//! target version. History is never rewritten.

use crate::branch::BranchRegistry;
use crate::error::Result;
use crate::object::{CommitKind, NewVersion, Version, VersionId};
use crate::version_store::VersionStore;
use crate::writer::HeadWriter;
use std::sync::Arc;

pub struct RevertCoordinator {
    store: Arc<VersionStore>,
    branches: Arc<BranchRegistry>,
    writer: Arc<HeadWriter>,
}

impl RevertCoordinator {
    pub(crate) fn new(
        store: Arc<VersionStore>,
        branches: Arc<BranchRegistry>,
        writer: Arc<HeadWriter>,
    ) -> Self {
        Self {
            store,
            branches,
            writer,
        }
    }

    /// Commit `target_version_id`'s data as the new head of `branch_name`
    pub async fn revert_to_version(
        &self,
        content_id: &str,
        branch_name: &str,
        target_version_id: &VersionId,
        actor_id: &str,
    ) -> Result<Version> {
        let target = self
            .store
            .get_for_content(content_id, target_version_id)
            .await?;
        let head = self.branches.get_head(content_id, branch_name).await?;

        tracing::info!(
            content_id,
            branch = branch_name,
            target = target.version_number,
            "Reverting branch"
        );
        self.writer
            .commit_on_branch(
                NewVersion {
                    content_id: content_id.to_string(),
                    branch_name: branch_name.to_string(),
                    data: target.data,
                    commit_message: format!("Revert to version {}", target.version_number),
                    author_id: actor_id.to_string(),
                    parent_version_id: Some(head),
                    merge_parent_id: None,
                },
                CommitKind::Revert,
            )
            .await
    }
}
