//! Head writer
//!
//! Every operation that produces a version (commit, merge, revert, restore)
//! goes through [`HeadWriter`]: pre-commit hook, store insert, branch CAS,
//! and rollback of the inserted version when the CAS is lost.

use crate::branch::{Branch, BranchRegistry};
use crate::error::{Result, VcsError};
use crate::hooks::{HookManager, PendingCommit};
use crate::object::{CommitKind, NewVersion, Version};
use crate::version_store::VersionStore;
use std::sync::Arc;

pub(crate) struct HeadWriter {
    store: Arc<VersionStore>,
    branches: Arc<BranchRegistry>,
    hooks: Option<Arc<HookManager>>,
}

impl HeadWriter {
    pub(crate) fn new(
        store: Arc<VersionStore>,
        branches: Arc<BranchRegistry>,
        hooks: Option<Arc<HookManager>>,
    ) -> Self {
        Self {
            store,
            branches,
            hooks,
        }
    }

    pub(crate) fn hooks(&self) -> Option<&HookManager> {
        self.hooks.as_deref()
    }

    async fn pre_commit(&self, draft: &NewVersion, kind: CommitKind) -> Result<()> {
        match &self.hooks {
            Some(hooks) => {
                hooks
                    .run_pre_commit(&PendingCommit {
                        content_id: &draft.content_id,
                        branch_name: &draft.branch_name,
                        author_id: &draft.author_id,
                        kind,
                        message: &draft.commit_message,
                    })
                    .await
            }
            None => Ok(()),
        }
    }

    /// Commit `draft` on its branch, advancing the head from the draft's
    /// parent. The parent is the caller's view of the head.
    pub(crate) async fn commit_on_branch(
        &self,
        draft: NewVersion,
        kind: CommitKind,
    ) -> Result<Version> {
        let expected_head = draft.parent_version_id.ok_or_else(|| {
            VcsError::Validation("a commit on an existing branch needs a parent".into())
        })?;
        self.pre_commit(&draft, kind).await?;

        let version = self.store.commit(draft).await?;
        if let Err(e) = self
            .branches
            .advance_head(
                &version.content_id,
                &version.branch_name,
                expected_head,
                version.version_id,
            )
            .await
        {
            self.store.discard(&version.version_id).await;
            return Err(e);
        }

        tracing::info!(
            content_id = %version.content_id,
            branch = %version.branch_name,
            version = version.version_number,
            author = %version.author_id,
            %kind,
            "Committed version"
        );
        if let Some(hooks) = &self.hooks {
            hooks.run_post_commit(&version, kind).await;
        }
        Ok(version)
    }

    /// Commit the first version of a content item and create its primary
    /// branch
    pub(crate) async fn commit_initial(&self, draft: NewVersion) -> Result<(Version, Branch)> {
        self.pre_commit(&draft, CommitKind::Commit).await?;

        let version = self.store.commit(draft).await?;
        let branch = match self
            .branches
            .init_branch(
                &version.content_id,
                &version.branch_name,
                version.version_id,
                &version.author_id,
            )
            .await
        {
            Ok(branch) => branch,
            Err(e) => {
                self.store.discard(&version.version_id).await;
                return Err(e);
            }
        };

        tracing::info!(
            content_id = %version.content_id,
            branch = %version.branch_name,
            author = %version.author_id,
            "Committed initial version"
        );
        if let Some(hooks) = &self.hooks {
            hooks.run_post_commit(&version, CommitKind::Commit).await;
        }
        Ok((version, branch))
    }
}
