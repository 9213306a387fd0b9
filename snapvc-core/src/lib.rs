//! snapvc Core Library
//!
//! Version control for structured content snapshots:
//! - Content-addressed immutable versions with parent links
//! - Named branches with compare-and-swap head updates
//! - Structural diffs between any two versions
//! - Three-way merges with conflict tracking
//! - Reverts and retention-bounded backups as forward commits
//! - Hook scripts and snapshot persistence

pub mod backup;
pub mod branch;
pub mod clock;
pub mod config;
pub mod diff;
pub mod document;
pub mod error;
pub mod hooks;
pub mod merge;
pub mod object;
pub mod persistent;
pub mod repository;
pub mod revert;
pub mod scheduler;
pub mod version_store;
mod writer;

pub use backup::{BackupPolicy, BackupRecord, BackupType};
pub use branch::{Branch, validate_branch_name};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BackupScope, RepositoryConfig};
pub use diff::{Change, ChangeType, Diff};
pub use document::{DocPath, Document, PathError};
pub use error::{Result, VcsError};
pub use hooks::HookManager;
pub use merge::{MergeConflict, MergeRequest, MergeStatus};
pub use object::{CommitKind, Version, VersionId};
pub use persistent::{FileStore, MemoryStore, RepositoryMetadata, RepositorySnapshot, SnapshotStore};
pub use repository::{
    CommitRequest, CreateBackupRequest, CreateBranchRequest, MergeBranchesRequest,
    ResolveMergeRequest, RestoreRequest, RevertRequest, VersionControl, VersionControlBuilder,
};
pub use version_store::HistoryPage;
