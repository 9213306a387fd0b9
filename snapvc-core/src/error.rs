//! Error taxonomy for snapvc
//!
//! Every fallible core operation returns [`Result`]. Merge conflicts are not
//! errors: they come back as a `MergeRequest` in the `conflict` state.

use chrono::{DateTime, Utc};

/// Result type for version-control operations
pub type Result<T> = std::result::Result<T, VcsError>;

/// Errors that can occur during version-control operations
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    /// Malformed input, rejected before any state is touched
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Lost the compare-and-swap race on a branch head
    #[error("Stale head on branch '{branch}': expected {expected}, found {actual}")]
    StaleHead {
        branch: String,
        expected: String,
        actual: String,
    },

    #[error("Content {0} has no committed versions")]
    NoVersions(String),

    #[error("Invalid merge: {0}")]
    InvalidMerge(String),

    #[error("Backup {backup_id} expired at {retention_until}")]
    ExpiredBackup {
        backup_id: String,
        retention_until: DateTime<Utc>,
    },

    #[error("Hook rejected the operation: {0}")]
    HookRejected(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl VcsError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether a caller can recover by re-reading the head and retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, VcsError::StaleHead { .. })
    }
}
