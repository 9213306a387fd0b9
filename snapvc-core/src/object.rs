//! Version object model for snapvc
//!
//! A [`Version`] is an immutable snapshot of one content item's document.
//! Its [`VersionId`] is a SHA-256 digest over the version's header and data,
//! so two versions with identical payloads still get distinct ids.

use crate::document::Document;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Unique identifier for a stored version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionId([u8; 32]);

impl VersionId {
    /// Create a new VersionId from raw bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Compute VersionId from data
    pub fn from_data(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self(hash.into())
    }

    /// Convert to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hexadecimal string
    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Abbreviated form for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl std::fmt::Display for VersionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::str::FromStr for VersionId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for VersionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for VersionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

/// What produced a version; reported to hooks and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitKind {
    Commit,
    Merge,
    Revert,
    Restore,
}

impl std::fmt::Display for CommitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CommitKind::Commit => "commit",
            CommitKind::Merge => "merge",
            CommitKind::Revert => "revert",
            CommitKind::Restore => "restore",
        };
        f.write_str(name)
    }
}

/// Everything a caller supplies for a new version; the store assigns the
/// number, timestamp and id.
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub content_id: String,
    pub branch_name: String,
    pub data: Document,
    pub commit_message: String,
    pub author_id: String,
    pub parent_version_id: Option<VersionId>,
    pub merge_parent_id: Option<VersionId>,
}

/// Immutable content snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub version_id: VersionId,
    pub content_id: String,
    /// Branch the version was committed on
    pub branch_name: String,
    /// Monotonic per content item, not per branch
    pub version_number: u64,
    pub data: Document,
    pub commit_message: String,
    pub author_id: String,
    /// None only for the first version of a content item
    pub parent_version_id: Option<VersionId>,
    /// Source head recorded by merge commits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_parent_id: Option<VersionId>,
    pub created_at: DateTime<Utc>,
}

/// Hashed header; keeps the id stable regardless of field order in `Version`
#[derive(Serialize)]
struct VersionHeader<'a> {
    content_id: &'a str,
    branch_name: &'a str,
    version_number: u64,
    parent: Option<VersionId>,
    merge_parent: Option<VersionId>,
    author_id: &'a str,
    commit_message: &'a str,
    created_at: i64,
    data: &'a Document,
}

impl Version {
    /// Materialize a version from a draft
    pub fn new(draft: NewVersion, version_number: u64, created_at: DateTime<Utc>) -> Self {
        let header = VersionHeader {
            content_id: &draft.content_id,
            branch_name: &draft.branch_name,
            version_number,
            parent: draft.parent_version_id,
            merge_parent: draft.merge_parent_id,
            author_id: &draft.author_id,
            commit_message: &draft.commit_message,
            created_at: created_at.timestamp_nanos_opt().unwrap_or_default(),
            data: &draft.data,
        };
        let version_id =
            VersionId::from_data(&serde_json::to_vec(&header).unwrap_or_default());

        Self {
            version_id,
            content_id: draft.content_id,
            branch_name: draft.branch_name,
            version_number,
            data: draft.data,
            commit_message: draft.commit_message,
            author_id: draft.author_id,
            parent_version_id: draft.parent_version_id,
            merge_parent_id: draft.merge_parent_id,
            created_at,
        }
    }

    /// Check if this is the first version of its content item
    pub fn is_initial(&self) -> bool {
        self.parent_version_id.is_none()
    }

    /// Direct ancestors: the first parent, then the merge parent
    pub fn parents(&self) -> impl Iterator<Item = VersionId> + '_ {
        self.parent_version_id.into_iter().chain(self.merge_parent_id)
    }
}
