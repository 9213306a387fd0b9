//! Structural diff between document snapshots
//!
//! Both documents are walked in lock-step: maps over their sorted key union,
//! sequences by position. Diffs are sparse and only list changed paths.
//!
//! Sequences are compared positionally, without longest-common-subsequence
//! alignment. Inserting an element in the middle of a sequence therefore
//! shows up as `modified` for every later index plus one `added` at the new
//! tail.

use crate::document::{DocPath, Document};
use crate::object::{Version, VersionId};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Deleted,
    Modified,
}

/// A single changed path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub path: DocPath,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Document>,
}

impl Change {
    fn added(path: DocPath, value: &Document) -> Self {
        Self {
            path,
            change_type: ChangeType::Added,
            old_value: None,
            new_value: Some(value.clone()),
        }
    }

    fn deleted(path: DocPath, value: &Document) -> Self {
        Self {
            path,
            change_type: ChangeType::Deleted,
            old_value: Some(value.clone()),
            new_value: None,
        }
    }

    fn modified(path: DocPath, old: &Document, new: &Document) -> Self {
        Self {
            path,
            change_type: ChangeType::Modified,
            old_value: Some(old.clone()),
            new_value: Some(new.clone()),
        }
    }

    /// Two changes from the same base that leave the path in the same state
    pub fn same_outcome(&self, other: &Change) -> bool {
        self.path == other.path && self.new_value == other.new_value
    }
}

/// Differences between two versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    pub base_version_id: VersionId,
    pub compare_version_id: VersionId,
    pub changes: Vec<Change>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Compute the changes that turn `base` into `compare`
pub fn diff_documents(base: &Document, compare: &Document) -> Vec<Change> {
    let mut changes = Vec::new();
    walk(DocPath::root(), base, compare, &mut changes);
    changes
}

fn walk(path: DocPath, a: &Document, b: &Document, out: &mut Vec<Change>) {
    match (a, b) {
        (Document::Map(left), Document::Map(right)) => {
            let mut keys: Vec<&String> = left.keys().chain(right.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let child = path.key(key.as_str());
                match (left.get(key), right.get(key)) {
                    (Some(x), Some(y)) => walk(child, x, y, out),
                    (None, Some(y)) => out.push(Change::added(child, y)),
                    (Some(x), None) => out.push(Change::deleted(child, x)),
                    (None, None) => {}
                }
            }
        }
        (Document::Sequence(left), Document::Sequence(right)) => {
            for index in 0..left.len().max(right.len()) {
                let child = path.index(index);
                match (left.get(index), right.get(index)) {
                    (Some(x), Some(y)) => walk(child, x, y, out),
                    (None, Some(y)) => out.push(Change::added(child, y)),
                    (Some(x), None) => out.push(Change::deleted(child, x)),
                    (None, None) => {}
                }
            }
        }
        (x, y) if x != y => out.push(Change::modified(path, x, y)),
        _ => {}
    }
}

/// Diff service with an LRU cache keyed by version pair
///
/// Versions never change, so cached diffs never go stale.
pub struct DiffEngine {
    cache: Option<Mutex<LruCache<(VersionId, VersionId), Arc<Diff>>>>,
}

impl DiffEngine {
    /// Create an engine caching up to `capacity` diffs; zero disables caching
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    /// Diff two versions
    pub fn diff(&self, base: &Version, compare: &Version) -> Arc<Diff> {
        let key = (base.version_id, compare.version_id);
        if let Some(cache) = &self.cache {
            let mut guard = match cache.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(hit) = guard.get(&key) {
                tracing::debug!(
                    base = %base.version_id.short(),
                    compare = %compare.version_id.short(),
                    "Diff cache hit"
                );
                return hit.clone();
            }
        }

        let diff = Arc::new(Diff {
            base_version_id: base.version_id,
            compare_version_id: compare.version_id,
            changes: diff_documents(&base.data, &compare.data),
        });

        if let Some(cache) = &self.cache {
            let mut guard = match cache.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.put(key, diff.clone());
        }
        diff
    }
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new(256)
    }
}
