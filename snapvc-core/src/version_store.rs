//! Immutable version storage
//!
//! The store is append-only apart from [`VersionStore::discard`], which the
//! head writer uses to roll back a version whose branch CAS was lost.

use crate::clock::Clock;
use crate::error::{Result, VcsError};
use crate::object::{NewVersion, Version, VersionId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct StoreInner {
    versions: HashMap<VersionId, Version>,
    /// content_id -> last allocated version number
    counters: HashMap<String, u64>,
    /// content_id -> version ids in commit order
    by_content: HashMap<String, Vec<VersionId>>,
}

impl StoreInner {
    fn lookup(&self, id: &VersionId) -> Result<&Version> {
        self.versions
            .get(id)
            .ok_or_else(|| VcsError::not_found("Version", id))
    }

    /// Every version reachable from `start` through either parent link,
    /// including `start` itself
    fn ancestors(&self, start: &VersionId) -> Result<HashSet<VersionId>> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([*start]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let version = self.lookup(&id)?;
            queue.extend(version.parents());
        }
        Ok(seen)
    }
}

/// One page of a restartable history walk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub versions: Vec<Version>,
    /// Cursor for the next page; None when the walk reached the first version
    pub next: Option<VersionId>,
}

/// Owner of all [`Version`] records
pub struct VersionStore {
    inner: Arc<RwLock<StoreInner>>,
    clock: Arc<dyn Clock>,
}

impl VersionStore {
    /// Create an empty store
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
            clock,
        }
    }

    /// Rebuild a store from persisted versions and counters
    pub fn from_parts(
        clock: Arc<dyn Clock>,
        versions: Vec<Version>,
        counters: BTreeMap<String, u64>,
    ) -> Self {
        let mut inner = StoreInner::default();
        let mut ordered = versions;
        ordered.sort_by(|a, b| {
            (&a.content_id, a.version_number).cmp(&(&b.content_id, b.version_number))
        });
        for version in ordered {
            let last = inner.counters.entry(version.content_id.clone()).or_insert(0);
            *last = (*last).max(version.version_number);
            inner
                .by_content
                .entry(version.content_id.clone())
                .or_default()
                .push(version.version_id);
            inner.versions.insert(version.version_id, version);
        }
        // Counters may be ahead of the surviving versions (discarded numbers)
        for (content_id, counter) in counters {
            let last = inner.counters.entry(content_id).or_insert(0);
            *last = (*last).max(counter);
        }

        Self {
            inner: Arc::new(RwLock::new(inner)),
            clock,
        }
    }

    /// Store a new version and allocate its number
    ///
    /// Both parents must already exist within the same content item. The
    /// branch head is not touched here.
    pub async fn commit(&self, draft: NewVersion) -> Result<Version> {
        let mut inner = self.inner.write().await;

        for parent in draft.parent_version_id.iter().chain(draft.merge_parent_id.iter()) {
            let version = inner.lookup(parent)?;
            if version.content_id != draft.content_id {
                return Err(VcsError::Validation(format!(
                    "parent {} belongs to content {}, not {}",
                    parent, version.content_id, draft.content_id
                )));
            }
        }

        let counter = inner.counters.entry(draft.content_id.clone()).or_insert(0);
        *counter += 1;
        let version_number = *counter;

        let version = Version::new(draft, version_number, self.clock.now());
        inner
            .by_content
            .entry(version.content_id.clone())
            .or_default()
            .push(version.version_id);
        inner.versions.insert(version.version_id, version.clone());

        tracing::debug!(
            content_id = %version.content_id,
            version = version_number,
            id = %version.version_id.short(),
            "Stored version"
        );
        Ok(version)
    }

    /// Drop a version that never became reachable from a branch head
    pub async fn discard(&self, id: &VersionId) {
        let mut inner = self.inner.write().await;
        if let Some(version) = inner.versions.remove(id) {
            if let Some(ids) = inner.by_content.get_mut(&version.content_id) {
                ids.retain(|v| v != id);
            }
            tracing::debug!(id = %id.short(), "Discarded unreachable version");
        }
    }

    /// Get a version by id
    pub async fn get(&self, id: &VersionId) -> Result<Version> {
        self.inner.read().await.lookup(id).cloned()
    }

    /// Get a version, requiring it to belong to `content_id`
    pub async fn get_for_content(&self, content_id: &str, id: &VersionId) -> Result<Version> {
        let inner = self.inner.read().await;
        match inner.versions.get(id) {
            Some(version) if version.content_id == content_id => Ok(version.clone()),
            _ => Err(VcsError::not_found("Version", id)),
        }
    }

    /// Whether `id` is a version of `content_id`
    pub async fn contains(&self, content_id: &str, id: &VersionId) -> bool {
        self.inner
            .read()
            .await
            .versions
            .get(id)
            .is_some_and(|v| v.content_id == content_id)
    }

    /// Every version reachable from `id` through either parent link,
    /// `id` included
    pub async fn ancestors(&self, id: &VersionId) -> Result<HashSet<VersionId>> {
        self.inner.read().await.ancestors(id)
    }

    /// Check whether a content item has any committed version
    pub async fn has_versions(&self, content_id: &str) -> bool {
        self.inner
            .read()
            .await
            .by_content
            .get(content_id)
            .is_some_and(|ids| !ids.is_empty())
    }

    /// All content items with at least one version, sorted
    pub async fn content_ids(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut ids: Vec<String> = inner
            .by_content
            .iter()
            .filter(|(_, versions)| !versions.is_empty())
            .map(|(content_id, _)| content_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Walk first-parent links from `head`, newest first
    pub async fn history(&self, head: &VersionId) -> Result<Vec<Version>> {
        let page = self.history_page(head, None, usize::MAX).await?;
        Ok(page.versions)
    }

    /// Restartable history walk
    ///
    /// With `after` set, the page starts at the parent of that version, so
    /// the `next` cursor of one page resumes the walk where it stopped. A
    /// cursor that is not on `head`'s first-parent chain is `NotFound`.
    pub async fn history_page(
        &self,
        head: &VersionId,
        after: Option<VersionId>,
        limit: usize,
    ) -> Result<HistoryPage> {
        if limit == 0 {
            return Err(VcsError::Validation("history limit must be positive".into()));
        }
        let inner = self.inner.read().await;

        let mut cursor = Some(*head);
        if let Some(after) = after {
            loop {
                let Some(id) = cursor else {
                    return Err(VcsError::not_found("Version", after));
                };
                cursor = inner.lookup(&id)?.parent_version_id;
                if id == after {
                    break;
                }
            }
        }
        let mut versions = Vec::new();
        while let Some(id) = cursor {
            if versions.len() == limit {
                break;
            }
            let version = inner.lookup(&id)?;
            cursor = version.parent_version_id;
            versions.push(version.clone());
        }

        let next = match (cursor, versions.last()) {
            (Some(_), Some(last)) => Some(last.version_id),
            _ => None,
        };
        Ok(HistoryPage { versions, next })
    }

    /// Nearest common ancestor of two versions
    ///
    /// "Nearest" is the shared ancestor with the highest version number.
    pub async fn merge_base(&self, a: &VersionId, b: &VersionId) -> Result<Option<VersionId>> {
        let inner = self.inner.read().await;
        let from_a = inner.ancestors(a)?;
        let from_b = inner.ancestors(b)?;

        let mut best: Option<&Version> = None;
        for id in from_a.intersection(&from_b) {
            let candidate = inner.lookup(id)?;
            if best.is_none_or(|current| candidate.version_number > current.version_number) {
                best = Some(candidate);
            }
        }
        Ok(best.map(|v| v.version_id))
    }

    /// Whether `ancestor` is reachable from `descendant` (or equal to it)
    pub async fn is_ancestor(&self, ancestor: &VersionId, descendant: &VersionId) -> Result<bool> {
        let inner = self.inner.read().await;
        Ok(inner.ancestors(descendant)?.contains(ancestor))
    }

    /// Copy out every version and counter for persistence
    pub async fn export(&self) -> (Vec<Version>, BTreeMap<String, u64>) {
        let inner = self.inner.read().await;
        let mut versions: Vec<Version> = inner.versions.values().cloned().collect();
        versions.sort_by(|a, b| {
            (&a.content_id, a.version_number).cmp(&(&b.content_id, b.version_number))
        });
        let counters = inner
            .counters
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        (versions, counters)
    }
}
