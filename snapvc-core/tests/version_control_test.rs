//! Version control integration tests

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use snapvc_core::{
    BackupScope, BackupType, ChangeType, CommitRequest, CreateBackupRequest, CreateBranchRequest,
    DocPath, Document, FileStore, ManualClock, MergeBranchesRequest, MergeStatus,
    RepositoryConfig, ResolveMergeRequest, RestoreRequest, RevertRequest, VcsError,
    Version, VersionControl, VersionId,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

fn doc(value: serde_json::Value) -> Document {
    value.into()
}

fn on(branch: &str, data: serde_json::Value, message: &str) -> CommitRequest {
    CommitRequest {
        data: data.into(),
        message: message.into(),
        branch: Some(branch.into()),
        expected_head: None,
    }
}

fn branch_from(name: &str, from: Option<&Version>) -> CreateBranchRequest {
    CreateBranchRequest {
        branch_name: name.into(),
        from_version: from.map(|v| v.version_id),
        description: String::new(),
    }
}

fn merge(source: &str, target: &str) -> MergeBranchesRequest {
    MergeBranchesRequest {
        source_branch: source.into(),
        target_branch: target.into(),
        message: String::new(),
    }
}

async fn seeded(repo: &VersionControl, content_id: &str, data: serde_json::Value) -> Version {
    repo.commit_changes(content_id, on("main", data, "initial"), "alice")
        .await
        .unwrap()
}

#[tokio::test]
async fn test_history_is_newest_first() {
    let repo = VersionControl::in_memory();
    let v1 = seeded(&repo, "doc", json!({"n": 1})).await;
    let v2 = repo
        .commit_changes("doc", on("main", json!({"n": 2}), "two"), "alice")
        .await
        .unwrap();
    let v3 = repo
        .commit_changes("doc", on("main", json!({"n": 3}), "three"), "bob")
        .await
        .unwrap();

    assert_eq!(v2.parent_version_id, Some(v1.version_id));
    assert_eq!(v3.parent_version_id, Some(v2.version_id));

    let history = repo.get_version_history("doc", "main").await.unwrap();
    let numbers: Vec<u64> = history.iter().map(|v| v.version_number).collect();
    assert_eq!(numbers, vec![3, 2, 1]);
    assert!(history.windows(2).all(|w| w[0].created_at >= w[1].created_at));
}

#[tokio::test]
async fn test_history_pages_resume() {
    let repo = VersionControl::in_memory();
    seeded(&repo, "doc", json!({"n": 0})).await;
    for n in 1..5 {
        repo.commit_changes("doc", on("main", json!({"n": n}), "edit"), "alice")
            .await
            .unwrap();
    }

    let first = repo
        .get_version_history_page("doc", "main", None, 2)
        .await
        .unwrap();
    assert_eq!(first.versions.len(), 2);
    let second = repo
        .get_version_history_page("doc", "main", first.next, 2)
        .await
        .unwrap();
    let third = repo
        .get_version_history_page("doc", "main", second.next, 2)
        .await
        .unwrap();

    let numbers: Vec<u64> = first
        .versions
        .iter()
        .chain(&second.versions)
        .chain(&third.versions)
        .map(|v| v.version_number)
        .collect();
    assert_eq!(numbers, vec![5, 4, 3, 2, 1]);
    assert!(third.next.is_none());
}

#[tokio::test]
async fn test_history_cursor_from_other_content() {
    let repo = VersionControl::in_memory();
    seeded(&repo, "a", json!({"n": 1})).await;
    let b1 = seeded(&repo, "b", json!({"n": 1})).await;

    let result = repo
        .get_version_history_page("a", "main", Some(b1.version_id), 10)
        .await;
    assert!(matches!(result, Err(VcsError::NotFound { .. })));
}

#[tokio::test]
async fn test_revert_twice_moves_forward() {
    let repo = VersionControl::in_memory();
    let v1 = seeded(&repo, "doc", json!({"a": 1})).await;
    let v2 = repo
        .commit_changes("doc", on("main", json!({"a": 2}), "change"), "alice")
        .await
        .unwrap();

    let v3 = repo
        .revert_to_version(
            "doc",
            RevertRequest {
                version_id: v1.version_id,
                branch: None,
            },
            "bob",
        )
        .await
        .unwrap();
    assert_eq!(v3.data, v1.data);
    assert_eq!(v3.version_number, 3);
    assert_eq!(v3.parent_version_id, Some(v2.version_id));
    assert_eq!(v3.commit_message, "Revert to version 1");

    let v4 = repo
        .revert_to_version(
            "doc",
            RevertRequest {
                version_id: v2.version_id,
                branch: Some("main".into()),
            },
            "bob",
        )
        .await
        .unwrap();
    assert_eq!(v4.data, v2.data);
    assert_eq!(v4.version_number, 4);

    let history = repo.get_version_history("doc", "main").await.unwrap();
    assert_eq!(history.len(), 4);
}

#[tokio::test]
async fn test_revert_to_other_contents_version() {
    let repo = VersionControl::in_memory();
    seeded(&repo, "a", json!({"a": 1})).await;
    let b1 = seeded(&repo, "b", json!({"b": 1})).await;

    let result = repo
        .revert_to_version(
            "a",
            RevertRequest {
                version_id: b1.version_id,
                branch: None,
            },
            "alice",
        )
        .await;
    assert!(matches!(result, Err(VcsError::NotFound { .. })));
    assert_eq!(repo.get_version_history("a", "main").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_diff_and_merge_cells_example() {
    let repo = VersionControl::in_memory();
    let v1 = seeded(&repo, "doc-1", json!({"cells": [1, 2]})).await;
    repo.create_branch("doc-1", branch_from("feature", Some(&v1)), "alice")
        .await
        .unwrap();

    let v2 = repo
        .commit_changes("doc-1", on("feature", json!({"cells": [1, 2, 3]}), "add"), "alice")
        .await
        .unwrap();
    repo.commit_changes("doc-1", on("main", json!({"cells": [1, 9]}), "edit"), "bob")
        .await
        .unwrap();

    let diff = repo
        .get_version_diff("doc-1", &v1.version_id, &v2.version_id)
        .await
        .unwrap();
    assert_eq!(diff.changes.len(), 1);
    assert_eq!(diff.changes[0].path.to_string(), "cells[2]");
    assert_eq!(diff.changes[0].change_type, ChangeType::Added);
    assert_eq!(diff.changes[0].new_value, Some(doc(json!(3))));

    let request = repo
        .merge_branches("doc-1", merge("feature", "main"), "carol")
        .await
        .unwrap();
    assert_eq!(request.status, MergeStatus::Merged);
    assert_eq!(request.base_version_id, v1.version_id);

    let merged = repo
        .get_version("doc-1", &request.merged_version_id.unwrap())
        .await
        .unwrap();
    assert_eq!(merged.data, doc(json!({"cells": [1, 9, 3]})));
    assert_eq!(merged.merge_parent_id, Some(v2.version_id));
    assert_eq!(merged.commit_message, "Merge branch 'feature' into 'main'");
    assert_eq!(
        repo.get_head("doc-1", "main").await.unwrap(),
        merged.version_id
    );
}

#[tokio::test]
async fn test_disjoint_merge_is_symmetric() {
    async fn merged_data(source: &str, target: &str) -> Document {
        let repo = VersionControl::in_memory();
        seeded(&repo, "doc", json!({"title": "t", "body": "b"})).await;
        repo.create_branch("doc", branch_from("feature", None), "alice")
            .await
            .unwrap();
        repo.commit_changes("doc", on("feature", json!({"title": "T", "body": "b"}), "title"), "alice")
            .await
            .unwrap();
        repo.commit_changes("doc", on("main", json!({"title": "t", "body": "B"}), "body"), "bob")
            .await
            .unwrap();

        let request = repo
            .merge_branches("doc", merge(source, target), "carol")
            .await
            .unwrap();
        assert_eq!(request.status, MergeStatus::Merged);
        repo.get_version("doc", &request.merged_version_id.unwrap())
            .await
            .unwrap()
            .data
    }

    let into_main = merged_data("feature", "main").await;
    let into_feature = merged_data("main", "feature").await;
    assert_eq!(into_main, doc(json!({"title": "T", "body": "B"})));
    assert_eq!(into_main, into_feature);
}

async fn conflicted_repo() -> (VersionControl, Version) {
    let repo = VersionControl::in_memory();
    seeded(&repo, "doc", json!({"x": 1})).await;
    repo.create_branch("doc", branch_from("feature", None), "alice")
        .await
        .unwrap();
    repo.commit_changes("doc", on("feature", json!({"x": 2}), "two"), "alice")
        .await
        .unwrap();
    let target = repo
        .commit_changes("doc", on("main", json!({"x": 3}), "three"), "bob")
        .await
        .unwrap();
    (repo, target)
}

#[tokio::test]
async fn test_conflict_leaves_target_untouched() {
    let (repo, target) = conflicted_repo().await;

    let request = repo
        .merge_branches("doc", merge("feature", "main"), "carol")
        .await
        .unwrap();
    assert_eq!(request.status, MergeStatus::Conflict);
    assert_eq!(request.conflicts.len(), 1);
    let conflict = &request.conflicts[0];
    assert_eq!(conflict.path.to_string(), "x");
    assert_eq!(conflict.source_value, Some(doc(json!(2))));
    assert_eq!(conflict.target_value, Some(doc(json!(3))));

    assert_eq!(repo.get_head("doc", "main").await.unwrap(), target.version_id);
    let listed = repo.get_merge_requests("doc").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].merge_id, request.merge_id);
}

#[tokio::test]
async fn test_resolve_conflicted_merge() {
    let (repo, target) = conflicted_repo().await;
    let request = repo
        .merge_branches("doc", merge("feature", "main"), "carol")
        .await
        .unwrap();

    let incomplete = ResolveMergeRequest {
        merge_id: request.merge_id,
        resolutions: BTreeMap::new(),
    };
    assert!(matches!(
        repo.resolve_merge("doc", incomplete, "carol").await,
        Err(VcsError::Validation(_))
    ));

    let path: DocPath = "x".parse().unwrap();
    let resolved = repo
        .resolve_merge(
            "doc",
            ResolveMergeRequest {
                merge_id: request.merge_id,
                resolutions: BTreeMap::from([(path, Some(doc(json!(5))))]),
            },
            "carol",
        )
        .await
        .unwrap();
    assert_eq!(resolved.status, MergeStatus::Merged);
    assert!(resolved.resolved_at.is_some());

    let merged = repo
        .get_version("doc", &resolved.merged_version_id.unwrap())
        .await
        .unwrap();
    assert_eq!(merged.data, doc(json!({"x": 5})));
    assert_eq!(merged.parent_version_id, Some(target.version_id));

    // A resolved merge is final
    assert!(matches!(
        repo.reject_merge("doc", request.merge_id).await,
        Err(VcsError::InvalidMerge(_))
    ));
}

#[tokio::test]
async fn test_reject_conflicted_merge() {
    let (repo, target) = conflicted_repo().await;
    let request = repo
        .merge_branches("doc", merge("feature", "main"), "carol")
        .await
        .unwrap();

    let rejected = repo.reject_merge("doc", request.merge_id).await.unwrap();
    assert_eq!(rejected.status, MergeStatus::Rejected);
    assert!(rejected.merged_version_id.is_none());
    assert_eq!(repo.get_head("doc", "main").await.unwrap(), target.version_id);
}

/// Commit `source` on a feature branch and `target` on main, both from `base`,
/// then merge feature into main
async fn diverged(
    base: serde_json::Value,
    source: serde_json::Value,
    target: serde_json::Value,
) -> (VersionControl, snapvc_core::MergeRequest) {
    let repo = VersionControl::in_memory();
    seeded(&repo, "doc", base).await;
    repo.create_branch("doc", branch_from("feature", None), "alice")
        .await
        .unwrap();
    repo.commit_changes("doc", on("feature", source, "source"), "alice")
        .await
        .unwrap();
    repo.commit_changes("doc", on("main", target, "target"), "bob")
        .await
        .unwrap();
    let request = repo
        .merge_branches("doc", merge("feature", "main"), "carol")
        .await
        .unwrap();
    assert_eq!(request.status, MergeStatus::Conflict);
    (repo, request)
}

async fn resolve_with(
    repo: &VersionControl,
    request: &snapvc_core::MergeRequest,
    resolutions: &[(&str, Option<serde_json::Value>)],
) -> Document {
    let resolutions = resolutions
        .iter()
        .map(|(path, value)| (path.parse().unwrap(), value.clone().map(doc)))
        .collect();
    let resolved = repo
        .resolve_merge(
            "doc",
            ResolveMergeRequest {
                merge_id: request.merge_id,
                resolutions,
            },
            "carol",
        )
        .await
        .unwrap();
    assert_eq!(resolved.status, MergeStatus::Merged);
    let version = repo
        .get_version("doc", &resolved.merged_version_id.unwrap())
        .await
        .unwrap();
    version.data
}

#[tokio::test]
async fn test_resolve_keeping_target_deletion() {
    let (repo, request) = diverged(
        json!({"a": {"b": 1}, "z": 0}),
        json!({"a": {"b": 2}, "z": 0}),
        json!({"z": 0}),
    )
    .await;
    assert_eq!(request.conflicts[0].path.to_string(), "a");
    assert_eq!(request.conflicts[0].target_value, None);

    let merged = resolve_with(&repo, &request, &[("a", None)]).await;
    assert_eq!(merged, doc(json!({"z": 0})));
}

#[tokio::test]
async fn test_resolve_element_beyond_truncated_sequence() {
    let base = json!({"s": [1, 2, 3]});
    let source = json!({"s": [1, 2, 3, 4]});
    let target = json!({"s": [1]});

    let (repo, request) = diverged(base.clone(), source.clone(), target.clone()).await;
    assert_eq!(request.conflicts[0].path.to_string(), "s[3]");
    let merged = resolve_with(&repo, &request, &[("s[3]", Some(json!(4)))]).await;
    assert_eq!(merged, doc(json!({"s": [1, 4]})));

    let (repo, request) = diverged(base, source, target).await;
    let merged = resolve_with(&repo, &request, &[("s[3]", None)]).await;
    assert_eq!(merged, doc(json!({"s": [1]})));
}

#[tokio::test]
async fn test_resolve_several_tail_deletions() {
    let (repo, request) = diverged(
        json!({"s": [1, 2, 3]}),
        json!({"s": [1]}),
        json!({"s": [1, 8, 9]}),
    )
    .await;
    assert_eq!(request.conflicts.len(), 2);

    let merged = resolve_with(&repo, &request, &[("s[1]", None), ("s[2]", None)]).await;
    assert_eq!(merged, doc(json!({"s": [1]})));
}

#[tokio::test]
async fn test_merge_already_contained_source() {
    let repo = VersionControl::in_memory();
    seeded(&repo, "doc", json!({"x": 1})).await;
    repo.create_branch("doc", branch_from("feature", None), "alice")
        .await
        .unwrap();
    let head = repo
        .commit_changes("doc", on("main", json!({"x": 2}), "two"), "alice")
        .await
        .unwrap();

    let request = repo
        .merge_branches("doc", merge("feature", "main"), "alice")
        .await
        .unwrap();
    assert_eq!(request.status, MergeStatus::Merged);
    assert!(request.merged_version_id.is_none());
    assert_eq!(repo.get_head("doc", "main").await.unwrap(), head.version_id);
}

#[tokio::test]
async fn test_self_merge_is_invalid() {
    let repo = VersionControl::in_memory();
    seeded(&repo, "doc", json!({})).await;
    assert!(matches!(
        repo.merge_branches("doc", merge("main", "main"), "alice").await,
        Err(VcsError::InvalidMerge(_))
    ));
}

#[tokio::test]
async fn test_merge_with_unknown_branch() {
    let repo = VersionControl::in_memory();
    seeded(&repo, "doc", json!({})).await;
    assert!(matches!(
        repo.merge_branches("doc", merge("ghost", "main"), "alice").await,
        Err(VcsError::NotFound { .. })
    ));
    assert!(matches!(
        repo.merge_branches("doc", merge("main", "ghost"), "alice").await,
        Err(VcsError::NotFound { .. })
    ));
    assert!(repo.get_merge_requests("doc").await.unwrap().is_empty());
}

async fn commit_based_on(
    repo: &VersionControl,
    head: VersionId,
    n: i64,
    author: &str,
) -> snapvc_core::Result<Version> {
    let request = CommitRequest {
        data: json!({"n": n}).into(),
        message: format!("set {}", n),
        branch: Some("main".into()),
        expected_head: Some(head),
    };
    repo.commit_changes("doc", request, author).await
}

#[tokio::test]
async fn test_concurrent_commits_one_wins() {
    let repo = VersionControl::in_memory();
    let v1 = seeded(&repo, "doc", json!({"n": 0})).await;

    let (a, b) = tokio::join!(
        commit_based_on(&repo, v1.version_id, 1, "alice"),
        commit_based_on(&repo, v1.version_id, 2, "bob"),
    );

    let (winner, loser) = match (a, b) {
        (Ok(v), Err(e)) | (Err(e), Ok(v)) => (v, e),
        other => panic!("expected exactly one winner, got {:?}", other),
    };
    assert!(matches!(loser, VcsError::StaleHead { .. }));
    assert!(loser.is_retryable());
    assert_eq!(repo.get_head("doc", "main").await.unwrap(), winner.version_id);
    assert_eq!(repo.snapshot().await.versions.len(), 2);

    // Retry against the fresh head
    let retried = repo
        .commit_changes(
            "doc",
            CommitRequest {
                data: json!({"n": 3}).into(),
                message: "retry".into(),
                branch: Some("main".into()),
                expected_head: Some(winner.version_id),
            },
            "bob",
        )
        .await
        .unwrap();
    assert_eq!(retried.parent_version_id, Some(winner.version_id));
}

#[tokio::test]
async fn test_many_writers_on_one_head() {
    let repo = VersionControl::in_memory();
    let v1 = seeded(&repo, "doc", json!({"n": 0})).await;

    let attempts = (1..=8).map(|n| commit_based_on(&repo, v1.version_id, n, "writer"));
    let results = futures::future::join_all(attempts).await;

    let winners: Vec<&Version> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, VcsError::StaleHead { .. }))
    );
    assert_eq!(repo.get_head("doc", "main").await.unwrap(), winners[0].version_id);
    assert_eq!(repo.get_version_history("doc", "main").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_delete_branch_keeps_versions() {
    let repo = VersionControl::in_memory();
    seeded(&repo, "doc", json!({})).await;
    repo.create_branch("doc", branch_from("feature", None), "alice")
        .await
        .unwrap();
    let on_feature = repo
        .commit_changes("doc", on("feature", json!({"f": true}), "feature work"), "alice")
        .await
        .unwrap();

    repo.delete_branch("doc", "feature").await.unwrap();
    assert_eq!(repo.get_branches("doc").await.unwrap().len(), 1);
    assert_eq!(
        repo.get_version("doc", &on_feature.version_id).await.unwrap(),
        on_feature
    );
    assert!(matches!(
        repo.delete_branch("doc", "main").await,
        Err(VcsError::Validation(_))
    ));
}

#[tokio::test]
async fn test_backup_expiry() {
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let repo = VersionControl::builder(RepositoryConfig::default())
        .clock(clock.clone())
        .build();
    let v1 = seeded(&repo, "doc", json!({"a": 1})).await;

    let backup = repo
        .create_backup(
            "doc",
            CreateBackupRequest {
                backup_type: BackupType::Manual,
            },
        )
        .await
        .unwrap();
    assert_eq!(backup.version_id, v1.version_id);
    assert_eq!(backup.retention_until, start + Duration::days(30));

    repo.commit_changes("doc", on("main", json!({"a": 2}), "change"), "alice")
        .await
        .unwrap();

    clock.advance(Duration::days(29));
    assert_eq!(repo.get_backups("doc").await.unwrap().len(), 1);
    let restored = repo
        .restore_from_backup(
            "doc",
            RestoreRequest {
                backup_id: backup.backup_id,
                branch: None,
            },
            "alice",
        )
        .await
        .unwrap();
    assert_eq!(restored.data, v1.data);
    assert_eq!(restored.version_number, 3);
    assert_eq!(
        restored.commit_message,
        format!("Restore from backup {}", backup.backup_id)
    );

    clock.advance(Duration::days(1));
    assert!(repo.get_backups("doc").await.unwrap().is_empty());
    assert!(matches!(
        repo.restore_from_backup(
            "doc",
            RestoreRequest {
                backup_id: backup.backup_id,
                branch: None,
            },
            "alice",
        )
        .await,
        Err(VcsError::ExpiredBackup { .. })
    ));
}

#[tokio::test]
async fn test_backup_needs_versions() {
    let repo = VersionControl::in_memory();
    let result = repo
        .create_backup(
            "empty",
            CreateBackupRequest {
                backup_type: BackupType::Manual,
            },
        )
        .await;
    assert!(matches!(result, Err(VcsError::NoVersions(_))));
}

#[tokio::test]
async fn test_restore_other_contents_backup() {
    let repo = VersionControl::in_memory();
    seeded(&repo, "a", json!({"a": 1})).await;
    seeded(&repo, "b", json!({"b": 1})).await;
    let backup = repo
        .create_backup(
            "b",
            CreateBackupRequest {
                backup_type: BackupType::Manual,
            },
        )
        .await
        .unwrap();

    let result = repo
        .restore_from_backup(
            "a",
            RestoreRequest {
                backup_id: backup.backup_id,
                branch: None,
            },
            "alice",
        )
        .await;
    assert!(matches!(result, Err(VcsError::NotFound { .. })));
    assert_eq!(repo.get_version_history("a", "main").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_all_branches_backup_scope() {
    let config = RepositoryConfig {
        backup_scope: BackupScope::AllBranches,
        ..RepositoryConfig::default()
    };
    let repo = VersionControl::builder(config).build();
    seeded(&repo, "doc", json!({"a": 1})).await;
    repo.create_branch("doc", branch_from("feature", None), "alice")
        .await
        .unwrap();
    let captured = repo
        .commit_changes("doc", on("feature", json!({"a": 10}), "feature"), "alice")
        .await
        .unwrap();

    let backup = repo
        .create_backup(
            "doc",
            CreateBackupRequest {
                backup_type: BackupType::Manual,
            },
        )
        .await
        .unwrap();
    assert_eq!(backup.branch_heads.len(), 2);
    assert_eq!(backup.branch_heads.get("feature"), Some(&captured.version_id));

    repo.commit_changes("doc", on("feature", json!({"a": 11}), "later"), "alice")
        .await
        .unwrap();
    let restored = repo
        .restore_from_backup(
            "doc",
            RestoreRequest {
                backup_id: backup.backup_id,
                branch: Some("feature".into()),
            },
            "alice",
        )
        .await
        .unwrap();
    assert_eq!(restored.branch_name, "feature");
    assert_eq!(restored.data, doc(json!({"a": 10})));

    repo.delete_branch("doc", "feature").await.unwrap();
    assert!(matches!(
        repo.restore_from_backup(
            "doc",
            RestoreRequest {
                backup_id: backup.backup_id,
                branch: Some("feature".into()),
            },
            "alice",
        )
        .await,
        Err(VcsError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_scheduled_backups_cover_every_content_item() {
    let repo = VersionControl::in_memory();
    seeded(&repo, "a", json!({})).await;
    seeded(&repo, "b", json!({})).await;

    let created = repo.run_scheduled_backups().await;
    assert_eq!(created.len(), 2);
    assert!(created.iter().all(|r| r.backup_type == BackupType::Scheduled));
}

#[tokio::test]
async fn test_file_store_round_trip() {
    let tmp = TempDir::new().unwrap();

    let merge_id = {
        let store = FileStore::open(tmp.path()).unwrap();
        let repo = VersionControl::builder(RepositoryConfig::default())
            .persistence(Arc::new(store))
            .load()
            .await
            .unwrap();
        seeded(&repo, "doc", json!({"x": 1})).await;
        repo.create_branch("doc", branch_from("feature", None), "alice")
            .await
            .unwrap();
        repo.commit_changes("doc", on("feature", json!({"x": 2}), "two"), "alice")
            .await
            .unwrap();
        repo.commit_changes("doc", on("main", json!({"x": 3}), "three"), "bob")
            .await
            .unwrap();
        let request = repo
            .merge_branches("doc", merge("feature", "main"), "carol")
            .await
            .unwrap();
        repo.persist().await.unwrap();
        request.merge_id
    };

    let store = FileStore::open(tmp.path()).unwrap();
    let repo = VersionControl::builder(RepositoryConfig::default())
        .persistence(Arc::new(store))
        .load()
        .await
        .unwrap();
    assert_eq!(repo.get_branches("doc").await.unwrap().len(), 2);
    assert_eq!(repo.get_version_history("doc", "main").await.unwrap().len(), 2);
    let request = repo.get_merge_request("doc", merge_id).await.unwrap();
    assert_eq!(request.status, MergeStatus::Conflict);

    let next = repo
        .commit_changes("doc", on("main", json!({"x": 4}), "four"), "bob")
        .await
        .unwrap();
    assert_eq!(next.version_number, 4);
}

#[cfg(unix)]
#[tokio::test]
async fn test_pre_commit_hook_rejection_writes_nothing() {
    use snapvc_core::HookManager;
    use std::os::unix::fs::PermissionsExt;

    let tmp = TempDir::new().unwrap();
    let hooks = HookManager::new(tmp.path().to_path_buf());
    hooks.ensure_hooks_dir().unwrap();
    let script = hooks.hook_path("pre-commit");
    std::fs::write(
        &script,
        "#!/bin/sh\nif grep -q 'AUTHOR: mallory'; then echo 'mallory may not commit' >&2; exit 1; fi\n",
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let repo = VersionControl::builder(RepositoryConfig::default())
        .hooks(hooks)
        .build();
    let v1 = seeded(&repo, "doc", json!({"a": 1})).await;

    let err = repo
        .commit_changes("doc", on("main", json!({"a": 2}), "sneaky"), "mallory")
        .await
        .unwrap_err();
    match err {
        VcsError::HookRejected(msg) => assert!(msg.contains("mallory may not commit")),
        other => panic!("expected HookRejected, got {:?}", other),
    }
    assert_eq!(repo.get_head("doc", "main").await.unwrap(), v1.version_id);
    assert_eq!(repo.snapshot().await.versions.len(), 1);
}
