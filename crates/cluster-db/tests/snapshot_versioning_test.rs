//! Integration tests for canvas snapshot versioning.

use std::collections::BTreeSet;

use cluster_db::test_fixtures::{TestDataBuilder, TestDatabase};
use cluster_db::{CreateSnapshotRequest, Error, SnapshotRepository};
use futures::future::join_all;
use serde_json::json;
use uuid::Uuid;

fn snapshot(name: &str, study_id: Option<Uuid>) -> CreateSnapshotRequest {
    CreateSnapshotRequest {
        name: name.to_string(),
        description: None,
        study_id,
        canvas_state: json!({
            "nodes": [{"id": "n1", "x": 10, "y": 20}],
            "edges": [],
            "viewport": {"x": 0, "y": 0, "zoom": 1.25}
        }),
    }
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_versions_increase_per_scope() {
    let test_db = TestDatabase::new().await;
    let data = TestDataBuilder::new(&test_db).with_study("Scoped").build().await;
    let ctx = test_db.ctx();
    let repo = &test_db.db.snapshots;

    let mut versions = Vec::new();
    for name in ["v1", "v2", "v3"] {
        versions.push(repo.create(&ctx, snapshot(name, data.study_id)).await.unwrap().version_number);
    }
    assert_eq!(versions, vec![1, 2, 3]);

    // No study is a separate scope.
    let unscoped = repo.create(&ctx, snapshot("loose", None)).await.unwrap();
    assert_eq!(unscoped.version_number, 1);

    let listed = repo.list(test_db.org_id, data.study_id).await.unwrap();
    let listed: Vec<_> = listed.iter().map(|s| s.version_number).collect();
    assert_eq!(listed, vec![3, 2, 1]);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_concurrent_creation_yields_distinct_versions() {
    let test_db = TestDatabase::new().await;
    let ctx = test_db.ctx();
    let repo = &test_db.db.snapshots;

    // More writers than pooled connections and retry attempts combined.
    let results = join_all((0..24).map(|i| repo.create(&ctx, snapshot(&format!("c{}", i), None)))).await;
    let versions: BTreeSet<i32> = results
        .into_iter()
        .map(|r| r.expect("snapshot created").version_number)
        .collect();
    assert_eq!(versions, (1..=24).collect::<BTreeSet<i32>>());

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_state_round_trips_and_delete() {
    let test_db = TestDatabase::new().await;
    let ctx = test_db.ctx();
    let repo = &test_db.db.snapshots;

    let req = snapshot("Before workshop", None);
    let state = req.canvas_state.clone();
    let created = repo.create(&ctx, req).await.unwrap();

    let fetched = repo.get(test_db.org_id, created.id).await.unwrap();
    assert_eq!(fetched.canvas_state, state);
    assert_eq!(fetched.created_by, Some(test_db.user_id));

    repo.delete(test_db.org_id, created.id).await.unwrap();
    assert!(matches!(
        repo.get(test_db.org_id, created.id).await.unwrap_err(),
        Error::SnapshotNotFound(_)
    ));
    assert!(repo.delete(test_db.org_id, created.id).await.unwrap_err().is_not_found());

    let err = repo.create(&ctx, snapshot("  ", None)).await.unwrap_err();
    assert!(err.is_validation());

    test_db.cleanup().await;
}
