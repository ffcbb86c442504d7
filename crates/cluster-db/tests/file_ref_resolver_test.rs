//! Integration tests for file reference resolution.

use cluster_db::test_fixtures::{MemoryStorageProvider, TestDatabase};
use cluster_db::{Error, FileMetadata, FileRefResolver, StorageProviderKind};
use futures::future::join_all;

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_find_or_create_is_idempotent() {
    let test_db = TestDatabase::new().await;
    let resolver = &test_db.db.file_refs;

    let meta = FileMetadata {
        name: Some("Interview 1.mp4".to_string()),
        mime_type: Some("video/mp4".to_string()),
        ..Default::default()
    };
    let first = resolver
        .find_or_create(test_db.org_id, StorageProviderKind::SharePoint, "drive-a", "item-1", Some(&meta))
        .await
        .expect("first resolution");
    let second = resolver
        .find_or_create(test_db.org_id, StorageProviderKind::SharePoint, "drive-a", "item-1", None)
        .await
        .expect("second resolution");
    assert_eq!(first, second);

    let found = resolver
        .find(test_db.org_id, StorageProviderKind::SharePoint, "drive-a", "item-1")
        .await
        .unwrap();
    assert_eq!(found, Some(first));

    let file = resolver.get(test_db.org_id, first).await.unwrap();
    assert_eq!(file.name, "Interview 1.mp4");
    assert_eq!(file.provider, StorageProviderKind::SharePoint);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_concurrent_resolution_converges_on_one_row() {
    let test_db = TestDatabase::new().await;
    let resolver = &test_db.db.file_refs;

    let results = join_all((0..8).map(|_| {
        resolver.find_or_create(
            test_db.org_id,
            StorageProviderKind::SharePoint,
            "drive-race",
            "item-race",
            None,
        )
    }))
    .await;

    let ids: Vec<_> = results.into_iter().map(|r| r.expect("resolution")).collect();
    assert!(ids.iter().all(|id| *id == ids[0]));

    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM file_refs WHERE org_id = $1 AND drive_id = 'drive-race'",
    )
    .bind(test_db.org_id)
    .fetch_one(&test_db.pool)
    .await
    .unwrap();
    assert_eq!(count, 1);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_identities_are_scoped_by_org() {
    let test_db = TestDatabase::new().await;
    let other = test_db.create_org().await;
    let resolver = &test_db.db.file_refs;

    let mine = resolver
        .find_or_create(test_db.org_id, StorageProviderKind::SharePoint, "d", "i", None)
        .await
        .unwrap();
    let theirs = resolver
        .find_or_create(other.org_id, StorageProviderKind::SharePoint, "d", "i", None)
        .await
        .unwrap();
    assert_ne!(mine, theirs);

    let err = resolver.get(other.org_id, mine).await.unwrap_err();
    assert!(err.is_not_found());

    sqlx::query("DELETE FROM organizations WHERE id = $1")
        .bind(other.org_id)
        .execute(&test_db.pool)
        .await
        .unwrap();
    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_unsupported_provider_is_rejected() {
    let test_db = TestDatabase::new().await;
    let resolver = &test_db.db.file_refs;

    let err = resolver
        .find_or_create(test_db.org_id, StorageProviderKind::GoogleDrive, "d", "i", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedProvider(_)));

    let err = resolver
        .find(test_db.org_id, StorageProviderKind::GoogleDrive, "d", "i")
        .await
        .unwrap_err();
    assert!(err.is_validation());

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_sync_from_provider_stores_metadata_and_hash() {
    let test_db = TestDatabase::new().await;
    let provider = MemoryStorageProvider::new()
        .with_file("drive-s", "rec-1", "Session 3.mp3", "audio/mpeg", b"ID3 audio bytes")
        .with_folder("drive-s", "folder-1", "Recordings");

    let file = test_db
        .db
        .file_refs
        .sync_from_provider(&provider, test_db.org_id, "drive-s", "rec-1")
        .await
        .expect("sync");

    assert_eq!(file.name, "Session 3.mp3");
    assert_eq!(file.mime_type.as_deref(), Some("audio/mpeg"));
    assert_eq!(file.size_bytes, Some(15));
    assert_eq!(file.content_hash, provider.content_hash("drive-s", "rec-1"));
    assert!(file.last_synced_at.is_some());

    let err = test_db
        .db
        .file_refs
        .sync_from_provider(&provider, test_db.org_id, "drive-s", "folder-1")
        .await
        .unwrap_err();
    assert!(err.is_validation());

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL with migrated database
async fn test_link_transcript() {
    let test_db = TestDatabase::new().await;
    let resolver = &test_db.db.file_refs;

    let video = resolver
        .find_or_create(test_db.org_id, StorageProviderKind::SharePoint, "d", "video", None)
        .await
        .unwrap();
    let vtt = resolver
        .find_or_create(test_db.org_id, StorageProviderKind::SharePoint, "d", "video.vtt", None)
        .await
        .unwrap();

    let linked = resolver
        .link_transcript(test_db.org_id, video, vtt)
        .await
        .unwrap();
    assert_eq!(linked.transcript_file_id, Some(vtt));

    let err = resolver
        .link_transcript(test_db.org_id, video, video)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    test_db.cleanup().await;
}
