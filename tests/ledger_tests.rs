//! Integration tests for the archive ledger

use coldsync::{BackupRecord, BackupStatus, Ledger, SourceType};
use std::path::Path;

fn record(local_path: &str, key: &str) -> BackupRecord {
    BackupRecord::uploaded(local_path, key, SourceType::Internal, 42, Some("abc".to_string()))
}

#[tokio::test]
async fn test_upsert_keeps_one_record_per_path() {
    let ledger = Ledger::in_memory().await.unwrap();

    ledger.upsert(&record("/images/a.jpg", "internal/a.jpg")).await.unwrap();
    let mut updated = record("/images/a.jpg", "internal/a.jpg");
    updated.size_bytes = Some(100);
    updated.checksum = Some("def".to_string());
    ledger.upsert(&updated).await.unwrap();

    let found = ledger.find("/images/a.jpg").await.unwrap().unwrap();
    assert_eq!(found.size_bytes, Some(100));
    assert_eq!(found.checksum.as_deref(), Some("def"));
    assert_eq!(ledger.count_records(BackupStatus::Uploaded).await.unwrap(), 1);
}

#[tokio::test]
async fn test_source_type_is_never_rewritten() {
    let ledger = Ledger::in_memory().await.unwrap();

    ledger.upsert(&record("/images/a.jpg", "internal/a.jpg")).await.unwrap();
    let mut other = record("/images/a.jpg", "external/a.jpg");
    other.source_type = SourceType::External;
    ledger.upsert(&other).await.unwrap();

    let found = ledger.find("/images/a.jpg").await.unwrap().unwrap();
    assert_eq!(found.source_type, SourceType::Internal);
    assert_eq!(found.remote_key, "external/a.jpg");
}

#[tokio::test]
async fn test_record_failure_then_success() {
    let ledger = Ledger::in_memory().await.unwrap();

    ledger
        .record_failure("/images/x.jpg", "internal/x.jpg", SourceType::Internal)
        .await
        .unwrap();
    let failed = ledger.find("/images/x.jpg").await.unwrap().unwrap();
    assert_eq!(failed.status, BackupStatus::Error);
    assert!(!failed.is_archived());
    assert_eq!(failed.size_bytes, None);

    ledger.upsert(&record("/images/x.jpg", "internal/x.jpg")).await.unwrap();
    let fixed = ledger.find("/images/x.jpg").await.unwrap().unwrap();
    assert_eq!(fixed.status, BackupStatus::Uploaded);
    assert_eq!(ledger.count_records(BackupStatus::Error).await.unwrap(), 0);
}

#[tokio::test]
async fn test_record_failure_keeps_previous_metadata() {
    let ledger = Ledger::in_memory().await.unwrap();

    ledger.upsert(&record("/images/y.jpg", "internal/y.jpg")).await.unwrap();
    ledger
        .record_failure("/images/y.jpg", "internal/y.jpg", SourceType::Internal)
        .await
        .unwrap();

    let found = ledger.find("/images/y.jpg").await.unwrap().unwrap();
    assert_eq!(found.status, BackupStatus::Error);
    assert_eq!(found.size_bytes, Some(42));
    assert_eq!(found.checksum.as_deref(), Some("abc"));
}

#[tokio::test]
async fn test_list_under_respects_directory_boundary() {
    let ledger = Ledger::in_memory().await.unwrap();

    ledger.upsert(&record("/data/images/a.jpg", "internal/a.jpg")).await.unwrap();
    ledger.upsert(&record("/data/images/sub/b.jpg", "internal/sub/b.jpg")).await.unwrap();
    ledger.upsert(&record("/data/images2/c.jpg", "internal/c.jpg")).await.unwrap();
    ledger
        .record_failure("/data/images/d.jpg", "internal/d.jpg", SourceType::Internal)
        .await
        .unwrap();

    let uploaded = ledger
        .list_under(SourceType::Internal, Path::new("/data/images"), BackupStatus::Uploaded)
        .await
        .unwrap();
    let paths: Vec<_> = uploaded.iter().map(|r| r.local_path.as_str()).collect();
    assert_eq!(paths, vec!["/data/images/a.jpg", "/data/images/sub/b.jpg"]);

    let other_type = ledger
        .list_under(SourceType::External, Path::new("/data/images"), BackupStatus::Uploaded)
        .await
        .unwrap();
    assert!(other_type.is_empty());

    let errors = ledger
        .list_under(SourceType::Internal, Path::new("/data/images/"), BackupStatus::Error)
        .await
        .unwrap();
    assert_eq!(errors.len(), 1);
}

#[tokio::test]
async fn test_delete_and_audit_snapshots_record() {
    let ledger = Ledger::in_memory().await.unwrap();
    let original = record("/images/c.jpg", "internal/c.jpg");
    ledger.upsert(&original).await.unwrap();

    let entry = ledger
        .delete_and_audit("/images/c.jpg", "s3://bucket/internal/c.jpg")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(entry.local_path, "/images/c.jpg");
    assert_eq!(entry.remote_key, "internal/c.jpg");
    assert_eq!(entry.remote_full_address, "s3://bucket/internal/c.jpg");
    assert_eq!(entry.original_status, BackupStatus::Uploaded);
    assert_eq!(entry.size_bytes, Some(42));
    assert_eq!(entry.uploaded_at, original.uploaded_at);
    assert!(entry.deleted_at >= entry.uploaded_at);

    assert!(ledger.find("/images/c.jpg").await.unwrap().is_none());
    let audit = ledger.list_audit("/images/c.jpg").await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].id, entry.id);
}

#[tokio::test]
async fn test_delete_and_audit_missing_record() {
    let ledger = Ledger::in_memory().await.unwrap();

    let entry = ledger.delete_and_audit("/images/none.jpg", "s3://b/k").await.unwrap();

    assert!(entry.is_none());
    assert_eq!(ledger.count_audit().await.unwrap(), 0);
}

#[tokio::test]
async fn test_abandoned_removal_rolls_back() {
    let ledger = Ledger::in_memory().await.unwrap();
    ledger.upsert(&record("/images/r.jpg", "internal/r.jpg")).await.unwrap();

    let pending = ledger.begin_removal("/images/r.jpg").await.unwrap().unwrap();
    assert_eq!(pending.record().remote_key, "internal/r.jpg");
    pending.rollback().await.unwrap();

    let pending = ledger.begin_removal("/images/r.jpg").await.unwrap().unwrap();
    drop(pending);

    assert!(ledger.find("/images/r.jpg").await.unwrap().is_some());
    assert_eq!(ledger.count_audit().await.unwrap(), 0);
}

#[tokio::test]
async fn test_audit_is_append_only() {
    let ledger = Ledger::in_memory().await.unwrap();
    ledger.upsert(&record("/images/z.jpg", "internal/z.jpg")).await.unwrap();
    ledger.delete_and_audit("/images/z.jpg", "s3://b/internal/z.jpg").await.unwrap();

    let update = sqlx::query("UPDATE backup_deletions SET remote_key = 'tampered'")
        .execute(ledger.pool())
        .await;
    assert!(update.is_err());

    let delete = sqlx::query("DELETE FROM backup_deletions").execute(ledger.pool()).await;
    assert!(delete.is_err());

    assert_eq!(ledger.count_audit().await.unwrap(), 1);
}

#[tokio::test]
async fn test_repeated_deletions_of_same_path_are_all_audited() {
    let ledger = Ledger::in_memory().await.unwrap();

    for _ in 0..2 {
        ledger.upsert(&record("/images/again.jpg", "internal/again.jpg")).await.unwrap();
        ledger
            .delete_and_audit("/images/again.jpg", "s3://b/internal/again.jpg")
            .await
            .unwrap()
            .unwrap();
    }

    assert_eq!(ledger.list_audit("/images/again.jpg").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_file_ledger_persists_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("ledger.db");
    let url = format!("sqlite:{}", path.display());

    let ledger = Ledger::connect(&url).await.unwrap();
    ledger.upsert(&record("/images/p.jpg", "internal/p.jpg")).await.unwrap();
    ledger.close().await;
    assert!(path.exists());

    let reopened = Ledger::connect(&url).await.unwrap();
    let found = reopened.find("/images/p.jpg").await.unwrap().unwrap();
    assert_eq!(found.remote_key, "internal/p.jpg");
    reopened.close().await;
}

#[tokio::test]
async fn test_connect_reports_unwritable_ledger_directory() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let url = format!("sqlite:{}", blocker.join("ledger.db").display());

    let result = Ledger::connect(&url).await;

    assert!(matches!(result, Err(coldsync::error::LedgerError::Connect(_))));
}
