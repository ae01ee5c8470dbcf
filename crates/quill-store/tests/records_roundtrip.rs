//! Integration tests for record persistence across store handles and
//! concurrent access.

use quill_store::RecordStore;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("notes.db");

    let first = RecordStore::open(&path).await.unwrap();
    let milk = first.create("buy milk").await.unwrap();
    let eggs = first.create("buy eggs").await.unwrap();
    first.update(eggs.id, "buy a dozen eggs").await.unwrap();
    drop(first);

    let second = RecordStore::open(&path).await.unwrap();
    let records = second.list().await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], milk);
    assert_eq!(records[1].content, "buy a dozen eggs");
}

#[tokio::test]
async fn record_serializes_with_snake_case_timestamps() {
    let dir = TempDir::new().unwrap();
    let store = RecordStore::open(dir.path().join("notes.db")).await.unwrap();
    let record = store.create("hello").await.unwrap();

    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["id"], record.id);
    assert_eq!(json["content"], "hello");
    assert!(json["created_at"].is_string());
    assert!(json["updated_at"].is_string());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_get_distinct_ids() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RecordStore::open(dir.path().join("notes.db")).await.unwrap());

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.create(&format!("note {i}")).await.unwrap().id })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 20);
    assert_eq!(store.list().await.unwrap().len(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_to_one_record_all_land() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RecordStore::open(dir.path().join("notes.db")).await.unwrap());
    let record = store.create("v0").await.unwrap();

    let handles: Vec<_> = (1..=10)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.update(record.id, &format!("v{i}")).await.unwrap() })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().is_some());
    }

    let last = store.read(record.id).await.unwrap().unwrap();
    let version: u32 = last.content.trim_start_matches('v').parse().unwrap();
    assert!((1..=10).contains(&version));
    assert!(last.updated_at >= record.updated_at);
}
