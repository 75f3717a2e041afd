//! Document store tests against both implementations

use fatbundle_common::bundle::{TrackLine, BUNDLE_COLLECTION};
use fatbundle_common::db::{init_database, SqliteStore};
use fatbundle_common::store::{get_typed, put_typed};
use fatbundle_common::{DocumentStore, FatBundle, Language, MemoryStore, WordEntity};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

async fn exercise(store: &dyn DocumentStore) {
    assert!(store.get(BUNDLE_COLLECTION, "b1").await.unwrap().is_none());

    let mut bundle = FatBundle::template("b1");
    bundle.th = TrackLine::timed(1.0, 2.5);
    put_typed(store, BUNDLE_COLLECTION, "b1", &bundle).await.unwrap();

    let loaded: FatBundle = get_typed(store, BUNDLE_COLLECTION, "b1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded, bundle);

    // Upsert replaces the document
    bundle.th.text = Some("รถ".to_string());
    put_typed(store, BUNDLE_COLLECTION, "b1", &bundle).await.unwrap();
    let loaded: FatBundle = get_typed(store, BUNDLE_COLLECTION, "b1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.th.text.as_deref(), Some("รถ"));

    // Same key in another collection is a different document
    let entity = WordEntity::new("b1", Language::Th, "b1");
    put_typed(store, Language::Th.word_collection(), "b1", &entity)
        .await
        .unwrap();
    let loaded: FatBundle = get_typed(store, BUNDLE_COLLECTION, "b1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded, bundle);
}

#[tokio::test]
async fn test_memory_store_contract() {
    let store = MemoryStore::new();
    exercise(&store).await;
    assert_eq!(store.len(BUNDLE_COLLECTION).await, 1);
}

#[tokio::test]
async fn test_sqlite_store_contract() {
    let temp_dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&temp_dir.path().join("fatbundle.db"))
        .await
        .unwrap();
    exercise(&store).await;
}

#[tokio::test]
async fn test_database_creation_when_missing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("fatbundle.db");

    let pool = init_database(&db_path).await.unwrap();
    assert!(db_path.exists());

    let (table,): (String,) = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'documents'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(table, "documents");
}

#[tokio::test]
async fn test_database_reopen_keeps_documents() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("fatbundle.db");

    {
        let store = SqliteStore::open(&db_path).await.unwrap();
        store
            .put(BUNDLE_COLLECTION, "b1", json!({ "id": "b1" }))
            .await
            .unwrap();
    }

    let store = SqliteStore::open(&db_path).await.unwrap();
    assert_eq!(
        store.get(BUNDLE_COLLECTION, "b1").await.unwrap(),
        Some(json!({ "id": "b1" }))
    );
}

#[tokio::test]
async fn test_concurrent_writers_on_one_pool() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(
        SqliteStore::open(&temp_dir.path().join("fatbundle.db"))
            .await
            .unwrap(),
    );

    let mut handles = Vec::new();
    for i in 0..10 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .put(BUNDLE_COLLECTION, &format!("b{}", i), json!({ "n": i }))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for i in 0..10 {
        let doc = store
            .get(BUNDLE_COLLECTION, &format!("b{}", i))
            .await
            .unwrap();
        assert_eq!(doc, Some(json!({ "n": i })));
    }
}
