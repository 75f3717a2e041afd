//! Document store boundary
//!
//! The pipeline only needs `get`/`put` by collection and key. Transport and
//! consistency belong to the implementation; `SqliteStore` (in `db`) is the
//! durable one, `MemoryStore` backs tests and dry runs.

use crate::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Keyed JSON document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document, `None` if absent
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>>;

    /// Insert or replace a document
    async fn put(&self, collection: &str, key: &str, document: Value) -> Result<()>;
}

/// Typed fetch helper
pub async fn get_typed<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: &str,
    key: &str,
) -> Result<Option<T>> {
    match store.get(collection, key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Typed write helper
pub async fn put_typed<T: Serialize + ?Sized>(
    store: &dyn DocumentStore,
    collection: &str,
    key: &str,
    document: &T,
) -> Result<()> {
    store.put(collection, key, serde_json::to_value(document)?).await
}

/// In-memory document store
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.get(key))
            .cloned())
    }

    async fn put(&self, collection: &str, key: &str, document: Value) -> Result<()> {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), document);
        Ok(())
    }
}
