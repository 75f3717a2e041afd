//! Word-entity cache with per-key singleflight
//!
//! Word entities live in the document store (`words_th`, `words_en`) and
//! are shared by every bundle that contains the word. Lookups for the same
//! `(language, key)` are serialized so concurrent bundles never compute the
//! same word twice: the first caller computes and writes, later callers find
//! the stored result.
//!
//! Store failures never fail a token: a failed read is treated as a miss and
//! a failed write is logged. A value computed after a failed read is not
//! written back, since the entity's other fields are unknown.

use crate::types::ServiceError;
use chrono::Utc;
use fatbundle_common::store::{get_typed, put_typed};
use fatbundle_common::{DocumentStore, Language, WordEntity};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Where a resolved value came from
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Cached(T),
    Computed(T),
}

impl<T> Lookup<T> {
    pub fn into_inner(self) -> T {
        match self {
            Lookup::Cached(v) | Lookup::Computed(v) => v,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Lookup::Cached(_))
    }
}

type KeyLocks = HashMap<(Language, String), Arc<Mutex<()>>>;

/// Shared word-entity cache
pub struct WordCache {
    store: Arc<dyn DocumentStore>,
    in_flight: Mutex<KeyLocks>,
}

impl WordCache {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Read an entity; store errors count as a miss
    pub async fn entity(&self, lang: Language, key: &str) -> Option<WordEntity> {
        self.read(lang, key).await.ok().flatten()
    }

    async fn read(
        &self,
        lang: Language,
        key: &str,
    ) -> fatbundle_common::Result<Option<WordEntity>> {
        let result = get_typed(self.store.as_ref(), lang.word_collection(), key).await;
        if let Err(e) = &result {
            warn!(language = %lang, key, error = %e, "Word entity read failed");
        }
        result
    }

    /// Return the cached field or compute, store and return it
    ///
    /// `select` reads the field from an existing entity, `apply` writes a
    /// fresh value into the entity. Only successful computations are stored.
    pub async fn resolve<T, S, A, F, Fut>(
        &self,
        lang: Language,
        key: &str,
        text: &str,
        select: S,
        apply: A,
        compute: F,
    ) -> Result<Lookup<T>, ServiceError>
    where
        S: FnOnce(&WordEntity) -> Option<T>,
        A: FnOnce(&mut WordEntity, &T),
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let lock = self.key_lock(lang, key).await;
        let result = {
            let _guard = lock.lock().await;
            self.resolve_locked(lang, key, text, select, apply, compute)
                .await
        };
        self.release(lang, key, lock).await;
        result
    }

    async fn resolve_locked<T, S, A, F, Fut>(
        &self,
        lang: Language,
        key: &str,
        text: &str,
        select: S,
        apply: A,
        compute: F,
    ) -> Result<Lookup<T>, ServiceError>
    where
        S: FnOnce(&WordEntity) -> Option<T>,
        A: FnOnce(&mut WordEntity, &T),
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let existing = match self.read(lang, key).await {
            Ok(existing) => existing,
            Err(_) => return compute().await.map(Lookup::Computed),
        };
        if let Some(value) = existing.as_ref().and_then(select) {
            debug!(language = %lang, key, "Word cache hit");
            return Ok(Lookup::Cached(value));
        }

        let value = compute().await?;

        let mut entity = existing.unwrap_or_else(|| WordEntity::new(key, lang, text));
        apply(&mut entity, &value);
        entity.updated_at = Utc::now();

        if let Err(e) = put_typed(self.store.as_ref(), lang.word_collection(), key, &entity).await
        {
            warn!(language = %lang, key, error = %e, "Word entity write failed");
        }

        Ok(Lookup::Computed(value))
    }

    async fn key_lock(&self, lang: Language, key: &str) -> Arc<Mutex<()>> {
        self.in_flight
            .lock()
            .await
            .entry((lang, key.to_string()))
            .or_default()
            .clone()
    }

    async fn release(&self, lang: Language, key: &str, lock: Arc<Mutex<()>>) {
        let mut in_flight = self.in_flight.lock().await;
        // Map entry plus ours: nobody else is waiting
        if Arc::strong_count(&lock) <= 2 {
            in_flight.remove(&(lang, key.to_string()));
        }
    }

    /// Number of keys currently being resolved
    pub async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fatbundle_common::MemoryStore;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn cache() -> (Arc<MemoryStore>, WordCache) {
        let store = Arc::new(MemoryStore::new());
        let cache = WordCache::new(store.clone());
        (store, cache)
    }

    async fn romanize(
        cache: &WordCache,
        calls: &AtomicUsize,
    ) -> Result<Lookup<String>, ServiceError> {
        cache
            .resolve(
                Language::Th,
                "รถ",
                "รถ",
                |e| e.romanization.clone(),
                |e, v| e.romanization = Some(v.clone()),
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok("rot".to_string())
                },
            )
            .await
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let (store, cache) = cache();
        let calls = AtomicUsize::new(0);

        let first = romanize(&cache, &calls).await.unwrap();
        assert_eq!(first, Lookup::Computed("rot".to_string()));

        let second = romanize(&cache, &calls).await.unwrap();
        assert_eq!(second, Lookup::Cached("rot".to_string()));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.len("words_th").await, 1);
        assert_eq!(cache.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_compute_once() {
        let (_store, cache) = cache();
        let calls = AtomicUsize::new(0);

        let results = futures::future::join_all((0..8).map(|_| romanize(&cache, &calls))).await;

        let values: Vec<String> = results.into_iter().map(|r| r.unwrap().into_inner()).collect();
        assert!(values.iter().all(|v| v == "rot"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_compute_is_not_stored() {
        let (store, cache) = cache();

        let result: Result<Lookup<String>, ServiceError> = cache
            .resolve(
                Language::Th,
                "รถ",
                "รถ",
                |e| e.romanization.clone(),
                |e, v| e.romanization = Some(v.clone()),
                || async { Err(ServiceError::Network("down".to_string())) },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(store.len("words_th").await, 0);
    }

    #[tokio::test]
    async fn test_fields_accumulate_on_one_entity() {
        let (_store, cache) = cache();
        let calls = AtomicUsize::new(0);
        romanize(&cache, &calls).await.unwrap();

        cache
            .resolve(
                Language::Th,
                "รถ",
                "รถ",
                |e| e.legible.clone(),
                |e, v| e.legible = Some(v.clone()),
                || async { Ok("rót".to_string()) },
            )
            .await
            .unwrap();

        let entity = cache.entity(Language::Th, "รถ").await.unwrap();
        assert_eq!(entity.romanization.as_deref(), Some("rot"));
        assert_eq!(entity.legible.as_deref(), Some("rót"));
    }

    /// Memory store whose reads can be switched off
    #[derive(Default)]
    struct UnreadableStore {
        inner: MemoryStore,
        reads_fail: AtomicBool,
    }

    #[async_trait]
    impl DocumentStore for UnreadableStore {
        async fn get(
            &self,
            collection: &str,
            key: &str,
        ) -> fatbundle_common::Result<Option<Value>> {
            if self.reads_fail.load(Ordering::SeqCst) {
                return Err(fatbundle_common::Error::Internal("read refused".to_string()));
            }
            self.inner.get(collection, key).await
        }

        async fn put(
            &self,
            collection: &str,
            key: &str,
            document: Value,
        ) -> fatbundle_common::Result<()> {
            self.inner.put(collection, key, document).await
        }
    }

    #[tokio::test]
    async fn test_failed_read_skips_write_back() {
        let store = Arc::new(UnreadableStore::default());
        let cache = WordCache::new(store.clone());
        let calls = AtomicUsize::new(0);
        romanize(&cache, &calls).await.unwrap();

        store.reads_fail.store(true, Ordering::SeqCst);
        let legible = cache
            .resolve(
                Language::Th,
                "รถ",
                "รถ",
                |e| e.legible.clone(),
                |e, v| e.legible = Some(v.clone()),
                || async { Ok("rót".to_string()) },
            )
            .await
            .unwrap();
        assert_eq!(legible, Lookup::Computed("rót".to_string()));

        store.reads_fail.store(false, Ordering::SeqCst);
        let entity = cache.entity(Language::Th, "รถ").await.unwrap();
        assert_eq!(entity.romanization.as_deref(), Some("rot"));
        assert!(entity.legible.is_none());
        assert_eq!(cache.in_flight().await, 0);
    }
}
