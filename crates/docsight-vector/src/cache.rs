//! Embedding cache
//!
//! Bounded LRU of query embeddings keyed by the SHA-256 fingerprint of the
//! raw text. Embedding computation happens outside the lock, so concurrent
//! misses for unrelated texts never serialize on each other.
//!
//! Author: hephaex@gmail.com

use docsight_core::{fingerprint, CacheStats, DocsightError, Result};
use lru::LruCache;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Cache for text embeddings
///
/// A hit moves the entry to the most-recently-used position; inserting
/// past capacity evicts the least recently touched entry.
pub struct EmbeddingCache {
    entries: Mutex<LruCache<String, Vec<f32>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN),
            )),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, LruCache<String, Vec<f32>>>> {
        self.entries
            .lock()
            .map_err(|_| DocsightError::LockPoisoned("embedding cache"))
    }

    /// Look up a cached embedding, counting the hit or miss
    pub fn get(&self, text: &str) -> Result<Option<Vec<f32>>> {
        let key = fingerprint(text);
        let found = self.lock()?.get(&key).cloned();

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(found)
    }

    /// Store an embedding
    pub fn put(&self, text: &str, embedding: Vec<f32>) -> Result<()> {
        let key = fingerprint(text);
        // Re-inserting an existing key refreshes it in place: last writer wins
        self.lock()?.put(key, embedding);
        Ok(())
    }

    /// Return the cached embedding for `text`, computing and caching it on a miss
    pub async fn get_or_compute<F, Fut>(&self, text: &str, compute: F) -> Result<Vec<f32>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<f32>>>,
    {
        if let Some(embedding) = self.get(text)? {
            tracing::debug!("embedding_cache_hit");
            return Ok(embedding);
        }

        let embedding = compute().await?;
        self.put(text, embedding.clone())?;
        Ok(embedding)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    pub fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let entries = self.lock()?;
        Ok(CacheStats::new(
            entries.len(),
            entries.cap().get(),
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        ))
    }
}

impl std::fmt::Debug for EmbeddingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingCache")
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_get_or_compute_caches() {
        let cache = EmbeddingCache::new(4);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let v = cache
                .get_or_compute("indemnification", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1.0, 2.0])
                })
                .await
                .unwrap();
            assert_eq!(v, vec![1.0, 2.0]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats().unwrap();
        assert_eq!((stats.hits, stats.misses), (2, 1));
        assert_eq!(stats.size, 1);
        assert_eq!(stats.max_size, 4);
    }

    #[tokio::test]
    async fn test_compute_error_is_not_cached() {
        let cache = EmbeddingCache::new(4);
        let err = cache
            .get_or_compute("broken", || async {
                Err(DocsightError::Backend("down".to_string()))
            })
            .await;
        assert!(err.is_err());
        assert!(cache.is_empty().unwrap());
    }

    #[test]
    fn test_capacity_plus_one_evicts_least_recent() {
        let cache = EmbeddingCache::new(3);
        cache.put("a", vec![1.0]).unwrap();
        cache.put("b", vec![2.0]).unwrap();
        cache.put("c", vec![3.0]).unwrap();

        // Touch "a" so "b" becomes the eviction candidate
        assert!(cache.get("a").unwrap().is_some());
        cache.put("d", vec![4.0]).unwrap();

        assert_eq!(cache.len().unwrap(), 3);
        assert!(cache.get("b").unwrap().is_none());
        assert!(cache.get("a").unwrap().is_some());
        assert!(cache.get("c").unwrap().is_some());
        assert!(cache.get("d").unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_or_compute_overlapping_keys() {
        const TASKS: usize = 8;
        const KEYS: usize = 4;
        const ROUNDS: usize = 5;

        let cache = Arc::new(EmbeddingCache::new(KEYS + 2));
        let mut handles = Vec::with_capacity(TASKS);
        for task in 0..TASKS {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                for round in 0..ROUNDS {
                    let key = (task + round) % KEYS;
                    let text = format!("clause {key}");
                    let v = cache
                        .get_or_compute(&text, || async move {
                            tokio::task::yield_now().await;
                            Ok(vec![key as f32])
                        })
                        .await
                        .unwrap();
                    assert_eq!(v, vec![key as f32]);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = cache.stats().unwrap();
        assert_eq!(stats.hits + stats.misses, (TASKS * ROUNDS) as u64);
        assert!(stats.misses >= KEYS as u64);
        assert!(stats.size <= stats.max_size);
        // Racing misses on one key overwrite a single slot
        assert_eq!(stats.size, KEYS);
        for key in 0..KEYS {
            assert_eq!(
                cache.get(&format!("clause {key}")).unwrap(),
                Some(vec![key as f32])
            );
        }
    }

    #[test]
    fn test_clear() {
        let cache = EmbeddingCache::new(2);
        cache.put("a", vec![1.0]).unwrap();
        cache.clear().unwrap();
        assert!(cache.get("a").unwrap().is_none());
    }
}
