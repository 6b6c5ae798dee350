//! Response cache for generated text
//!
//! LRU keyed by prompt fingerprint, with a time-to-live applied on read.
//! Capacity eviction is independent of age: a fresh entry can still be
//! pushed out for space.
//!
//! Author: hephaex@gmail.com

use docsight_core::{fingerprint, CacheStats, DocsightError, Result};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct CachedResponse {
    text: String,
    stored_at: Instant,
}

/// Thread-safe LRU + TTL cache of generated responses
pub struct ResponseCache {
    entries: Mutex<LruCache<String, CachedResponse>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, LruCache<String, CachedResponse>>> {
        self.entries
            .lock()
            .map_err(|_| DocsightError::LockPoisoned("response cache"))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached response for `prompt`.
    ///
    /// An entry at or past its TTL counts as a miss and is removed.
    pub fn get(&self, prompt: &str) -> Result<Option<String>> {
        let key = fingerprint(prompt);
        let mut entries = self.lock()?;

        let lookup = entries
            .get(&key)
            .map(|entry| (entry.stored_at.elapsed() < self.ttl).then(|| entry.text.clone()));
        let fresh = match lookup {
            Some(Some(text)) => Some(text),
            Some(None) => {
                entries.pop(&key);
                tracing::debug!("response_cache_expired");
                None
            }
            None => None,
        };
        drop(entries);

        if fresh.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(fresh)
    }

    /// Store or refresh a response, evicting least-recently-used entries
    /// while over capacity
    pub fn put(&self, prompt: &str, response: impl Into<String>) -> Result<()> {
        let entry = CachedResponse {
            text: response.into(),
            stored_at: Instant::now(),
        };
        let key = fingerprint(prompt);
        // `push` also hands back the old entry when the key is refreshed
        if let Some((evicted, _)) = self.lock()?.push(key.clone(), entry) {
            if evicted != key {
                tracing::debug!("response_cache_evicted");
            }
        }
        Ok(())
    }

    /// Whether an entry is physically stored, ignoring TTL and recency
    pub fn contains(&self, prompt: &str) -> Result<bool> {
        Ok(self.lock()?.contains(&fingerprint(prompt)))
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

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("ttl", &self.ttl)
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_hit_and_miss_counters() {
        let cache = ResponseCache::new(4, HOUR);
        assert_eq!(cache.get("q").unwrap(), None);

        cache.put("q", "answer").unwrap();
        assert_eq!(cache.get("q").unwrap().as_deref(), Some("answer"));

        let stats = cache.stats().unwrap();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.max_size, 4);
    }

    #[test]
    fn test_capacity_plus_one_evicts_least_recent() {
        let cache = ResponseCache::new(2, HOUR);
        cache.put("a", "1").unwrap();
        cache.put("b", "2").unwrap();
        assert!(cache.get("a").unwrap().is_some());

        cache.put("c", "3").unwrap();
        assert!(!cache.contains("b").unwrap());
        assert!(cache.contains("a").unwrap());
        assert!(cache.contains("c").unwrap());
    }

    #[test]
    fn test_put_refreshes_existing() {
        let cache = ResponseCache::new(2, HOUR);
        cache.put("a", "old").unwrap();
        cache.put("b", "2").unwrap();
        cache.put("a", "new").unwrap();
        cache.put("c", "3").unwrap();

        assert_eq!(cache.get("a").unwrap().as_deref(), Some("new"));
        assert!(!cache.contains("b").unwrap());
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache = ResponseCache::new(4, Duration::from_millis(20));
        cache.put("q", "stale").unwrap();
        std::thread::sleep(Duration::from_millis(40));

        assert!(cache.contains("q").unwrap());
        assert_eq!(cache.get("q").unwrap(), None);
        assert!(!cache.contains("q").unwrap());
        assert_eq!(cache.stats().unwrap().misses, 1);
    }

    #[test]
    fn test_zero_ttl_never_hits() {
        let cache = ResponseCache::new(4, Duration::ZERO);
        cache.put("q", "x").unwrap();
        assert_eq!(cache.get("q").unwrap(), None);
    }
}
