//! Cache layer that wraps outbound calls with cache-or-fetch semantics.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::storage::{CacheStats, CacheStorage};
use super::traits::{CacheResult, Cacheable, QueryKey};

/// Cache layer that manages caching logic around network calls.
///
/// This layer sits between the boundary and the upstream client. It is an
/// explicit shared instance: clones share one storage backend.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  /// TTL for callers that don't specify one
  default_ttl: Duration,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
      default_ttl: Duration::from_secs(5 * 60),
    }
  }

  /// Set the TTL used when a call doesn't pass one.
  pub fn with_default_ttl(mut self, default_ttl: Duration) -> Self {
    self.default_ttl = default_ttl;
    self
  }

  pub fn stats(&self) -> CacheStats {
    self.storage.stats()
  }

  /// Serve `key` from the cache, or run `perform` and cache its result.
  ///
  /// 1. Live entry - return it without calling `perform`
  /// 2. Missing or expired - call `perform`
  /// 3. On error - propagate, nothing is stored
  /// 4. On success - store only if the payload is complete
  pub async fn cached_call<K, T, F, Fut>(
    &self,
    key: &K,
    ttl: Option<Duration>,
    perform: F,
  ) -> Result<CacheResult<T>>
  where
    K: QueryKey + ?Sized,
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let cache_key = key.cache_key();

    if let Some(cached) = self.storage.get(&cache_key) {
      match T::deserialize(&*cached.payload) {
        Ok(data) => {
          debug!(key = %key.description(), expires_at = %cached.expires_at, "cache hit");
          return Ok(CacheResult::from_cache(data, cached.cached_at));
        }
        Err(e) => {
          // Same key, different payload type. Treat as a miss.
          warn!(key = %key.description(), error = %e, "discarding unreadable cache entry");
          self.storage.delete(&cache_key);
        }
      }
    }

    debug!(key = %key.description(), "cache miss");
    let data = perform().await?;

    if data.is_complete() {
      let payload =
        serde_json::to_value(&data).map_err(|e| eyre!("Failed to serialize payload: {}", e))?;
      self
        .storage
        .set(cache_key, payload, ttl.unwrap_or(self.default_ttl));
    } else {
      debug!(key = %key.description(), "incomplete result, not cached");
    }

    Ok(CacheResult::from_network(data))
  }
}

impl<S: CacheStorage + 'static> CacheLayer<S> {
  /// Spawn the periodic sweep. It runs for as long as the runtime does.
  pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
    let storage = Arc::clone(&self.storage);
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(every);
      // The first tick completes immediately
      interval.tick().await;
      loop {
        interval.tick().await;
        let removed = storage.cleanup();
        if removed > 0 {
          let stats = storage.stats();
          debug!(removed, total = stats.total, "cache sweep");
        }
      }
    })
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      default_ttl: self.default_ttl,
    }
  }
}
