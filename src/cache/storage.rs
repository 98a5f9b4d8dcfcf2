//! Cache storage trait and in-memory implementation.

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::key::CacheKey;

/// A live entry returned from storage.
#[derive(Debug, Clone)]
pub struct CachedPayload {
  /// The stored payload, shared with the entry
  pub payload: Arc<Value>,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
  /// When the entry stops being visible
  pub expires_at: DateTime<Utc>,
}

/// Diagnostic snapshot of a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
  pub total: usize,
  pub active: usize,
  pub expired: usize,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Get a live entry. Expired entries are removed on the way out.
  fn get(&self, key: &CacheKey) -> Option<CachedPayload>;

  /// Store a payload, overwriting any existing entry.
  fn set(&self, key: CacheKey, payload: Value, ttl: Duration);

  /// Remove one entry. Returns whether anything was removed.
  fn delete(&self, key: &CacheKey) -> bool;

  /// Remove every entry.
  #[allow(dead_code)]
  fn clear(&self);

  /// Remove every expired entry. Returns how many were removed.
  fn cleanup(&self) -> usize;

  fn stats(&self) -> CacheStats;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn get(&self, _key: &CacheKey) -> Option<CachedPayload> {
    None // Always miss
  }

  fn set(&self, _key: CacheKey, _payload: Value, _ttl: Duration) {
    // Discard
  }

  fn delete(&self, _key: &CacheKey) -> bool {
    false
  }

  fn clear(&self) {}

  fn cleanup(&self) -> usize {
    0
  }

  fn stats(&self) -> CacheStats {
    CacheStats::default()
  }
}

#[derive(Debug)]
struct CacheEntry {
  payload: Arc<Value>,
  created_at: DateTime<Utc>,
  expires_at: DateTime<Utc>,
}

impl CacheEntry {
  fn new(payload: Value, ttl: Duration) -> Self {
    let created_at = Utc::now();
    let expires_at = TimeDelta::from_std(ttl)
      .ok()
      .and_then(|ttl| created_at.checked_add_signed(ttl))
      .unwrap_or(DateTime::<Utc>::MAX_UTC);

    Self {
      payload: Arc::new(payload),
      created_at,
      expires_at,
    }
  }

  /// An entry is gone once its expiry instant is reached, so a zero TTL
  /// never produces a visible entry.
  fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at
  }
}

/// Concurrent in-memory storage.
///
/// Entries live in a sharded map, so readers, writers and the sweep only
/// contend when they touch the same shard. There is no cap on entry count;
/// growth is bounded by TTL and the periodic sweep.
#[derive(Debug, Default)]
pub struct MemoryStorage {
  entries: DashMap<CacheKey, CacheEntry>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStorage for MemoryStorage {
  fn get(&self, key: &CacheKey) -> Option<CachedPayload> {
    let now = Utc::now();

    // The shard guard must be released before removing below.
    let expired = match self.entries.get(key) {
      Some(entry) if !entry.is_expired(now) => {
        return Some(CachedPayload {
          payload: Arc::clone(&entry.payload),
          cached_at: entry.created_at,
          expires_at: entry.expires_at,
        });
      }
      Some(_) => true,
      None => false,
    };

    if expired {
      // A writer may have replaced the entry in between; only drop it if it
      // is still expired.
      self
        .entries
        .remove_if(key, |_, entry| entry.is_expired(Utc::now()));
    }

    None
  }

  fn set(&self, key: CacheKey, payload: Value, ttl: Duration) {
    self.entries.insert(key, CacheEntry::new(payload, ttl));
  }

  fn delete(&self, key: &CacheKey) -> bool {
    self.entries.remove(key).is_some()
  }

  fn clear(&self) {
    self.entries.clear();
  }

  fn cleanup(&self) -> usize {
    let now = Utc::now();
    let before = self.entries.len();
    self.entries.retain(|_, entry| !entry.is_expired(now));
    before.saturating_sub(self.entries.len())
  }

  fn stats(&self) -> CacheStats {
    let now = Utc::now();
    let mut stats = CacheStats::default();
    for entry in self.entries.iter() {
      stats.total += 1;
      if entry.is_expired(now) {
        stats.expired += 1;
      } else {
        stats.active += 1;
      }
    }
    stats
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{QueryKey, RequestIdentity};
  use serde_json::json;

  const MINUTE: Duration = Duration::from_secs(60);

  fn key(name: &str) -> CacheKey {
    RequestIdentity::get("https://example.test/resource.json")
      .param("name", name)
      .cache_key()
  }

  #[test]
  fn test_get_missing_is_absent() {
    let storage = MemoryStorage::new();
    assert!(storage.get(&key("a")).is_none());
  }

  #[test]
  fn test_set_then_get() {
    let storage = MemoryStorage::new();
    storage.set(key("a"), json!({"count": "12"}), MINUTE);

    let cached = storage.get(&key("a")).unwrap();
    assert_eq!(*cached.payload, json!({"count": "12"}));
    assert!(cached.expires_at > cached.cached_at);
  }

  #[test]
  fn test_set_overwrites() {
    let storage = MemoryStorage::new();
    storage.set(key("a"), json!(1), MINUTE);
    storage.set(key("a"), json!(2), MINUTE);

    assert_eq!(*storage.get(&key("a")).unwrap().payload, json!(2));
    assert_eq!(storage.stats().total, 1);
  }

  #[test]
  fn test_zero_ttl_is_expired_on_next_get() {
    let storage = MemoryStorage::new();
    storage.set(key("a"), json!(1), Duration::ZERO);

    assert!(storage.get(&key("a")).is_none());
    // The read evicted it
    assert_eq!(storage.stats().total, 0);
  }

  #[test]
  fn test_stats_counts_expired_without_cleanup() {
    let storage = MemoryStorage::new();
    for i in 0..5 {
      storage.set(key(&format!("live{}", i)), json!(i), MINUTE);
    }
    for i in 0..3 {
      storage.set(key(&format!("dead{}", i)), json!(i), Duration::ZERO);
    }

    let stats = storage.stats();
    assert_eq!(stats.total, 8);
    assert_eq!(stats.expired, 3);
    assert_eq!(stats.active, 5);
  }

  #[test]
  fn test_cleanup_removes_only_expired() {
    let storage = MemoryStorage::new();
    storage.set(key("live"), json!(1), MINUTE);
    storage.set(key("dead1"), json!(2), Duration::ZERO);
    storage.set(key("dead2"), json!(3), Duration::ZERO);

    assert_eq!(storage.cleanup(), 2);
    assert_eq!(
      storage.stats(),
      CacheStats {
        total: 1,
        active: 1,
        expired: 0
      }
    );
    assert!(storage.get(&key("live")).is_some());
  }

  #[test]
  fn test_delete_and_clear() {
    let storage = MemoryStorage::new();
    storage.set(key("a"), json!(1), MINUTE);
    storage.set(key("b"), json!(2), MINUTE);

    assert!(storage.delete(&key("a")));
    assert!(!storage.delete(&key("a")));
    assert!(storage.get(&key("b")).is_some());

    storage.clear();
    assert_eq!(storage.stats().total, 0);
  }

  #[test]
  fn test_concurrent_writes_and_sweeps() {
    let storage = MemoryStorage::new();

    std::thread::scope(|s| {
      for t in 0..4 {
        let storage = &storage;
        s.spawn(move || {
          for i in 0..200 {
            let ttl = if i % 2 == 0 { MINUTE } else { Duration::ZERO };
            storage.set(key(&format!("{}-{}", t, i)), json!(i), ttl);
            storage.get(&key(&format!("{}-{}", t, i / 2)));
          }
        });
      }
      s.spawn(|| {
        for _ in 0..50 {
          storage.cleanup();
        }
      });
    });

    storage.cleanup();
    let stats = storage.stats();
    assert_eq!(stats.total, 400);
    assert_eq!(stats.active, 400);
  }

  #[test]
  fn test_noop_storage_never_hits() {
    let storage = NoopStorage;
    storage.set(key("a"), json!(1), MINUTE);
    assert!(storage.get(&key("a")).is_none());
    assert_eq!(storage.stats(), CacheStats::default());
  }
}
