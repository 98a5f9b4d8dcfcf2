//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use super::key::CacheKey;

/// Trait for payloads that can be stored in the cache.
///
/// Payloads round-trip through JSON. A payload that only partially succeeded
/// reports itself as incomplete and is handed back to the caller without
/// being stored.
pub trait Cacheable: Serialize + DeserializeOwned + Send {
  /// Whether this payload is safe to serve to later callers.
  fn is_complete(&self) -> bool {
    true
  }
}

impl Cacheable for serde_json::Value {}

/// Trait for anything that identifies a cacheable request.
pub trait QueryKey {
  /// Stable key for cache lookups
  fn cache_key(&self) -> CacheKey;

  /// Human readable description, used in logs
  fn description(&self) -> String;
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from the upstream endpoint
  Network,
  /// Live entry served from the cache
  Cache,
}
