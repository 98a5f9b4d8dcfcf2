//! Process-lifetime response cache.
//!
//! This module provides an endpoint-agnostic caching mechanism that:
//! - Derives order-independent keys from a request's endpoint, params and body
//! - Stores opaque JSON payloads with an absolute per-entry expiry
//! - Evicts lazily on read and periodically via a background sweep
//! - Never stores failed or incomplete results

mod key;
mod layer;
mod storage;
mod traits;

pub use key::{CacheKey, RequestIdentity};
pub use layer::CacheLayer;
pub use storage::{CacheStorage, MemoryStorage, NoopStorage};
pub use traits::{Cacheable, QueryKey};
