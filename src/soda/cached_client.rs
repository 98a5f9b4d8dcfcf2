//! Cached SODA client that wraps SodaClient with transparent caching.

use color_eyre::Result;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::cache::{CacheLayer, CacheStorage, QueryKey, RequestIdentity};
use crate::config::CacheConfig;

use super::cache::SodaQueryKey;
use super::client::{FetchContext, ProgressFn, SodaClient};
use super::types::{DateRange, FetchMode, Fetched, QueryWindow, Retrieval};

/// SODA client with transparent caching support.
///
/// This wraps the underlying SodaClient and is what the boundary talks to.
/// Complete results are cached per request identity; degraded ones are
/// returned but never stored.
pub struct CachedSodaClient<S: CacheStorage> {
  inner: SodaClient,
  cache: CacheLayer<S>,
  dataset_ttl: Duration,
  date_range_ttl: Duration,
}

impl<S: CacheStorage> CachedSodaClient<S> {
  pub fn new(inner: SodaClient, cache: CacheLayer<S>, config: &CacheConfig) -> Self {
    Self {
      inner,
      cache,
      dataset_ttl: config.dataset_ttl(),
      date_range_ttl: config.date_range_ttl(),
    }
  }

  pub fn cache(&self) -> &CacheLayer<S> {
    &self.cache
  }

  pub fn dataset_url(&self) -> &Url {
    self.inner.dataset_url()
  }

  /// Records for `start..=end` (`YYYY-MM-DD`), with caching.
  pub async fn retrieve(
    &self,
    start: &str,
    end: &str,
    mode: FetchMode,
    ctx: &FetchContext,
    on_progress: Option<&ProgressFn>,
  ) -> Result<Retrieval> {
    let window = QueryWindow::parse(start, end)?;
    let query_key = SodaQueryKey::Dataset {
      endpoint: self.inner.dataset_url().to_string(),
      window,
      mode,
    };

    let inner = &self.inner;
    let result = self
      .cache
      .cached_call(&query_key, Some(self.dataset_ttl), || async move {
        Ok::<_, color_eyre::Report>(inner.resolve(&window, mode, ctx, on_progress).await)
      })
      .await?;

    debug!(
      query = %query_key.description(),
      source = ?result.source,
      cached_at = ?result.cached_at,
      "retrieve"
    );
    Ok(result.data)
  }

  /// Row count for a window (not cached - cheap, and a failed count reads
  /// as zero).
  pub async fn count(&self, start: &str, end: &str, ctx: &FetchContext) -> Result<Fetched<usize>> {
    let window = QueryWindow::parse(start, end)?;
    Ok(self.inner.count(&window, ctx).await)
  }

  /// Earliest and latest available dates, cached for longer than records.
  pub async fn date_range(&self, ctx: &FetchContext) -> Result<DateRange> {
    let query_key = SodaQueryKey::DateRange {
      endpoint: self.inner.dataset_url().to_string(),
    };

    let inner = &self.inner;
    let result = self
      .cache
      .cached_call(&query_key, Some(self.date_range_ttl), || {
        inner.date_range(ctx)
      })
      .await?;

    Ok(result.data)
  }

  /// Any upstream GET, keyed by URL and params. `ttl` defaults to the cache
  /// layer's default.
  pub async fn cached_get_json(
    &self,
    url: &str,
    params: &[(&str, String)],
    ttl: Option<Duration>,
    ctx: &FetchContext,
  ) -> Result<Value> {
    let identity = RequestIdentity::get(url).params(params.iter().map(|(k, v)| (*k, v)));

    let inner = &self.inner;
    let result = self
      .cache
      .cached_call(&identity, ttl, || inner.get_json(url, params, ctx))
      .await?;

    Ok(result.data)
  }
}

impl<S: CacheStorage> Clone for CachedSodaClient<S> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
      cache: self.cache.clone(),
      dataset_ttl: self.dataset_ttl,
      date_range_ttl: self.date_range_ttl,
    }
  }
}
