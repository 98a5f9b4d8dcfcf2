//! Cache keys for SODA queries.

use crate::cache::{CacheKey, QueryKey, RequestIdentity};

use super::types::{FetchMode, QueryWindow, DATE_FORMAT};

/// Query key types for SODA calls.
#[derive(Clone, Debug)]
pub enum SodaQueryKey {
  /// Records for a date window, fetched with a given mode
  Dataset {
    endpoint: String,
    window: QueryWindow,
    mode: FetchMode,
  },
  /// Earliest and latest available dates
  DateRange { endpoint: String },
}

impl SodaQueryKey {
  pub fn identity(&self) -> RequestIdentity {
    match self {
      Self::Dataset {
        endpoint,
        window,
        mode,
      } => RequestIdentity::get(endpoint)
        .param("start", window.start.format(DATE_FORMAT))
        .param("end", window.end.format(DATE_FORMAT))
        .param("mode", mode),
      Self::DateRange { endpoint } => RequestIdentity::get(endpoint).param("select", "date_range"),
    }
  }
}

impl QueryKey for SodaQueryKey {
  fn cache_key(&self) -> CacheKey {
    self.identity().cache_key()
  }

  fn description(&self) -> String {
    match self {
      Self::Dataset { window, mode, .. } => format!("records {} ({})", window, mode),
      Self::DateRange { .. } => "date range".to_string(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const URL: &str = "https://data.lacity.org/resource/y8y3-fqfu.json";

  fn dataset(start: &str, end: &str, mode: FetchMode) -> SodaQueryKey {
    SodaQueryKey::Dataset {
      endpoint: URL.to_string(),
      window: QueryWindow::parse(start, end).unwrap(),
      mode,
    }
  }

  #[test]
  fn test_dataset_keys() {
    let a = dataset("2025-07-26", "2025-08-25", FetchMode::Auto);
    let same = dataset("2025-07-26", "2025-08-25", FetchMode::Auto);
    let other_end = dataset("2025-07-26", "2025-08-24", FetchMode::Auto);
    let other_mode = dataset("2025-07-26", "2025-08-25", FetchMode::Paginated);

    assert_eq!(a.cache_key(), same.cache_key());
    assert_ne!(a.cache_key(), other_end.cache_key());
    assert_ne!(a.cache_key(), other_mode.cache_key());
  }

  #[test]
  fn test_dataset_key_matches_plain_identity() {
    let key = dataset("2025-07-26", "2025-08-25", FetchMode::SingleShot);
    let plain = RequestIdentity::get(URL)
      .param("mode", "single-shot")
      .param("end", "2025-08-25")
      .param("start", "2025-07-26");
    assert_eq!(key.cache_key(), plain.cache_key());
  }

  #[test]
  fn test_date_range_key_differs_from_dataset() {
    let range = SodaQueryKey::DateRange {
      endpoint: URL.to_string(),
    };
    let records = dataset("2025-07-26", "2025-08-25", FetchMode::Auto);
    assert_ne!(range.cache_key(), records.cache_key());
    assert_eq!(range.description(), "date range");
  }
}
