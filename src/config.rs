use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// LA City "Crime Data" SODA endpoint
pub const DEFAULT_DATASET_URL: &str = "https://data.lacity.org/resource/y8y3-fqfu.json";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub cache: CacheConfig,
  /// Write logs to a daily rolling file here instead of stderr
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub dataset_url: String,
  /// Most rows upstream returns for one unpaginated request
  pub ceiling: usize,
  pub page_size: usize,
  /// Pause between page requests, to stay under upstream rate limits
  pub page_delay_ms: u64,
  /// Per-request timeout. Unset leaves the transport default in place.
  pub request_timeout_secs: Option<u64>,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      dataset_url: DEFAULT_DATASET_URL.to_string(),
      ceiling: 50_000,
      page_size: 1_000,
      page_delay_ms: 100,
      request_timeout_secs: None,
    }
  }
}

impl ApiConfig {
  pub fn page_delay(&self) -> Duration {
    Duration::from_millis(self.page_delay_ms)
  }

  pub fn request_timeout(&self) -> Option<Duration> {
    self.request_timeout_secs.map(Duration::from_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub default_ttl_secs: u64,
  pub dataset_ttl_secs: u64,
  pub date_range_ttl_secs: u64,
  pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      default_ttl_secs: 5 * 60,
      dataset_ttl_secs: 2 * 60,
      date_range_ttl_secs: 60 * 60,
      sweep_interval_secs: 60,
    }
  }
}

impl CacheConfig {
  pub fn default_ttl(&self) -> Duration {
    Duration::from_secs(self.default_ttl_secs)
  }

  pub fn dataset_ttl(&self) -> Duration {
    Duration::from_secs(self.dataset_ttl_secs)
  }

  pub fn date_range_ttl(&self) -> Duration {
    Duration::from_secs(self.date_range_ttl_secs)
  }

  pub fn sweep_interval(&self) -> Duration {
    // tokio's interval panics on a zero period
    Duration::from_secs(self.sweep_interval_secs.max(1))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./crimefeed.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/crimefeed/config.yaml
  ///
  /// Nothing is required, so with no file at all the defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("crimefeed.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("crimefeed").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;

    if config.api.page_size == 0 {
      return Err(eyre!("api.page_size must be greater than zero"));
    }
    if config.api.ceiling == 0 {
      return Err(eyre!("api.ceiling must be greater than zero"));
    }

    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_partial_file_keeps_defaults() {
    let config = Config::parse(
      r#"
api:
  page_delay_ms: 0
cache:
  dataset_ttl_secs: 30
"#,
    )
    .unwrap();

    assert_eq!(config.api.dataset_url, DEFAULT_DATASET_URL);
    assert_eq!(config.api.ceiling, 50_000);
    assert_eq!(config.api.page_size, 1_000);
    assert_eq!(config.api.page_delay(), Duration::ZERO);
    assert_eq!(config.api.request_timeout(), None);
    assert_eq!(config.cache.dataset_ttl(), Duration::from_secs(30));
    assert_eq!(config.cache.default_ttl(), Duration::from_secs(300));
    assert!(config.log_dir.is_none());
  }

  #[test]
  fn test_rejects_zero_page_size() {
    assert!(Config::parse("api:\n  page_size: 0\n").is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let missing = Path::new("/nonexistent/crimefeed/config.yaml");
    assert!(Config::load(Some(missing)).is_err());
  }

  #[test]
  fn test_sweep_interval_never_zero() {
    let cache = CacheConfig {
      sweep_interval_secs: 0,
      ..CacheConfig::default()
    };
    assert_eq!(cache.sweep_interval(), Duration::from_secs(1));
  }
}
