use crate::config::ApiConfig;
use crate::soda::api_types::{floating_date, ApiCountRow, ApiDateRangeRow};
use crate::soda::types::{
  DateRange, FetchMode, Fetched, QueryWindow, Record, Retrieval, SoftFailure, Strategy,
  DATE_FORMAT,
};
use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

/// Reporting districts covered by this deployment.
pub const DISTRICTS: [&str; 7] = ["645", "646", "647", "666", "663", "656", "676"];

/// Newest incidents first
const ORDER: &str = "date_occ DESC";

/// Why a single upstream request failed.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
  #[error("request failed: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("upstream returned HTTP {0}")]
  Status(reqwest::StatusCode),
  #[error("malformed response: {0}")]
  Malformed(#[from] serde_json::Error),
  #[error("deadline exceeded")]
  DeadlineExceeded,
}

/// Per-retrieval context threaded through every upstream request.
///
/// The default has no deadline, so a hung request stalls until the
/// transport gives up.
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchContext {
  deadline: Option<Instant>,
}

impl FetchContext {
  pub fn with_deadline(deadline: Instant) -> Self {
    Self {
      deadline: Some(deadline),
    }
  }

  pub fn with_timeout(timeout: Duration) -> Self {
    Self::with_deadline(Instant::now() + timeout)
  }
}

/// Called after each page with `(records_so_far, total_expected)`.
pub type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

/// SODA dataset client
#[derive(Clone)]
pub struct SodaClient {
  http: reqwest::Client,
  dataset_url: Url,
  ceiling: usize,
  page_size: usize,
  page_delay: Duration,
}

impl SodaClient {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let dataset_url = Url::parse(&config.dataset_url)
      .map_err(|e| eyre!("Invalid dataset URL {}: {}", config.dataset_url, e))?;

    let mut builder =
      reqwest::Client::builder().user_agent(concat!("crimefeed/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = config.request_timeout() {
      builder = builder.timeout(timeout);
    }
    let http = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      dataset_url,
      ceiling: config.ceiling,
      page_size: config.page_size,
      page_delay: config.page_delay(),
    })
  }

  pub fn dataset_url(&self) -> &Url {
    &self.dataset_url
  }

  /// Filter on the fixed districts only
  fn district_clause() -> String {
    let districts = DISTRICTS
      .iter()
      .map(|d| format!("'{}'", d))
      .collect::<Vec<_>>()
      .join(", ");
    format!("rpt_dist_no IN ({})", districts)
  }

  /// Filter on the fixed districts and an inclusive date window.
  ///
  /// `date_occ` is a timestamp, so the end bound is the start of the next
  /// day to keep the whole last day in range.
  pub fn where_clause(window: &QueryWindow) -> String {
    let end = match window.end.succ_opt() {
      Some(next) => format!("date_occ < '{}'", next.format(DATE_FORMAT)),
      None => format!("date_occ <= '{}'", window.end.format(DATE_FORMAT)),
    };
    format!(
      "{} AND date_occ >= '{}' AND {}",
      Self::district_clause(),
      window.start.format(DATE_FORMAT),
      end
    )
  }

  /// Issue one GET and decode the JSON body.
  async fn send<T: DeserializeOwned>(
    &self,
    url: Url,
    params: &[(&str, String)],
    ctx: &FetchContext,
  ) -> std::result::Result<T, RequestError> {
    let request = async {
      let response = self.http.get(url).query(params).send().await?;
      let status = response.status();
      if !status.is_success() {
        return Err(RequestError::Status(status));
      }
      let body = response.bytes().await?;
      Ok::<T, RequestError>(serde_json::from_slice(&body)?)
    };

    match ctx.deadline {
      Some(deadline) => tokio::time::timeout_at(deadline, request)
        .await
        .map_err(|_| RequestError::DeadlineExceeded)?,
      None => request.await,
    }
  }

  /// Number of rows upstream holds for the window.
  ///
  /// Never fails: any transport or parse problem reads as zero, with the
  /// reason attached.
  pub async fn count(&self, window: &QueryWindow, ctx: &FetchContext) -> Fetched<usize> {
    let params = [
      ("$select", "count(*)".to_string()),
      ("$where", Self::where_clause(window)),
    ];

    match self
      .send::<Vec<ApiCountRow>>(self.dataset_url.clone(), &params, ctx)
      .await
    {
      Ok(rows) => match rows.first() {
        Some(row) => {
          debug!(%window, count = row.count, "count query");
          Fetched::complete(row.count)
        }
        None => {
          warn!(%window, "count query returned no rows");
          Fetched::degraded(
            0,
            SoftFailure::CountFailed {
              reason: "empty count response".to_string(),
            },
          )
        }
      },
      Err(e) => {
        warn!(%window, error = %e, "count query failed");
        Fetched::degraded(
          0,
          SoftFailure::CountFailed {
            reason: e.to_string(),
          },
        )
      }
    }
  }

  /// One request at the row ceiling.
  ///
  /// A window holding more rows than the ceiling comes back silently
  /// truncated to exactly `ceiling` rows.
  pub async fn fetch_single_shot(
    &self,
    window: &QueryWindow,
    ctx: &FetchContext,
  ) -> Fetched<Vec<Record>> {
    let params = [
      ("$where", Self::where_clause(window)),
      ("$order", ORDER.to_string()),
      ("$limit", self.ceiling.to_string()),
    ];

    match self
      .send::<Vec<Record>>(self.dataset_url.clone(), &params, ctx)
      .await
    {
      Ok(records) => {
        debug!(%window, rows = records.len(), "single-shot query");
        Fetched::complete(records)
      }
      Err(e) => {
        warn!(%window, error = %e, "single-shot query failed");
        Fetched::degraded(
          Vec::new(),
          SoftFailure::SingleShotFailed {
            reason: e.to_string(),
          },
        )
      }
    }
  }

  /// Count, then sweep the window page by page.
  ///
  /// Pages are requested strictly one after another with `page_delay`
  /// between them. The sweep ends when the count is reached or a page comes
  /// back short, whichever happens first. A failed page ends the sweep and
  /// keeps what was already fetched.
  pub async fn fetch_paginated(
    &self,
    window: &QueryWindow,
    ctx: &FetchContext,
    on_progress: Option<&ProgressFn>,
  ) -> Fetched<Vec<Record>> {
    let total = self.count(window, ctx).await;
    if let Some(failure) = total.soft_failure {
      return Fetched::degraded(Vec::new(), failure);
    }
    let total = total.data;
    if total == 0 {
      return Fetched::complete(Vec::new());
    }

    let where_clause = Self::where_clause(window);
    let mut records: Vec<Record> = Vec::with_capacity(total);
    let mut offset = 0usize;
    let mut page = 1usize;

    while records.len() < total {
      if page > 1 {
        tokio::time::sleep(self.page_delay).await;
      }

      debug!(
        %window,
        page,
        first = offset + 1,
        last = (offset + self.page_size).min(total),
        "fetching page"
      );

      let params = [
        ("$where", where_clause.clone()),
        ("$order", ORDER.to_string()),
        ("$limit", self.page_size.to_string()),
        ("$offset", offset.to_string()),
      ];

      let rows = match self
        .send::<Vec<Record>>(self.dataset_url.clone(), &params, ctx)
        .await
      {
        Ok(rows) => rows,
        Err(e) => {
          warn!(%window, page, offset, kept = records.len(), error = %e, "page request failed");
          return Fetched::degraded(
            records,
            SoftFailure::PageFailed {
              offset,
              reason: e.to_string(),
            },
          );
        }
      };

      let received = rows.len();
      records.extend(rows);
      if let Some(progress) = on_progress {
        progress(records.len(), total);
      }

      // The count may be stale; a short page is the real end.
      if received < self.page_size {
        break;
      }
      offset += self.page_size;
      page += 1;
    }

    info!(%window, pages = page, rows = records.len(), expected = total, "paginated sweep done");
    Fetched::complete(records)
  }

  /// Fetch a window with the requested strategy.
  ///
  /// `Auto` tries a single shot first. If that returns exactly `ceiling`
  /// rows it may have been truncated, so the result is thrown away and the
  /// window is swept page by page instead. A window that really holds
  /// `ceiling` rows pays for both.
  pub async fn resolve(
    &self,
    window: &QueryWindow,
    mode: FetchMode,
    ctx: &FetchContext,
    on_progress: Option<&ProgressFn>,
  ) -> Retrieval {
    match mode {
      FetchMode::SingleShot => {
        Retrieval::new(self.fetch_single_shot(window, ctx).await, Strategy::SingleShot)
      }
      FetchMode::Paginated => Retrieval::new(
        self.fetch_paginated(window, ctx, on_progress).await,
        Strategy::Paginated,
      ),
      FetchMode::Auto => {
        let single = self.fetch_single_shot(window, ctx).await;
        if single.data.len() != self.ceiling {
          return Retrieval::new(single, Strategy::SingleShot);
        }

        info!(%window, ceiling = self.ceiling, "single shot hit the ceiling, paginating");
        Retrieval::new(
          self.fetch_paginated(window, ctx, on_progress).await,
          Strategy::PaginatedAfterTruncation,
        )
      }
    }
  }

  /// Earliest and latest occurrence dates held for the districts.
  pub async fn date_range(&self, ctx: &FetchContext) -> Result<DateRange> {
    let params = [
      (
        "$select",
        "min(date_occ) AS min_date, max(date_occ) AS max_date".to_string(),
      ),
      ("$where", Self::district_clause()),
    ];

    let rows: Vec<ApiDateRangeRow> = self
      .send(self.dataset_url.clone(), &params, ctx)
      .await
      .map_err(|e| eyre!("Date range query failed: {}", e))?;

    let row = rows
      .into_iter()
      .next()
      .ok_or_else(|| eyre!("Date range query returned no rows"))?;

    let min = row
      .min_date
      .as_deref()
      .and_then(floating_date)
      .ok_or_else(|| eyre!("Date range query returned no minimum date"))?;
    let max = row
      .max_date
      .as_deref()
      .and_then(floating_date)
      .ok_or_else(|| eyre!("Date range query returned no maximum date"))?;

    Ok(DateRange { min, max })
  }

  /// Plain GET returning raw JSON. Errors are surfaced, not softened.
  pub async fn get_json(
    &self,
    url: &str,
    params: &[(&str, String)],
    ctx: &FetchContext,
  ) -> Result<Value> {
    let url = Url::parse(url).map_err(|e| eyre!("Invalid URL {}: {}", url, e))?;
    self
      .send(url.clone(), params, ctx)
      .await
      .map_err(|e| eyre!("GET {} failed: {}", url, e))
  }
}
