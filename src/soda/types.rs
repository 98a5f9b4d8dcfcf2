use chrono::NaiveDate;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::cache::Cacheable;

/// Calendar date format used at every boundary
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// One reported incident, passed through exactly as upstream sent it.
///
/// Every column, explicit nulls included, is kept in `columns`; the
/// accessors below read the few the CLI summarizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
  pub columns: Map<String, Value>,
}

/// Boolean-valued incident flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
  DomesticViolence,
  GangRelated,
  HateCrime,
  TransitRelated,
  Homelessness,
  VictimShot,
}

impl Flag {
  pub const ALL: [Flag; 6] = [
    Flag::DomesticViolence,
    Flag::GangRelated,
    Flag::HateCrime,
    Flag::TransitRelated,
    Flag::Homelessness,
    Flag::VictimShot,
  ];

  pub fn column(self) -> &'static str {
    match self {
      Flag::DomesticViolence => "domestic_violence_crime",
      Flag::GangRelated => "gang_related_crime",
      Flag::HateCrime => "hate_crime",
      Flag::TransitRelated => "transit_related_crime",
      Flag::Homelessness => "homeless_related_crime",
      Flag::VictimShot => "victim_shot",
    }
  }
}

impl Record {
  /// A text column, or `None` if it is missing, null or not a string.
  pub fn text(&self, column: &str) -> Option<&str> {
    self.columns.get(column).and_then(Value::as_str)
  }

  /// Reporting district (`rpt_dist_no`).
  pub fn district(&self) -> Option<&str> {
    self.text("rpt_dist_no")
  }

  /// Read a flag column. Upstream encodes these inconsistently
  /// ("Y", "true", "1", or a JSON bool); anything else is false.
  pub fn flag(&self, flag: Flag) -> bool {
    match self.columns.get(flag.column()) {
      Some(Value::Bool(b)) => *b,
      Some(Value::String(s)) => matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "y" | "yes" | "true" | "1"
      ),
      Some(Value::Number(n)) => n.as_i64() == Some(1),
      _ => false,
    }
  }
}

/// Inclusive calendar-date interval bounding a retrieval.
///
/// Not validated: an inverted window is legal and matches nothing upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryWindow {
  pub start: NaiveDate,
  pub end: NaiveDate,
}

impl QueryWindow {
  /// Parse `YYYY-MM-DD` bounds.
  pub fn parse(start: &str, end: &str) -> Result<Self> {
    Ok(Self {
      start: parse_date(start)?,
      end: parse_date(end)?,
    })
  }
}

impl fmt::Display for QueryWindow {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}..={}",
      self.start.format(DATE_FORMAT),
      self.end.format(DATE_FORMAT)
    )
  }
}

pub fn parse_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
    .map_err(|e| eyre!("Invalid date '{}', expected YYYY-MM-DD: {}", s, e))
}

/// How `resolve` goes about fetching a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FetchMode {
  /// Single shot, falling back to pagination on truncation
  #[default]
  Auto,
  /// One request at the row ceiling
  SingleShot,
  /// Count, then an offset sweep
  Paginated,
}

impl FetchMode {
  pub fn as_str(self) -> &'static str {
    match self {
      FetchMode::Auto => "auto",
      FetchMode::SingleShot => "single-shot",
      FetchMode::Paginated => "paginated",
    }
  }
}

impl fmt::Display for FetchMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Which strategy actually produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
  SingleShot,
  Paginated,
  /// Single shot hit the ceiling, so the window was re-fetched page by page
  PaginatedAfterTruncation,
}

/// Why a retrieval came back with fewer rows than upstream may hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SoftFailure {
  /// The count query failed and was read as zero
  CountFailed { reason: String },
  /// The single-shot request failed and was read as empty
  SingleShotFailed { reason: String },
  /// A page failed; everything before `offset` was kept
  PageFailed { offset: usize, reason: String },
}

impl fmt::Display for SoftFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SoftFailure::CountFailed { reason } => write!(f, "count query failed: {}", reason),
      SoftFailure::SingleShotFailed { reason } => write!(f, "single-shot query failed: {}", reason),
      SoftFailure::PageFailed { offset, reason } => {
        write!(f, "page at offset {} failed: {}", offset, reason)
      }
    }
  }
}

/// Data plus an optional note that part of it is missing.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
  pub data: T,
  pub soft_failure: Option<SoftFailure>,
}

impl<T> Fetched<T> {
  pub fn complete(data: T) -> Self {
    Self {
      data,
      soft_failure: None,
    }
  }

  pub fn degraded(data: T, failure: SoftFailure) -> Self {
    Self {
      data,
      soft_failure: Some(failure),
    }
  }

  #[allow(dead_code)]
  pub fn is_complete(&self) -> bool {
    self.soft_failure.is_none()
  }
}

/// What the boundary gets back from `retrieve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retrieval {
  pub count: usize,
  pub strategy: Strategy,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub soft_failure: Option<SoftFailure>,
  pub records: Vec<Record>,
}

impl Retrieval {
  pub fn new(records: Fetched<Vec<Record>>, strategy: Strategy) -> Self {
    Self {
      count: records.data.len(),
      strategy,
      soft_failure: records.soft_failure,
      records: records.data,
    }
  }
}

impl Cacheable for Retrieval {
  fn is_complete(&self) -> bool {
    self.soft_failure.is_none()
  }
}

/// Earliest and latest occurrence dates available upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
  pub min: NaiveDate,
  pub max: NaiveDate,
}

impl Cacheable for DateRange {}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_record_keeps_unknown_columns() {
    let row = json!({
      "uniquenibrno": "250704512-1",
      "rpt_dist_no": "645",
      "date_occ": "2025-08-25T00:00:00.000",
      "premis_desc": "STREET",
      "area_name": "Hollywood",
      "victim_shot": "N"
    });

    let record: Record = serde_json::from_value(row.clone()).unwrap();
    assert_eq!(record.district(), Some("645"));
    assert_eq!(record.text("area_name"), Some("Hollywood"));
    assert_eq!(serde_json::to_value(&record).unwrap(), row);
  }

  #[test]
  fn test_record_keeps_explicit_nulls() {
    let row = json!({
      "uniquenibrno": "250704512-1",
      "rpt_dist_no": "645",
      "premis_desc": null,
      "status_desc": null
    });

    let record: Record = serde_json::from_value(row.clone()).unwrap();
    assert_eq!(record.text("premis_desc"), None);
    assert_eq!(serde_json::to_value(&record).unwrap(), row);

    // And through a cache round trip
    let stored = serde_json::to_value(Retrieval::new(
      Fetched::complete(vec![record]),
      Strategy::SingleShot,
    ))
    .unwrap();
    let restored: Retrieval = serde_json::from_value(stored).unwrap();
    assert_eq!(serde_json::to_value(&restored.records[0]).unwrap(), row);
  }

  #[test]
  fn test_missing_columns_stay_missing() {
    let row = json!({"uniquenibrno": "250704512-1"});
    let record: Record = serde_json::from_value(row.clone()).unwrap();
    assert_eq!(record.district(), None);
    assert_eq!(serde_json::to_value(&record).unwrap(), row);
  }

  #[test]
  fn test_flags() {
    let record: Record = serde_json::from_value(json!({
      "domestic_violence_crime": "Y",
      "gang_related_crime": "N",
      "hate_crime": true,
      "victim_shot": "1"
    }))
    .unwrap();

    assert!(record.flag(Flag::DomesticViolence));
    assert!(!record.flag(Flag::GangRelated));
    assert!(record.flag(Flag::HateCrime));
    assert!(record.flag(Flag::VictimShot));
    assert!(!record.flag(Flag::TransitRelated));
  }

  #[test]
  fn test_window_parse() {
    let window = QueryWindow::parse("2025-07-26", "2025-08-25").unwrap();
    assert_eq!(window.to_string(), "2025-07-26..=2025-08-25");

    assert!(QueryWindow::parse("2025-07-26", "08/25/2025").is_err());
    assert!(QueryWindow::parse("2025-07-26T10:00:00", "2025-08-25").is_err());
  }

  #[test]
  fn test_inverted_window_is_accepted() {
    let window = QueryWindow::parse("2025-08-25", "2025-07-26").unwrap();
    assert!(window.start > window.end);
  }

  #[test]
  fn test_fetch_mode_wire_names() {
    assert_eq!(serde_json::to_value(FetchMode::SingleShot).unwrap(), json!("single-shot"));
    assert_eq!(FetchMode::default(), FetchMode::Auto);
    assert_eq!(FetchMode::Paginated.to_string(), "paginated");
  }

  #[test]
  fn test_degraded_retrieval_is_not_cacheable() {
    let partial = Retrieval::new(
      Fetched::degraded(
        Vec::new(),
        SoftFailure::CountFailed {
          reason: "HTTP 503".to_string(),
        },
      ),
      Strategy::Paginated,
    );
    assert!(!partial.is_complete());

    let full = Retrieval::new(Fetched::complete(Vec::new()), Strategy::SingleShot);
    assert!(full.is_complete());
  }
}
