//! Serde-deserializable types matching SODA aggregate responses.
//!
//! Row queries deserialize straight into `Record`; only the aggregate
//! shapes need their own types.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};

use super::types::DATE_FORMAT;

/// One row of a `$select=count(*)` response.
///
/// SODA 2.x encodes the count as a string; a plain number is accepted too.
#[derive(Debug, Deserialize)]
pub struct ApiCountRow {
  #[serde(deserialize_with = "deserialize_count")]
  pub count: usize,
}

fn deserialize_count<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Raw {
    Text(String),
    Number(usize),
  }

  match Raw::deserialize(deserializer)? {
    Raw::Number(n) => Ok(n),
    Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
  }
}

/// One row of the min/max date discovery query.
#[derive(Debug, Deserialize)]
pub struct ApiDateRangeRow {
  pub min_date: Option<String>,
  pub max_date: Option<String>,
}

/// Parse the date part of a SODA floating timestamp
/// (`2025-08-25T00:00:00.000`).
pub fn floating_date(timestamp: &str) -> Option<NaiveDate> {
  let date = timestamp.get(..10)?;
  NaiveDate::parse_from_str(date, DATE_FORMAT).ok()
}
