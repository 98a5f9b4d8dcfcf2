//! Request identity and cache key derivation.

use reqwest::Method;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use url::{form_urlencoded, Url};

use super::traits::QueryKey;

/// Fixed-length digest identifying one cached request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Everything that distinguishes one outbound request from another.
///
/// Parameters live in a sorted map, so insertion order never affects the
/// key. A query string embedded in the endpoint is folded into the same map,
/// and so are the top-level fields of a request body. Values are held as
/// JSON so a body field `1` and a param `"1"` stay distinct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
  method: Method,
  endpoint: String,
  params: BTreeMap<String, Value>,
  /// A body that isn't an object, keyed whole
  raw_body: Option<Value>,
}

impl RequestIdentity {
  pub fn new(method: Method, endpoint: &str) -> Self {
    let mut identity = Self {
      method,
      endpoint: endpoint.to_string(),
      params: BTreeMap::new(),
      raw_body: None,
    };

    if let Ok(mut url) = Url::parse(endpoint) {
      let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
      url.set_query(None);
      url.set_fragment(None);
      identity.endpoint = url.to_string();
      identity
        .params
        .extend(pairs.into_iter().map(|(k, v)| (k, Value::String(v))));
    }

    identity
  }

  pub fn get(endpoint: &str) -> Self {
    Self::new(Method::GET, endpoint)
  }

  #[allow(dead_code)]
  pub fn post(endpoint: &str, body: &Value) -> Self {
    Self::new(Method::POST, endpoint).body(body)
  }

  /// Add one identifying parameter, replacing any previous value.
  pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
    self
      .params
      .insert(name.into(), Value::String(value.to_string()));
    self
  }

  /// Add several identifying parameters.
  pub fn params<I, K, V>(mut self, params: I) -> Self
  where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: ToString,
  {
    for (name, value) in params {
      self
        .params
        .insert(name.into(), Value::String(value.to_string()));
    }
    self
  }

  /// Merge a request body into the parameter set.
  ///
  /// Object fields become parameters (overriding URL params of the same
  /// name). Any other JSON value is keyed as a whole.
  #[allow(dead_code)]
  pub fn body(mut self, body: &Value) -> Self {
    match body {
      Value::Object(fields) => {
        self
          .params
          .extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
      }
      Value::Null => {}
      other => self.raw_body = Some(other.clone()),
    }
    self
  }

  /// Canonical text the key is hashed from. Names and JSON-encoded values
  /// are form-encoded, so no value can forge a separator.
  fn canonical(&self) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    for (name, value) in &self.params {
      query.append_pair(name, &value.to_string());
    }

    let mut text = format!("{} {}?{}", self.method, self.endpoint, query.finish());
    if let Some(body) = &self.raw_body {
      text.push(' ');
      text.push_str(&body.to_string());
    }
    text
  }
}

impl QueryKey for RequestIdentity {
  fn cache_key(&self) -> CacheKey {
    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(self.canonical().as_bytes());
    CacheKey(hex::encode(hasher.finalize()))
  }

  fn description(&self) -> String {
    self.canonical()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  const URL: &str = "https://data.lacity.org/resource/y8y3-fqfu.json";

  #[test]
  fn test_param_order_does_not_matter() {
    let a = RequestIdentity::get(URL).param("a", 1).param("b", 2);
    let b = RequestIdentity::get(URL).param("b", 2).param("a", 1);
    assert_eq!(a.cache_key(), b.cache_key());
  }

  #[test]
  fn test_query_string_is_normalized() {
    let a = RequestIdentity::get(&format!("{}?a=1&b=2", URL));
    let b = RequestIdentity::get(&format!("{}?b=2&a=1", URL));
    let c = RequestIdentity::get(URL).param("a", 1).param("b", 2);
    assert_eq!(a.cache_key(), b.cache_key());
    assert_eq!(a.cache_key(), c.cache_key());
  }

  #[test]
  fn test_different_params_differ() {
    let a = RequestIdentity::get(URL).param("start", "2025-07-26");
    let b = RequestIdentity::get(URL).param("start", "2025-07-27");
    assert_ne!(a.cache_key(), b.cache_key());
  }

  #[test]
  fn test_separators_in_values_do_not_collide() {
    let packed = RequestIdentity::get(URL).param("a", "1&b=2");
    let split = RequestIdentity::get(URL).param("a", "1").param("b", "2");
    assert_ne!(packed.cache_key(), split.cache_key());

    let eq_in_name = RequestIdentity::get(URL).param("a=1", "");
    let eq_in_value = RequestIdentity::get(URL).param("a", "1=");
    assert_ne!(eq_in_name.cache_key(), eq_in_value.cache_key());
  }

  #[test]
  fn test_query_string_escapes_match_params() {
    let from_url = RequestIdentity::get(&format!("{}?a=1%26b%3D2", URL));
    let from_param = RequestIdentity::get(URL).param("a", "1&b=2");
    assert_eq!(from_url.cache_key(), from_param.cache_key());
  }

  #[test]
  fn test_body_keeps_json_types() {
    let number = RequestIdentity::post(URL, &json!({"limit": 1}));
    let string = RequestIdentity::post(URL, &json!({"limit": "1"}));
    assert_ne!(number.cache_key(), string.cache_key());

    let nested = RequestIdentity::post(URL, &json!({"where": {"a": 1}}));
    let flat = RequestIdentity::post(URL, &json!({"where": "{\"a\":1}"}));
    assert_ne!(nested.cache_key(), flat.cache_key());
  }

  #[test]
  fn test_raw_body_differs_from_body_param() {
    let raw = RequestIdentity::post(URL, &json!([1, 2]));
    let param = RequestIdentity::new(Method::POST, URL).param("body", "[1,2]");
    assert_ne!(raw.cache_key(), param.cache_key());
  }

  #[test]
  fn test_body_fields_distinguish_keys() {
    let a = RequestIdentity::post(URL, &json!({"start": "2025-07-26", "end": "2025-08-25"}));
    let b = RequestIdentity::post(URL, &json!({"start": "2025-07-26", "end": "2025-08-26"}));
    let c = RequestIdentity::post(URL, &json!({"end": "2025-08-25", "start": "2025-07-26"}));
    assert_ne!(a.cache_key(), b.cache_key());
    assert_eq!(a.cache_key(), c.cache_key());
  }

  #[test]
  fn test_method_is_part_of_key() {
    let get = RequestIdentity::get(URL).param("start", "2025-07-26");
    let post = RequestIdentity::post(URL, &json!({"start": "2025-07-26"}));
    assert_ne!(get.cache_key(), post.cache_key());
  }

  #[test]
  fn test_key_is_hex_digest() {
    let key = RequestIdentity::get(URL).cache_key();
    assert_eq!(key.as_str().len(), 64);
    assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
  }
}
