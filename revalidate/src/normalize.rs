//! Canonical keys for requests and variants.
//!
//! Every key produced here is a JSON string built from `BTreeMap`-ordered
//! data, so equal inputs produce equal keys regardless of insertion order.
//! Nested JSON objects inside param values are ordered too, as `serde_json`
//! keeps object keys sorted.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::request::Params;

pub type NameNormalizerFn = Arc<dyn Fn(&str) -> String + Send + Sync>;
pub type ValueNormalizerFn = Arc<dyn Fn(&str, &Value) -> Value + Send + Sync>;

/// Optional hooks that canonicalize param names and values before keying,
/// e.g. lowercasing names or trimming string values.
///
/// The value hook receives the already-normalized name.
#[derive(Clone, Default)]
pub struct ParamNormalizer {
  name: Option<NameNormalizerFn>,
  value: Option<ValueNormalizerFn>,
}

impl fmt::Debug for ParamNormalizer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ParamNormalizer")
      .field("name", &self.name.is_some())
      .field("value", &self.value.is_some())
      .finish()
  }
}

impl ParamNormalizer {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_name_fn<F>(mut self, f: F) -> Self
  where
    F: Fn(&str) -> String + Send + Sync + 'static,
  {
    self.name = Some(Arc::new(f));
    self
  }

  pub fn with_value_fn<F>(mut self, f: F) -> Self
  where
    F: Fn(&str, &Value) -> Value + Send + Sync + 'static,
  {
    self.value = Some(Arc::new(f));
    self
  }

  pub fn normalize_name(&self, name: &str) -> String {
    match &self.name {
      Some(f) => f(name),
      None => name.to_owned(),
    }
  }

  /// Normalizes every name and value. `null` values, before or after the
  /// value hook, are dropped as if the param was never supplied.
  pub fn normalize(&self, params: &Params) -> NormalizedParams {
    let mut out = BTreeMap::new();
    for (name, value) in params {
      if value.is_null() {
        continue;
      }
      let name = self.normalize_name(name);
      let value = match &self.value {
        Some(f) => f(&name, value),
        None => value.clone(),
      };
      if !value.is_null() {
        out.insert(name, value);
      }
    }
    NormalizedParams(out)
  }

  /// Normalizes a producer's vary list into a sorted, deduplicated set.
  pub fn normalize_vary<S: AsRef<str>>(&self, names: &[S]) -> VaryKeys {
    VaryKeys::new(names.iter().map(|it| self.normalize_name(it.as_ref())))
  }
}

/// Request params after normalization. Never contains `null` values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedParams(BTreeMap<String, Value>);

impl NormalizedParams {
  /// Normalizes with no name or value hooks.
  pub fn from_params(params: &Params) -> Self {
    ParamNormalizer::default().normalize(params)
  }

  pub fn get(&self, name: &str) -> Option<&Value> {
    self.0.get(name)
  }

  pub fn contains(&self, name: &str) -> bool {
    self.0.contains_key(name)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
    self.0.iter()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

/// A sorted, deduplicated set of vary param names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VaryKeys(Vec<String>);

impl VaryKeys {
  pub fn new<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
    names.sort();
    names.dedup();
    VaryKeys(names)
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.0.iter().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

/// The vary requirements recorded on an entry: each vary name paired with the
/// value it had in the producing request, `None` when the request lacked it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedVary(BTreeMap<String, Option<Value>>);

impl NormalizedVary {
  /// Projects `params` onto the vary names `keys`.
  pub fn project(keys: &VaryKeys, params: &NormalizedParams) -> Self {
    NormalizedVary(
      keys
        .iter()
        .map(|name| (name.to_owned(), params.get(name).cloned()))
        .collect(),
    )
  }

  pub fn keys(&self) -> VaryKeys {
    VaryKeys(self.0.keys().cloned().collect())
  }

  pub fn get(&self, name: &str) -> Option<Option<&Value>> {
    self.0.get(name).map(Option::as_ref)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Names whose value was missing from the producing request.
  pub fn missing(&self) -> impl Iterator<Item = &str> {
    self
      .0
      .iter()
      .filter(|(_, value)| value.is_none())
      .map(|(name, _)| name.as_str())
  }
}

/// Flattens `(name, value)` pairs into `[name, value, name, value, ...]`,
/// with `null` standing in for a missing value.
fn flatten<'a, I>(pairs: I) -> Value
where
  I: IntoIterator<Item = (&'a String, Option<&'a Value>)>,
{
  let mut flat = Vec::new();
  for (name, value) in pairs {
    flat.push(Value::String(name.clone()));
    flat.push(value.cloned().unwrap_or(Value::Null));
  }
  Value::Array(flat)
}

/// The deterministic key of a result variant. Two entries under one id with
/// the same variant key replace each other.
pub fn result_variant_key(vary: &NormalizedVary) -> String {
  flatten(vary.0.iter().map(|(name, value)| (name, value.as_ref()))).to_string()
}

/// The variant key a request would look up, given a candidate vary-key set.
///
/// Equals `result_variant_key` of any entry with those vary keys that the
/// request matches, so a store can index variants by this string.
pub fn request_variant_key_for_vary_keys(keys: &VaryKeys, params: &NormalizedParams) -> String {
  result_variant_key(&NormalizedVary::project(keys, params))
}

/// True iff the request agrees with the entry on every vary name. A name
/// missing on both sides counts as equal.
pub fn variant_matches_request(vary: &NormalizedVary, params: &NormalizedParams) -> bool {
  vary
    .0
    .iter()
    .all(|(name, expected)| expected.as_ref() == params.get(name))
}

/// The key under which producer calls for a request with no stored variant
/// are coalesced.
pub fn request_key(id: &str, params: &NormalizedParams) -> String {
  Value::Array(vec![
    Value::String(id.to_owned()),
    flatten(params.0.iter().map(|(name, value)| (name, Some(value)))),
  ])
  .to_string()
}

/// The key under which producer calls targeting one stored variant are
/// coalesced, whether blocking or in the background.
pub fn variant_task_key(id: &str, vary: &NormalizedVary) -> String {
  Value::Array(vec![
    Value::String(id.to_owned()),
    flatten(vary.0.iter().map(|(name, value)| (name, value.as_ref()))),
  ])
  .to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn params(value: Value) -> Params {
    serde_json::from_value(value).unwrap()
  }

  #[test]
  fn variant_key_ignores_insertion_order() {
    let a = NormalizedParams::from_params(&params(json!({ "b": 2, "a": 1, "c": 3 })));
    let b = NormalizedParams::from_params(&params(json!({ "c": 3, "a": 1, "b": 2 })));
    let keys = VaryKeys::new(["b", "a"]);

    assert_eq!(
      request_variant_key_for_vary_keys(&keys, &a),
      request_variant_key_for_vary_keys(&keys, &b)
    );
    assert_eq!(request_variant_key_for_vary_keys(&keys, &a), r#"["a",1,"b",2]"#);
  }

  #[test]
  fn missing_vary_param_is_recorded_as_null() {
    let p = NormalizedParams::from_params(&params(json!({ "locale": "en" })));
    let vary = NormalizedVary::project(&VaryKeys::new(["locale", "region"]), &p);

    assert_eq!(result_variant_key(&vary), r#"["locale","en","region",null]"#);
    assert_eq!(vary.missing().collect::<Vec<_>>(), vec!["region"]);
  }

  #[test]
  fn null_params_are_treated_as_absent() {
    let with_null = NormalizedParams::from_params(&params(json!({ "locale": null, "x": 1 })));
    let without = NormalizedParams::from_params(&params(json!({ "x": 1 })));
    assert_eq!(with_null, without);
    assert_eq!(request_key("id", &with_null), request_key("id", &without));
  }

  #[test]
  fn matching_compares_only_vary_names() {
    let producing = NormalizedParams::from_params(&params(json!({ "locale": "en", "debug": true })));
    let vary = NormalizedVary::project(&VaryKeys::new(["locale"]), &producing);

    let same_locale = NormalizedParams::from_params(&params(json!({ "locale": "en", "debug": false })));
    let other_locale = NormalizedParams::from_params(&params(json!({ "locale": "fr" })));
    let no_locale = NormalizedParams::from_params(&params(json!({})));

    assert!(variant_matches_request(&vary, &same_locale));
    assert!(!variant_matches_request(&vary, &other_locale));
    assert!(!variant_matches_request(&vary, &no_locale));
  }

  #[test]
  fn missing_on_both_sides_matches() {
    let producing = NormalizedParams::from_params(&params(json!({})));
    let vary = NormalizedVary::project(&VaryKeys::new(["locale"]), &producing);

    assert!(variant_matches_request(&vary, &producing));
    assert!(!variant_matches_request(
      &vary,
      &NormalizedParams::from_params(&params(json!({ "locale": "en" })))
    ));
  }

  #[test]
  fn deep_equal_values_match() {
    let producing =
      NormalizedParams::from_params(&params(json!({ "filter": { "b": [1, 2], "a": "x" } })));
    let vary = NormalizedVary::project(&VaryKeys::new(["filter"]), &producing);
    let request =
      NormalizedParams::from_params(&params(json!({ "filter": { "a": "x", "b": [1, 2] } })));

    assert!(variant_matches_request(&vary, &request));
  }

  #[test]
  fn normalizer_hooks_apply_to_names_and_values() {
    let normalizer = ParamNormalizer::new()
      .with_name_fn(|name| name.to_ascii_lowercase())
      .with_value_fn(|name, value| match (name, value) {
        ("locale", Value::String(s)) => Value::String(s.to_ascii_lowercase()),
        (_, other) => other.clone(),
      });

    let normalized = normalizer.normalize(&params(json!({ "Locale": "EN", "Page": 2 })));
    assert_eq!(normalized.get("locale"), Some(&json!("en")));
    assert_eq!(normalized.get("page"), Some(&json!(2)));

    let vary = normalizer.normalize_vary(&["Locale", "locale"]);
    assert_eq!(vary, VaryKeys::new(["locale"]));
  }

  #[test]
  fn request_key_separates_ids_and_params() {
    let p = NormalizedParams::from_params(&params(json!({ "locale": "en" })));
    let q = NormalizedParams::from_params(&params(json!({ "locale": "fr" })));
    assert_ne!(request_key("user:1", &p), request_key("user:2", &p));
    assert_ne!(request_key("user:1", &p), request_key("user:1", &q));
  }
}
