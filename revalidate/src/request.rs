use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::result::MaxStale;

/// The value of a single request param. Any JSON value except `null`.
pub type ParamValue = Value;

/// Request params, by name.
///
/// A missing key means the param was not supplied. A `null` value is treated
/// the same as a missing key during normalization.
pub type Params = BTreeMap<String, ParamValue>;

/// A consumer's request for a resource.
///
/// `id` is the primary cache key, so everything required to identify the
/// resource belongs there. `params` are optional inputs that may or may not
/// influence the produced result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerRequest {
  pub id: String,
  #[serde(default)]
  pub params: Params,
  #[serde(default)]
  pub directives: ConsumerDirectives,
}

impl ConsumerRequest {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      params: Params::new(),
      directives: ConsumerDirectives::default(),
    }
  }

  /// Adds a param to the request.
  pub fn param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
    self.params.insert(name.into(), value.into());
    self
  }

  /// Sets the consumer's tiered staleness tolerance.
  pub fn max_stale(mut self, max_stale: MaxStale) -> Self {
    self.directives.max_stale = Some(max_stale);
    self
  }

  /// Sets the maximum age of a response the consumer will ever accept.
  pub fn max_age(mut self, max_age: Duration) -> Self {
    self.directives.max_age = Some(max_age);
    self
  }
}

/// The consumer's tolerance for cached responses. All directives are optional.
///
/// - `max_age`: a response older than this is never used, not even when the
///   producer fails.
/// - `max_stale`: how stale a response may be, per circumstance. See
///   [`MaxStale`]. When absent, a default is synthesized from the producer's
///   own `max_stale`, so that by default only fresh responses are served
///   unless the producer opted into staleness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerDirectives {
  #[serde(default, with = "crate::time::millis_opt", skip_serializing_if = "Option::is_none")]
  pub max_age: Option<Duration>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_stale: Option<MaxStale>,
}
