use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::time::saturating_millis;

/// Validators describe the state of the source data at production time, like
/// an ETag/Last-Modified pair. They are opaque to the cache.
pub type Validators = BTreeMap<String, Value>;

/// A tiered staleness tolerance: `[without_revalidation, while_revalidating, if_error]`.
///
/// - `without_revalidation`: stale by at most this much, a response is served
///   as-is.
/// - `while_revalidating`: stale by at most this much, a response is served
///   while a background revalidation refreshes the store.
/// - `if_error`: stale by at most this much, a response is served only when
///   the producer fails to provide a new one.
///
/// The tiers are always non-decreasing. A tier smaller than the one before it
/// is raised to match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MaxStale([Duration; 3]);

impl MaxStale {
  /// No staleness tolerated at all.
  pub const NONE: MaxStale = MaxStale([Duration::ZERO; 3]);

  pub fn new(without_revalidation: Duration, while_revalidating: Duration, if_error: Duration) -> Self {
    Self::normalized([without_revalidation, while_revalidating, if_error])
  }

  /// Serve stale responses for `window` while revalidating, and for the same
  /// window if revalidation fails.
  pub fn while_revalidating(window: Duration) -> Self {
    Self::new(Duration::ZERO, window, window)
  }

  /// Serve stale responses for `while_revalidating` while revalidating, and up
  /// to `if_error` when the producer fails.
  pub fn revalidate_or_error(while_revalidating: Duration, if_error: Duration) -> Self {
    Self::new(Duration::ZERO, while_revalidating, if_error)
  }

  fn normalized(tiers: [Duration; 3]) -> Self {
    let mut out = tiers;
    for i in 1..out.len() {
      out[i] = out[i].max(out[i - 1]);
    }
    MaxStale(out)
  }

  #[inline]
  pub fn without_revalidation(&self) -> Duration {
    self.0[0]
  }

  #[inline]
  pub fn while_revalidating_window(&self) -> Duration {
    self.0[1]
  }

  #[inline]
  pub fn if_error(&self) -> Duration {
    self.0[2]
  }

  pub fn tiers(&self) -> [Duration; 3] {
    self.0
  }

  /// The element-wise minimum of two tolerances.
  pub(crate) fn min(&self, other: &MaxStale) -> MaxStale {
    MaxStale([
      self.0[0].min(other.0[0]),
      self.0[1].min(other.0[1]),
      self.0[2].min(other.0[2]),
    ])
  }
}

// On the wire, a `MaxStale` is an array of three millisecond counts.
impl Serialize for MaxStale {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let millis = self.0.map(saturating_millis);
    millis.serialize(serializer)
  }
}

impl<'de> Deserialize<'de> for MaxStale {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let millis = <[u64; 3]>::deserialize(deserializer)?;
    Ok(MaxStale::normalized(millis.map(Duration::from_millis)))
  }
}

/// The producer's freshness policy for a result.
///
/// - `fresh_until_age`: for how long after birth the result is fresh.
/// - `max_stale`: the producer's own staleness tolerance. When absent, the
///   consumer's tolerance is used.
/// - `store_for`: how long after birth the result may be kept in a store at
///   all. `None` places no bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerDirectives {
  #[serde(with = "crate::time::millis")]
  pub fresh_until_age: Duration,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub max_stale: Option<MaxStale>,
  #[serde(default, with = "crate::time::millis_opt", skip_serializing_if = "Option::is_none")]
  pub store_for: Option<Duration>,
}

impl ProducerDirectives {
  pub fn fresh_for(fresh_until_age: Duration) -> Self {
    Self {
      fresh_until_age,
      max_stale: None,
      store_for: None,
    }
  }
}

/// A producer's answer to a request.
///
/// Only `content` and `directives` are required; [`wrap_producer`] fills in
/// the rest. `vary` lists the names of the request params this result was
/// computed from, and decides which later requests may reuse it.
///
/// [`wrap_producer`]: crate::producer::wrap_producer
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerResult<C> {
  pub id: Option<String>,
  pub content: C,
  pub validators: Validators,
  pub vary: Vec<String>,
  pub directives: ProducerDirectives,
  /// Age of the content when handed over, e.g. because the producer is
  /// itself a cache.
  pub initial_age: Duration,
  /// When the result was created. Defaults to the moment it reached the cache.
  pub date: Option<DateTime<Utc>>,
  /// Other resources produced along the way, stored under their own ids
  /// next to this one. Each must carry an `id`.
  pub supplemental: Vec<ProducerResult<C>>,
}

impl<C> ProducerResult<C> {
  pub fn new(content: C, fresh_until_age: Duration) -> Self {
    Self {
      id: None,
      content,
      validators: Validators::new(),
      vary: Vec::new(),
      directives: ProducerDirectives::fresh_for(fresh_until_age),
      initial_age: Duration::ZERO,
      date: None,
      supplemental: Vec::new(),
    }
  }

  pub fn id(mut self, id: impl Into<String>) -> Self {
    self.id = Some(id.into());
    self
  }

  /// Declares that the result depends on the given request params.
  pub fn vary_on<I, S>(mut self, names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.vary.extend(names.into_iter().map(Into::into));
    self
  }

  pub fn validator(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.validators.insert(name.into(), value.into());
    self
  }

  pub fn max_stale(mut self, max_stale: MaxStale) -> Self {
    self.directives.max_stale = Some(max_stale);
    self
  }

  pub fn store_for(mut self, store_for: Duration) -> Self {
    self.directives.store_for = Some(store_for);
    self
  }

  pub fn initial_age(mut self, initial_age: Duration) -> Self {
    self.initial_age = initial_age;
    self
  }

  pub fn date(mut self, date: DateTime<Utc>) -> Self {
    self.date = Some(date);
    self
  }

  /// Adds a resource to store under `id` alongside this result, e.g. an item
  /// fetched as part of a list. Its own supplemental resources are ignored.
  pub fn supplemental(mut self, id: impl Into<String>, resource: ProducerResult<C>) -> Self {
    self.supplemental.push(resource.id(id));
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const MS: Duration = Duration::from_millis(1);

  #[test]
  fn unbounded_tiers_serialize_saturated() {
    let max_stale = MaxStale::new(MS * 5, Duration::MAX, Duration::MAX);
    let json = serde_json::to_value(max_stale).unwrap();
    assert_eq!(json, serde_json::json!([5, u64::MAX, u64::MAX]));

    let directives = ProducerDirectives {
      store_for: Some(Duration::MAX),
      ..ProducerDirectives::fresh_for(Duration::MAX)
    };
    let json = serde_json::to_value(directives).unwrap();
    assert_eq!(json["fresh_until_age"], serde_json::json!(u64::MAX));
    assert_eq!(json["store_for"], serde_json::json!(u64::MAX));
  }

  #[test]
  fn supplemental_resources_take_their_own_id() {
    let result = ProducerResult::new("list", MS * 10)
      .supplemental("item:1", ProducerResult::new("one", MS * 20))
      .supplemental("item:2", ProducerResult::new("two", MS * 20).id("ignored"));
    let ids: Vec<_> = result.supplemental.iter().map(|it| it.id.as_deref()).collect();
    assert_eq!(ids, vec![Some("item:1"), Some("item:2")]);
    assert_eq!(result.id, None);
  }

  #[test]
  fn max_stale_tiers_are_raised_to_be_non_decreasing() {
    let max_stale = MaxStale::new(MS * 10, MS * 5, MS * 20);
    assert_eq!(max_stale.tiers(), [MS * 10, MS * 10, MS * 20]);

    let max_stale = MaxStale::new(MS * 30, MS * 5, MS * 1);
    assert_eq!(max_stale.tiers(), [MS * 30; 3]);
  }

  #[test]
  fn max_stale_wire_format_is_milliseconds() {
    let max_stale = MaxStale::revalidate_or_error(MS * 1500, MS * 60_000);
    let json = serde_json::to_string(&max_stale).unwrap();
    assert_eq!(json, "[0,1500,60000]");

    let parsed: MaxStale = serde_json::from_str("[100,50,200]").unwrap();
    assert_eq!(parsed.tiers(), [MS * 100, MS * 100, MS * 200]);
  }

  #[test]
  fn producer_directives_round_trip_through_json() {
    let directives = ProducerDirectives {
      fresh_until_age: MS * 1000,
      max_stale: Some(MaxStale::while_revalidating(MS * 500)),
      store_for: None,
    };
    let json = serde_json::to_value(directives).unwrap();
    assert_eq!(json, serde_json::json!({ "fresh_until_age": 1000, "max_stale": [0, 500, 500] }));
    let back: ProducerDirectives = serde_json::from_value(json).unwrap();
    assert_eq!(back, directives);
  }
}
