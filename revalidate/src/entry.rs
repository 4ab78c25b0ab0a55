use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::normalize::{result_variant_key, NormalizedVary};
use crate::request::ConsumerDirectives;
use crate::result::{MaxStale, ProducerDirectives, ProducerResult, Validators};
use crate::time::{elapsed_between, sub_duration};

/// How usable a stored entry is for a given request, from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Freshness {
  /// Within the producer's fresh window.
  Fresh,
  /// Stale, but within the tolerance for serving without revalidation.
  StaleAcceptable,
  /// Stale; serve it and revalidate in the background.
  StaleUsable,
  /// Stale; serve it only if a new production fails.
  StaleIfError,
  /// Must not be served.
  StaleUnusable,
}

impl Freshness {
  /// Whether the entry can be returned without waiting on the producer.
  pub fn is_servable(&self) -> bool {
    matches!(
      self,
      Freshness::Fresh | Freshness::StaleAcceptable | Freshness::StaleUsable
    )
  }
}

/// A normalized producer result, as held by a store.
///
/// Entries are immutable once created. The birth time is derived from `date`
/// and `initial_age` and never changes, so age is always `now - birth_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry<C> {
  pub id: String,
  pub vary: NormalizedVary,
  pub content: C,
  #[serde(default)]
  pub validators: Validators,
  pub directives: ProducerDirectives,
  #[serde(default, with = "crate::time::millis")]
  pub initial_age: Duration,
  pub date: DateTime<Utc>,
}

impl<C> Entry<C> {
  /// Builds an entry from a producer result. `id` is used when the result
  /// does not carry one, `produced_at` when it has no `date`.
  pub fn from_result(
    id: String,
    vary: NormalizedVary,
    result: ProducerResult<C>,
    produced_at: DateTime<Utc>,
  ) -> Self {
    Entry {
      id: result.id.unwrap_or(id),
      vary,
      content: result.content,
      validators: result.validators,
      directives: result.directives,
      initial_age: result.initial_age,
      date: result.date.unwrap_or(produced_at),
    }
  }

  pub fn variant_key(&self) -> String {
    result_variant_key(&self.vary)
  }

  pub fn birth_time(&self) -> DateTime<Utc> {
    sub_duration(self.date, self.initial_age)
  }

  pub fn age(&self, now: DateTime<Utc>) -> Duration {
    elapsed_between(self.birth_time(), now)
  }

  pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
    self.age(now) <= self.directives.fresh_until_age
  }

  /// The staleness tolerance agreed by consumer and producer, if any.
  ///
  /// With neither side stating one, stale content is never served. A consumer
  /// that states none accepts whatever the producer allows, minus the
  /// serve-without-revalidating tier.
  pub fn effective_max_stale(&self, consumer: &ConsumerDirectives) -> Option<MaxStale> {
    match (consumer.max_stale, self.directives.max_stale) {
      (None, None) => None,
      (Some(consumer), None) => Some(consumer),
      (None, Some(producer)) => Some(MaxStale::new(
        Duration::ZERO,
        producer.while_revalidating_window(),
        producer.if_error(),
      )),
      (Some(consumer), Some(producer)) => Some(consumer.min(&producer)),
    }
  }

  pub fn classify(&self, consumer: &ConsumerDirectives, now: DateTime<Utc>) -> Freshness {
    let age = self.age(now);
    if consumer.max_age.is_some_and(|max_age| age > max_age) {
      return Freshness::StaleUnusable;
    }

    let fresh_until_age = self.directives.fresh_until_age;
    if age <= fresh_until_age {
      return Freshness::Fresh;
    }

    let Some(max_stale) = self.effective_max_stale(consumer) else {
      return Freshness::StaleUnusable;
    };
    let staleness = age - fresh_until_age;
    if staleness <= max_stale.without_revalidation() {
      Freshness::StaleAcceptable
    } else if staleness <= max_stale.while_revalidating_window() {
      Freshness::StaleUsable
    } else if staleness <= max_stale.if_error() {
      Freshness::StaleIfError
    } else {
      Freshness::StaleUnusable
    }
  }

  /// How much longer the entry could possibly be served to anyone.
  ///
  /// Entries with validators stay useful indefinitely, since a future
  /// producer may revalidate them.
  pub fn potentially_useful_for(&self, now: DateTime<Utc>) -> Option<Duration> {
    let max_stale = self.directives.max_stale?;
    if !self.validators.is_empty() {
      return None;
    }
    let usable_until = self.directives.fresh_until_age + max_stale.if_error();
    Some(usable_until.saturating_sub(self.age(now)))
  }

  /// The retention bound to hand a store when writing the entry at `now`.
  /// `None` means no bound. A zero bound means the entry must not be stored.
  pub fn max_store_for(&self, now: DateTime<Utc>) -> Option<Duration> {
    let store_for = self
      .directives
      .store_for
      .map(|store_for| store_for.saturating_sub(self.age(now)));
    match (store_for, self.potentially_useful_for(now)) {
      (Some(a), Some(b)) => Some(a.min(b)),
      (a, b) => a.or(b),
    }
  }
}
