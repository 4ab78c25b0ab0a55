use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// The wall-clock source used to stamp and age entries.
///
/// Entry ages are wall-clock based because entries may be written by one
/// process and read by another through a shared store.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  #[inline]
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// A clock that only moves when told to. Useful for testing freshness logic.
#[derive(Clone)]
pub struct ManualClock {
  now: Arc<Mutex<DateTime<Utc>>>,
}

impl fmt::Debug for ManualClock {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ManualClock").field("now", &*self.now.lock()).finish()
  }
}

impl ManualClock {
  /// Creates a clock frozen at the current system time.
  pub fn new() -> Self {
    Self::starting_at(Utc::now())
  }

  pub fn starting_at(start: DateTime<Utc>) -> Self {
    Self {
      now: Arc::new(Mutex::new(start)),
    }
  }

  /// Moves the clock forward.
  pub fn advance(&self, by: Duration) {
    let mut now = self.now.lock();
    *now = add_duration(*now, by);
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock()
  }
}

/// The clock used when none is configured.
pub fn default_clock() -> Arc<dyn Clock> {
  Arc::new(SystemClock)
}

/// Adds a std `Duration` to a timestamp, saturating at the maximum date.
pub(crate) fn add_duration(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
  chrono::Duration::from_std(by)
    .ok()
    .and_then(|by| at.checked_add_signed(by))
    .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Subtracts a std `Duration` from a timestamp, saturating at the minimum date.
pub(crate) fn sub_duration(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
  chrono::Duration::from_std(by)
    .ok()
    .and_then(|by| at.checked_sub_signed(by))
    .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// The elapsed time from `earlier` to `later`, or zero if `later` comes first.
pub(crate) fn elapsed_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Duration {
  (later - earlier).to_std().unwrap_or(Duration::ZERO)
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn saturating_millis(duration: Duration) -> u64 {
  u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Serializes a `Duration` as whole milliseconds.
pub(crate) mod millis {
  use serde::{Deserialize, Deserializer, Serializer};
  use std::time::Duration;

  pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(super::saturating_millis(*value))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
  }
}

/// Serializes an `Option<Duration>` as whole milliseconds.
pub(crate) mod millis_opt {
  use serde::{Deserialize, Deserializer, Serializer};
  use std::time::Duration;

  pub fn serialize<S: Serializer>(
    value: &Option<Duration>,
    serializer: S,
  ) -> Result<S::Ok, S::Error> {
    match value {
      Some(value) => serializer.serialize_some(&super::saturating_millis(*value)),
      None => serializer.serialize_none(),
    }
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(
    deserializer: D,
  ) -> Result<Option<Duration>, D::Error> {
    Option::<u64>::deserialize(deserializer).map(|it| it.map(Duration::from_millis))
  }
}
