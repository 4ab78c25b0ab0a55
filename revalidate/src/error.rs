use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// A type-erased error, as returned by producers and store backends.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A shareable, type-erased error. Settled results are observed by every
/// caller joined on a coalesced task, so the payload must be cheap to clone.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// The main error type for `fibre_revalidate` operations.
#[derive(Debug, Clone, Error)]
pub enum Error {
  /// The producer failed while computing a result.
  #[error("producer failed: {0}")]
  Producer(#[source] SharedError),

  /// The backing store failed to read or write entries.
  #[error("store operation failed: {0}")]
  Store(#[source] SharedError),

  /// A coalesced task did not settle before its watchdog fired.
  #[error("task '{key}' did not settle within {after:?}")]
  Timeout { key: String, after: Duration },

  /// The `TimerSet` no longer accepts timers.
  #[error("timer set is closed")]
  Closed,

  /// The producer declared `vary` on params the request never supplied.
  #[error("producer for '{id}' varies on params missing from the request: {params:?}")]
  UndeclaredVary { id: String, params: Vec<String> },

  /// A coalesced task was cancelled or panicked before producing a result.
  #[error("task '{key}' was aborted before settling")]
  TaskAborted { key: String },
}

impl Error {
  /// Wraps a producer failure. An `Error` is passed through unchanged.
  pub fn producer<E>(error: E) -> Self
  where
    E: Into<BoxError>,
  {
    match error.into().downcast::<Error>() {
      Ok(error) => *error,
      Err(other) => Error::Producer(Arc::from(other)),
    }
  }

  /// Wraps a store failure.
  pub fn store<E>(error: E) -> Self
  where
    E: Into<BoxError>,
  {
    Error::Store(Arc::from(error.into()))
  }

  /// Returns the producer's original error, if this error came from a producer.
  pub fn producer_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
    match self {
      Error::Producer(source) => Some(source.as_ref()),
      _ => None,
    }
  }

  pub fn is_timeout(&self) -> bool {
    matches!(self, Error::Timeout { .. })
  }
}

/// A specialized `Result` type for `fibre_revalidate` operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur when building a `Cache`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// No store was configured.
  #[error("a cache requires a store")]
  MissingStore,
  /// No producer was configured.
  #[error("a cache requires a producer")]
  MissingProducer,
  /// A watchdog was configured with a zero timeout, which would fail every task.
  #[error("watchdog timeout cannot be zero")]
  ZeroWatchdogTimeout,
}

/// Errors that can occur when loading a `CacheConfig`.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read configuration file: {0}")]
  Read(#[from] std::io::Error),

  #[error("failed to parse configuration: {0}")]
  Parse(#[from] serde_yaml::Error),

  #[error("invalid configuration value for '{field}': {message}")]
  InvalidValue { field: String, message: String },
}
