use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::cache::{Cache, CacheInner};
use crate::config::{CacheConfig, DEFAULT_SHUTDOWN_TIMEOUT};
use crate::error::BuildError;
use crate::logger::{default_logger, Component, ComponentLogger, Logger};
use crate::metrics::Metrics;
use crate::normalize::ParamNormalizer;
use crate::producer::RequestPairedProducer;
use crate::store::Store;
use crate::task::{CollapsedTaskCreator, TimerSet, DEFAULT_COLLAPSE_WINDOW};
use crate::time::{default_clock, Clock};

/// A builder for creating [`Cache`] instances.
///
/// A store and a producer are required; everything else has a default.
pub struct CacheBuilder<C> {
  store: Option<Arc<dyn Store<C>>>,
  producer: Option<RequestPairedProducer<C>>,
  logger: Option<Arc<dyn Logger>>,
  clock: Option<Arc<dyn Clock>>,
  normalizer: ParamNormalizer,
  collapse_window: Option<Duration>,
  watchdog_timeout: Option<Duration>,
  shutdown_timeout: Duration,
  timer_set: Option<TimerSet>,
}

impl<C> fmt::Debug for CacheBuilder<C> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("has_store", &self.store.is_some())
      .field("producer", &self.producer)
      .field("normalizer", &self.normalizer)
      .field("collapse_window", &self.collapse_window)
      .field("watchdog_timeout", &self.watchdog_timeout)
      .field("shutdown_timeout", &self.shutdown_timeout)
      .finish_non_exhaustive()
  }
}

impl<C> Default for CacheBuilder<C> {
  fn default() -> Self {
    Self {
      store: None,
      producer: None,
      logger: None,
      clock: None,
      normalizer: ParamNormalizer::default(),
      collapse_window: Some(DEFAULT_COLLAPSE_WINDOW),
      watchdog_timeout: None,
      shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
      timer_set: None,
    }
  }
}

impl<C> CacheBuilder<C>
where
  C: Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the backing store.
  pub fn store(mut self, store: impl Store<C> + 'static) -> Self {
    self.store = Some(Arc::new(store));
    self
  }

  /// Sets a backing store that is shared with other owners.
  pub fn shared_store(mut self, store: Arc<dyn Store<C>>) -> Self {
    self.store = Some(store);
    self
  }

  /// Sets the producer. See [`wrap_producer`](crate::wrap_producer).
  pub fn producer(mut self, producer: RequestPairedProducer<C>) -> Self {
    self.producer = Some(producer);
    self
  }

  /// Sets the logger for the cache and the components it creates.
  /// Defaults to [`TracingLogger`](crate::TracingLogger).
  pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
    self.logger = Some(logger);
    self
  }

  /// Sets the clock that ages entries. Defaults to the system clock.
  pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = Some(clock);
    self
  }

  /// Canonicalizes param names, in requests and in producer vary lists alike.
  pub fn param_name_normalizer<F>(mut self, f: F) -> Self
  where
    F: Fn(&str) -> String + Send + Sync + 'static,
  {
    self.normalizer = self.normalizer.with_name_fn(f);
    self
  }

  /// Canonicalizes param values. Receives the normalized name.
  pub fn param_value_normalizer<F>(mut self, f: F) -> Self
  where
    F: Fn(&str, &Value) -> Value + Send + Sync + 'static,
  {
    self.normalizer = self.normalizer.with_value_fn(f);
    self
  }

  /// How long an in-flight producer call is joined by new callers.
  /// `None` joins it regardless of age.
  pub fn collapse_window(mut self, window: Option<Duration>) -> Self {
    self.collapse_window = window;
    self
  }

  /// Fails producer calls that have not settled after `timeout`.
  pub fn watchdog_timeout(mut self, timeout: Duration) -> Self {
    self.watchdog_timeout = Some(timeout);
    self
  }

  /// How long [`Cache::close`] waits by default.
  pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
    self.shutdown_timeout = timeout;
    self
  }

  /// Schedules watchdogs on an existing timer set, e.g. one shared with
  /// other components that shut down together.
  pub fn timer_set(mut self, timers: TimerSet) -> Self {
    self.timer_set = Some(timers);
    self
  }

  /// Applies the timing settings of a loaded configuration.
  pub fn config(mut self, config: &CacheConfig) -> Self {
    self.collapse_window = config.collapse_window;
    self.watchdog_timeout = config.watchdog_timeout;
    self.shutdown_timeout = config.shutdown_timeout;
    self
  }

  pub fn build(mut self) -> Result<Cache<C>, BuildError> {
    self.validate()?;
    let store = self.store.take().ok_or(BuildError::MissingStore)?;
    let producer = self.producer.take().ok_or(BuildError::MissingProducer)?;
    Ok(self.assemble(store, producer))
  }

  pub(crate) fn validate(&self) -> Result<(), BuildError> {
    if self.store.is_none() {
      return Err(BuildError::MissingStore);
    }
    if self.producer.is_none() {
      return Err(BuildError::MissingProducer);
    }
    if self.watchdog_timeout.is_some_and(|timeout| timeout.is_zero()) {
      return Err(BuildError::ZeroWatchdogTimeout);
    }
    Ok(())
  }

  pub(crate) fn assemble(self, store: Arc<dyn Store<C>>, producer: RequestPairedProducer<C>) -> Cache<C> {
    let logger = self.logger.unwrap_or_else(default_logger);
    let timers = self
      .timer_set
      .unwrap_or_else(|| TimerSet::with_logger(logger.clone()));
    let watchdog = self.watchdog_timeout.map(|timeout| (timeout, timers.clone()));

    Cache {
      inner: Arc::new(CacheInner {
        store,
        producer,
        normalizer: self.normalizer,
        clock: self.clock.unwrap_or_else(default_clock),
        tasks: CollapsedTaskCreator::new(self.collapse_window, watchdog, logger.clone()),
        timers,
        shutdown_timeout: self.shutdown_timeout,
        metrics: Metrics::new(),
        logger: ComponentLogger::new(Component::Cache, logger),
      }),
    }
  }
}
