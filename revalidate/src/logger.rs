//! The logging hook shared by every component of the engine.
//!
//! Components never write to a fixed output. They call a [`Logger`], which by
//! default forwards to `tracing`, so host applications can route cache logs
//! wherever they route everything else.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// The component emitting a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
  Cache,
  WrapProducer,
  CollapsedTaskCreator,
  TimerSet,
  MemoryStore,
  /// Reserved for Redis-backed stores implemented outside this crate.
  RedisStore,
}

impl Component {
  pub fn as_str(&self) -> &'static str {
    match self {
      Component::Cache => "cache",
      Component::WrapProducer => "wrap-producer",
      Component::CollapsedTaskCreator => "collapsed-task-creator",
      Component::TimerSet => "timer-set",
      Component::MemoryStore => "memory-store",
      Component::RedisStore => "redis-store",
    }
  }
}

impl fmt::Display for Component {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Severity of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
  Trace,
  Debug,
  Info,
  Warn,
  Error,
  Fatal,
}

impl fmt::Display for Level {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Level::Trace => "trace",
      Level::Debug => "debug",
      Level::Info => "info",
      Level::Warn => "warn",
      Level::Error => "error",
      Level::Fatal => "fatal",
    };
    f.write_str(name)
  }
}

/// A structured, leveled logging sink.
///
/// Any `Fn(Component, Level, &str, Option<&Value>)` closure is a `Logger`.
pub trait Logger: Send + Sync {
  fn log(&self, component: Component, level: Level, message: &str, data: Option<&Value>);
}

impl<F> Logger for F
where
  F: Fn(Component, Level, &str, Option<&Value>) + Send + Sync,
{
  fn log(&self, component: Component, level: Level, message: &str, data: Option<&Value>) {
    self(component, level, message, data)
  }
}

/// Forwards events to the `tracing` ecosystem. This is the default logger.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
  fn log(&self, component: Component, level: Level, message: &str, data: Option<&Value>) {
    let component = component.as_str();
    // `tracing` wants static levels, so each arm is its own callsite.
    match (level, data) {
      (Level::Trace, Some(data)) => tracing::trace!(component, data = %data, "{}", message),
      (Level::Trace, None) => tracing::trace!(component, "{}", message),
      (Level::Debug, Some(data)) => tracing::debug!(component, data = %data, "{}", message),
      (Level::Debug, None) => tracing::debug!(component, "{}", message),
      (Level::Info, Some(data)) => tracing::info!(component, data = %data, "{}", message),
      (Level::Info, None) => tracing::info!(component, "{}", message),
      (Level::Warn, Some(data)) => tracing::warn!(component, data = %data, "{}", message),
      (Level::Warn, None) => tracing::warn!(component, "{}", message),
      (Level::Error, Some(data)) => tracing::error!(component, data = %data, "{}", message),
      (Level::Error, None) => tracing::error!(component, "{}", message),
      (Level::Fatal, Some(data)) => {
        tracing::error!(component, fatal = true, data = %data, "{}", message)
      }
      (Level::Fatal, None) => tracing::error!(component, fatal = true, "{}", message),
    }
  }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
  fn log(&self, _: Component, _: Level, _: &str, _: Option<&Value>) {}
}

/// A logger bound to one component, so call sites only pick a level.
#[derive(Clone)]
pub(crate) struct ComponentLogger {
  component: Component,
  logger: Arc<dyn Logger>,
}

impl fmt::Debug for ComponentLogger {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ComponentLogger")
      .field("component", &self.component)
      .finish_non_exhaustive()
  }
}

impl ComponentLogger {
  pub(crate) fn new(component: Component, logger: Arc<dyn Logger>) -> Self {
    Self { component, logger }
  }

  pub(crate) fn trace(&self, message: &str, data: Value) {
    self.logger.log(self.component, Level::Trace, message, Some(&data));
  }

  pub(crate) fn debug(&self, message: &str, data: Value) {
    self.logger.log(self.component, Level::Debug, message, Some(&data));
  }

  pub(crate) fn warn(&self, message: &str, data: Value) {
    self.logger.log(self.component, Level::Warn, message, Some(&data));
  }

  pub(crate) fn error(&self, message: &str, data: Value) {
    self.logger.log(self.component, Level::Error, message, Some(&data));
  }
}

/// The logger used when none is configured.
pub fn default_logger() -> Arc<dyn Logger> {
  Arc::new(TracingLogger)
}
