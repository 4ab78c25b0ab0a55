//! Declarative cache configuration, loaded from YAML.
//!
//! ```yaml
//! collapse_window: 3s
//! watchdog_timeout: 30s
//! shutdown_timeout: 5s
//! vary_policy: warn
//! memory_store:
//!   fallback_delete_after: 1h
//! ```

pub mod raw;

use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::producer::{VaryPolicy, WrapProducerOptions};
use crate::store::memory::{MemoryStore, DEFAULT_FALLBACK_DELETE_AFTER};
use crate::task::DEFAULT_COLLAPSE_WINDOW;

use raw::{CacheConfigRaw, MemoryStoreConfigRaw};

/// How long `Cache::close` waits for background work by default.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Validated cache settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
  /// `None` joins in-flight producer calls regardless of their age.
  pub collapse_window: Option<Duration>,
  /// `None` disables the coalescing watchdog.
  pub watchdog_timeout: Option<Duration>,
  pub shutdown_timeout: Duration,
  pub vary_policy: VaryPolicy,
  pub memory_store: MemoryStoreConfig,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      collapse_window: Some(DEFAULT_COLLAPSE_WINDOW),
      watchdog_timeout: None,
      shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
      vary_policy: VaryPolicy::default(),
      memory_store: MemoryStoreConfig::default(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryStoreConfig {
  pub fallback_delete_after: Duration,
}

impl Default for MemoryStoreConfig {
  fn default() -> Self {
    Self {
      fallback_delete_after: DEFAULT_FALLBACK_DELETE_AFTER,
    }
  }
}

impl MemoryStoreConfig {
  /// Creates a `MemoryStore` with these settings.
  pub fn build<C>(&self) -> MemoryStore<C> {
    MemoryStore::new().fallback_delete_after(self.fallback_delete_after)
  }
}

impl CacheConfig {
  pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
    if yaml.trim().is_empty() {
      return Ok(Self::default());
    }
    let raw: CacheConfigRaw = serde_yaml::from_str(yaml)?;
    process_raw_config(raw)
  }

  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let yaml = std::fs::read_to_string(path)?;
    Self::from_yaml_str(&yaml)
  }

  /// Producer options carrying the configured vary policy.
  pub fn producer_options(&self) -> WrapProducerOptions {
    WrapProducerOptions::default().vary_policy(self.vary_policy)
  }
}

pub fn process_raw_config(raw: CacheConfigRaw) -> Result<CacheConfig, ConfigError> {
  let defaults = CacheConfig::default();

  let collapse_window = match raw.collapse_window.as_deref().map(str::trim) {
    None => defaults.collapse_window,
    Some(value) if value.eq_ignore_ascii_case("none") => None,
    Some(value) => Some(parse_duration(value, "collapse_window")?),
  };

  let watchdog_timeout = match raw.watchdog_timeout.as_deref() {
    None => None,
    Some(value) => {
      let timeout = parse_duration(value, "watchdog_timeout")?;
      if timeout.is_zero() {
        return Err(ConfigError::InvalidValue {
          field: "watchdog_timeout".to_string(),
          message: "Watchdog timeout must be greater than zero.".to_string(),
        });
      }
      Some(timeout)
    }
  };

  let shutdown_timeout = match raw.shutdown_timeout.as_deref() {
    None => defaults.shutdown_timeout,
    Some(value) => parse_duration(value, "shutdown_timeout")?,
  };

  let vary_policy = match raw.vary_policy.as_deref() {
    None => defaults.vary_policy,
    Some(value) => parse_vary_policy(value)?,
  };

  Ok(CacheConfig {
    collapse_window,
    watchdog_timeout,
    shutdown_timeout,
    vary_policy,
    memory_store: process_memory_store(raw.memory_store)?,
  })
}

fn process_memory_store(raw: MemoryStoreConfigRaw) -> Result<MemoryStoreConfig, ConfigError> {
  let fallback_delete_after = match raw.fallback_delete_after.as_deref() {
    None => DEFAULT_FALLBACK_DELETE_AFTER,
    Some(value) => parse_duration(value, "memory_store.fallback_delete_after")?,
  };
  Ok(MemoryStoreConfig {
    fallback_delete_after,
  })
}

fn parse_duration(value: &str, field: &str) -> Result<Duration, ConfigError> {
  humantime::parse_duration(value.trim()).map_err(|e| ConfigError::InvalidValue {
    field: field.to_string(),
    message: format!("Invalid duration '{}': {}", value, e),
  })
}

fn parse_vary_policy(value: &str) -> Result<VaryPolicy, ConfigError> {
  match value.trim().to_lowercase().as_str() {
    "allow" => Ok(VaryPolicy::Allow),
    "warn" => Ok(VaryPolicy::Warn),
    "reject" => Ok(VaryPolicy::Reject),
    other => Err(ConfigError::InvalidValue {
      field: "vary_policy".to_string(),
      message: format!(
        "Unknown vary policy '{}'. Expected 'allow', 'warn', or 'reject'.",
        other
      ),
    }),
  }
}
