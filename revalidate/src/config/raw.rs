use serde::Deserialize;

// Mirrors the YAML layout. Durations stay strings until processed.

#[derive(Debug, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct CacheConfigRaw {
  /// A duration such as `"3s"`, or `"none"` to join in-flight tasks regardless of age.
  #[serde(default)]
  pub collapse_window: Option<String>,
  #[serde(default)]
  pub watchdog_timeout: Option<String>,
  #[serde(default)]
  pub shutdown_timeout: Option<String>,
  /// One of `allow`, `warn` or `reject`.
  #[serde(default)]
  pub vary_policy: Option<String>,
  #[serde(default)]
  pub memory_store: MemoryStoreConfigRaw,
}

#[derive(Debug, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct MemoryStoreConfigRaw {
  #[serde(default)]
  pub fallback_delete_after: Option<String>,
}
