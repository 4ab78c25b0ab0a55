mod common;

use std::io::Write;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use common::{count, quiet, MS};
use fibre_revalidate::{
  wrap_producer, Cache, CacheConfig, CacheStatus, ConfigError, ConsumerRequest, Error, ProducerResult,
  VaryPolicy,
};

#[test]
fn test_config_loads_from_file() {
  let mut file = tempfile::NamedTempFile::new().unwrap();
  writeln!(
    file,
    "collapse_window: 500ms\nshutdown_timeout: 2s\nvary_policy: reject\nmemory_store:\n  fallback_delete_after: 10m"
  )
  .unwrap();

  let config = CacheConfig::from_path(file.path()).unwrap();
  assert_eq!(config.collapse_window, Some(Duration::from_millis(500)));
  assert_eq!(config.shutdown_timeout, Duration::from_secs(2));
  assert_eq!(config.vary_policy, VaryPolicy::Reject);
  assert_eq!(config.memory_store.fallback_delete_after, Duration::from_secs(600));
  assert_eq!(config.watchdog_timeout, None);
}

#[test]
fn test_missing_config_file_is_a_read_error() {
  let dir = tempfile::tempdir().unwrap();
  let result = CacheConfig::from_path(dir.path().join("absent.yaml"));
  assert!(matches!(result, Err(ConfigError::Read(_))));
}

#[tokio::test]
async fn test_cache_built_from_config_applies_vary_policy() {
  let config = CacheConfig::from_yaml_str("vary_policy: reject\nwatchdog_timeout: 5s").unwrap();
  let calls = Arc::new(AtomicUsize::new(0));

  let producer = {
    let calls = calls.clone();
    wrap_producer(
      move |request: ConsumerRequest| {
        calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        // Varies on `tz`, which the first request omits.
        let content = format!("{}@{}", request.id, request.params.contains_key("tz"));
        async move { Ok::<_, Error>(ProducerResult::new(content, MS * 1000).vary_on(["tz"])) }
      },
      config.producer_options().logger(quiet()),
    )
  };
  let cache = Cache::builder()
    .store(config.memory_store.build())
    .producer(producer)
    .config(&config)
    .logger(quiet())
    .build()
    .unwrap();

  let error = cache.get(ConsumerRequest::new("k").param("locale", "en")).await.unwrap_err();
  assert!(matches!(error, Error::UndeclaredVary { .. }));

  let response = cache.get(ConsumerRequest::new("k").param("tz", "utc")).await.unwrap();
  assert_eq!(response.status, CacheStatus::Produced);
  assert_eq!(response.content(), "k@true");
  assert_eq!(count(&calls), 2);
}
