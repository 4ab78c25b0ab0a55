mod common;

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use common::{count, greeting_producer, quiet, MS};
use fibre_revalidate::{
  wrap_producer, Cache, CacheStatus, ConsumerRequest, Error, MemoryStore, ProducerResult, VaryPolicy,
  WrapProducerOptions,
};
use serde_json::Value;

fn cache_over(store: Arc<MemoryStore<String>>, calls: Arc<AtomicUsize>) -> Cache<String> {
  Cache::builder()
    .shared_store(store)
    .producer(greeting_producer(calls, MS * 60_000))
    .logger(quiet())
    .build()
    .unwrap()
}

#[tokio::test]
async fn test_params_outside_vary_share_an_entry() {
  let calls = Arc::new(AtomicUsize::new(0));
  let cache = cache_over(Arc::new(MemoryStore::new().logger(quiet())), calls.clone());

  let first = ConsumerRequest::new("user:42").param("locale", "en").param("debug", true);
  let second = ConsumerRequest::new("user:42").param("locale", "en").param("debug", false);

  cache.get(first).await.unwrap();
  let response = cache.get(second).await.unwrap();
  assert_eq!(response.status, CacheStatus::Fresh);
  assert_eq!(count(&calls), 1);
}

#[tokio::test]
async fn test_variants_coexist_under_one_id() {
  let calls = Arc::new(AtomicUsize::new(0));
  let store = Arc::new(MemoryStore::new().logger(quiet()));
  let cache = cache_over(store.clone(), calls.clone());

  for locale in ["en", "fr", "en", "fr"] {
    cache
      .get(ConsumerRequest::new("user:42").param("locale", locale))
      .await
      .unwrap();
  }
  assert_eq!(count(&calls), 2);
  assert_eq!(store.len(), 2);

  let fr = cache
    .get(ConsumerRequest::new("user:42").param("locale", "fr"))
    .await
    .unwrap();
  assert_eq!(fr.content(), "Salut");
  assert_eq!(fr.status, CacheStatus::Fresh);
}

#[tokio::test]
async fn test_missing_vary_param_only_matches_missing() {
  let calls = Arc::new(AtomicUsize::new(0));
  let cache = cache_over(Arc::new(MemoryStore::new().logger(quiet())), calls.clone());

  let bare = cache.get(ConsumerRequest::new("user:42")).await.unwrap();
  assert_eq!(bare.entry.vary.get("locale"), Some(None));

  // `null` is the same as not supplying the param.
  let null = cache
    .get(ConsumerRequest::new("user:42").param("locale", Value::Null))
    .await
    .unwrap();
  assert_eq!(null.status, CacheStatus::Fresh);

  let en = cache
    .get(ConsumerRequest::new("user:42").param("locale", "en"))
    .await
    .unwrap();
  assert_eq!(en.status, CacheStatus::Produced);
  assert_eq!(count(&calls), 2);
}

#[tokio::test]
async fn test_normalizers_canonicalize_before_matching() {
  let calls = Arc::new(AtomicUsize::new(0));
  let cache = Cache::builder()
    .store(MemoryStore::new().logger(quiet()))
    .producer(greeting_producer(calls.clone(), MS * 60_000))
    .param_name_normalizer(|name| name.to_ascii_lowercase())
    .param_value_normalizer(|_, value| match value {
      Value::String(s) => Value::String(s.trim().to_ascii_lowercase()),
      other => other.clone(),
    })
    .logger(quiet())
    .build()
    .unwrap();

  cache
    .get(ConsumerRequest::new("user:42").param("locale", "en"))
    .await
    .unwrap();
  let response = cache
    .get(ConsumerRequest::new("user:42").param("Locale", " EN "))
    .await
    .unwrap();
  assert_eq!(response.status, CacheStatus::Fresh);
  assert_eq!(count(&calls), 1);
}

#[tokio::test]
async fn test_vary_check_sees_normalized_names() {
  let producer = wrap_producer(
    |_request: ConsumerRequest| async {
      Ok::<_, Error>(ProducerResult::new("Hi".to_string(), MS * 60_000).vary_on(["locale"]))
    },
    WrapProducerOptions::default().vary_policy(VaryPolicy::Reject).logger(quiet()),
  );
  let cache = Cache::builder()
    .store(MemoryStore::new().logger(quiet()))
    .producer(producer)
    .param_name_normalizer(|name| name.to_ascii_lowercase())
    .logger(quiet())
    .build()
    .unwrap();

  let produced = cache
    .get(ConsumerRequest::new("user:42").param("Locale", "en"))
    .await
    .unwrap();
  assert_eq!(produced.status, CacheStatus::Produced);
  assert_eq!(produced.entry.vary.get("locale"), Some(Some(&Value::from("en"))));

  let hit = cache
    .get(ConsumerRequest::new("user:42").param("LOCALE", "en"))
    .await
    .unwrap();
  assert_eq!(hit.status, CacheStatus::Fresh);

  let error = cache.get(ConsumerRequest::new("user:42")).await.unwrap_err();
  assert!(matches!(error, Error::UndeclaredVary { .. }));
}
