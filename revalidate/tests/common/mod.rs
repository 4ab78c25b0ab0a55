#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fibre_revalidate::{
  wrap_producer, Cache, Clock, ConsumerRequest, Error, Logger, ManualClock, MemoryStore, NoopLogger,
  ProducerResult, RequestPairedProducer, WrapProducerOptions,
};

pub const MS: Duration = Duration::from_millis(1);

pub fn quiet() -> Arc<dyn Logger> {
  Arc::new(NoopLogger)
}

/// A producer that counts its calls. `make` receives the request and the
/// 1-based call number.
pub fn counting_producer<F>(
  calls: Arc<AtomicUsize>,
  delay: Duration,
  make: F,
) -> RequestPairedProducer<String>
where
  F: Fn(&ConsumerRequest, usize) -> Result<ProducerResult<String>, Error> + Send + Sync + 'static,
{
  let make = Arc::new(make);
  wrap_producer(
    move |request: ConsumerRequest| {
      let calls = calls.clone();
      let make = make.clone();
      async move {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !delay.is_zero() {
          tokio::time::sleep(delay).await;
        }
        make(&request, n)
      }
    },
    WrapProducerOptions::default().logger(quiet()),
  )
}

/// Greets in the request's `locale`, varying on it.
pub fn greeting_producer(calls: Arc<AtomicUsize>, fresh_until_age: Duration) -> RequestPairedProducer<String> {
  counting_producer(calls, Duration::ZERO, move |request, _| {
    let greeting = match request.params.get("locale").and_then(|it| it.as_str()) {
      Some("fr") => "Salut",
      _ => "Hi",
    };
    Ok(ProducerResult::new(greeting.to_string(), fresh_until_age).vary_on(["locale"]))
  })
}

/// A cache over a `MemoryStore`, both driven by the returned clock.
pub fn cache_with_clock(producer: RequestPairedProducer<String>) -> (Cache<String>, ManualClock) {
  let clock = ManualClock::new();
  let shared: Arc<dyn Clock> = Arc::new(clock.clone());
  let store = MemoryStore::new().clock(shared.clone()).logger(quiet());
  let cache = Cache::builder()
    .store(store)
    .producer(producer)
    .clock(shared)
    .logger(quiet())
    .build()
    .unwrap();
  (cache, clock)
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
  for _ in 0..400 {
    if condition() {
      return;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
  panic!("condition not met in time");
}

pub fn count(calls: &AtomicUsize) -> usize {
  calls.load(Ordering::SeqCst)
}
