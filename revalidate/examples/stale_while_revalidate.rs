use fibre_revalidate::{
  wrap_producer, Cache, ConsumerRequest, Error, MaxStale, MemoryStore, ProducerResult,
  WrapProducerOptions,
};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use std::time::Duration;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "fibre_revalidate=debug".into()),
    )
    .init();

  let produce_counter = Arc::new(AtomicUsize::new(0));

  let producer = wrap_producer(
    {
      let counter = produce_counter.clone();
      move |request: ConsumerRequest| {
        let version = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
          println!("[Producer] Producing version {} for '{}'...", version, request.id);
          tokio::time::sleep(Duration::from_millis(500)).await; // Simulate a slow backend
          Ok::<_, Error>(
            ProducerResult::new(format!("{} - version {}", request.id, version), Duration::from_secs(2))
              // 10s grace period, served while a new version is produced.
              .max_stale(MaxStale::while_revalidating(Duration::from_secs(10))),
          )
        }
      }
    },
    WrapProducerOptions::default(),
  );

  let cache = Cache::new(MemoryStore::new(), producer);
  let request = || ConsumerRequest::new("my-data");

  println!("--- Step 1: Initial Production ---");
  let response = cache.get(request()).await.unwrap();
  println!("Received: {:?} ({:?})", response.content(), response.status);

  println!("\n--- Step 2: Cache Hit (Fresh) ---");
  let response = cache.get(request()).await.unwrap();
  println!("Received: {:?} ({:?})", response.content(), response.status);
  assert_eq!(produce_counter.load(Ordering::Relaxed), 1);

  println!("\n--- Step 3: Wait for freshness to lapse (3 seconds) ---");
  tokio::time::sleep(Duration::from_secs(3)).await;

  println!("\n--- Step 4: Stale Read ---");
  let response = cache.get(request()).await.unwrap();
  println!("IMMEDIATELY Received (stale): {:?} ({:?})", response.content(), response.status);
  assert!(response.content().ends_with("version 1"));

  println!("\n--- Step 5: Wait for Background Revalidation to Complete ---");
  tokio::time::sleep(Duration::from_secs(1)).await;
  assert_eq!(produce_counter.load(Ordering::Relaxed), 2);

  println!("\n--- Step 6: Final Read (Fresh) ---");
  let response = cache.get(request()).await.unwrap();
  println!("Received (revalidated): {:?} ({:?})", response.content(), response.status);
  assert!(response.content().ends_with("version 2"));

  println!("\nCache metrics: {:#?}", cache.metrics());
  cache.close(None).await.unwrap();
}
