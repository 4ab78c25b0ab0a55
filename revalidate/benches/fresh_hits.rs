use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fibre_revalidate::{
  wrap_producer, Cache, ConsumerRequest, Error, MemoryStore, NoopLogger, ProducerResult,
  WrapProducerOptions,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

const NUM_IDS: usize = 1_000;

fn build_cache() -> Cache<u64> {
  let quiet = Arc::new(NoopLogger);
  let producer = wrap_producer(
    |request: ConsumerRequest| async move {
      let n: u64 = request.id.trim_start_matches("item:").parse().unwrap_or(0);
      Ok::<_, Error>(ProducerResult::new(n, Duration::from_secs(3600)).vary_on(["locale"]))
    },
    WrapProducerOptions::default().logger(quiet.clone()),
  );
  Cache::builder()
    .store(MemoryStore::new().logger(quiet.clone()))
    .producer(producer)
    .logger(quiet)
    .build()
    .unwrap()
}

fn request(i: usize) -> ConsumerRequest {
  ConsumerRequest::new(format!("item:{i}")).param("locale", if i % 2 == 0 { "en" } else { "fr" })
}

fn fresh_hits(c: &mut Criterion) {
  let rt = Runtime::new().unwrap();
  let cache = build_cache();
  rt.block_on(async {
    for i in 0..NUM_IDS {
      cache.get(request(i)).await.unwrap();
    }
  });

  let mut group = c.benchmark_group("FreshHits");
  for concurrency in [1usize, 8] {
    group.throughput(Throughput::Elements((NUM_IDS * concurrency) as u64));
    group.bench_with_input(BenchmarkId::from_parameter(concurrency), &concurrency, |b, &concurrency| {
      b.to_async(&rt).iter(|| {
        let cache = cache.clone();
        async move {
          let tasks: Vec<_> = (0..concurrency)
            .map(|_| {
              let cache = cache.clone();
              tokio::spawn(async move {
                for i in 0..NUM_IDS {
                  black_box(cache.get(request(i)).await.unwrap());
                }
              })
            })
            .collect();
          for task in tasks {
            task.await.unwrap();
          }
        }
      });
    });
  }
  group.finish();
}

criterion_group!(benches, fresh_hits);
criterion_main!(benches);
