use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;
use serde::Serialize;

/// Lock-free counters for one `Cache`.
#[derive(Debug)]
pub(crate) struct Metrics {
  pub(crate) requests: CachePadded<AtomicU64>,

  // --- Lookups ---
  pub(crate) fresh_hits: CachePadded<AtomicU64>,
  pub(crate) stale_hits: CachePadded<AtomicU64>,
  pub(crate) revalidating_hits: CachePadded<AtomicU64>,
  pub(crate) stale_on_error: CachePadded<AtomicU64>,
  pub(crate) misses: CachePadded<AtomicU64>,
  pub(crate) stale_refreshes: CachePadded<AtomicU64>,
  pub(crate) bypassed: CachePadded<AtomicU64>,

  // --- Failures ---
  pub(crate) producer_errors: CachePadded<AtomicU64>,
  pub(crate) background_errors: CachePadded<AtomicU64>,
  pub(crate) store_read_errors: CachePadded<AtomicU64>,
  pub(crate) store_write_errors: CachePadded<AtomicU64>,

  pub(crate) invalidations: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      requests: CachePadded::new(AtomicU64::new(0)),
      fresh_hits: CachePadded::new(AtomicU64::new(0)),
      stale_hits: CachePadded::new(AtomicU64::new(0)),
      revalidating_hits: CachePadded::new(AtomicU64::new(0)),
      stale_on_error: CachePadded::new(AtomicU64::new(0)),
      misses: CachePadded::new(AtomicU64::new(0)),
      stale_refreshes: CachePadded::new(AtomicU64::new(0)),
      bypassed: CachePadded::new(AtomicU64::new(0)),
      producer_errors: CachePadded::new(AtomicU64::new(0)),
      background_errors: CachePadded::new(AtomicU64::new(0)),
      store_read_errors: CachePadded::new(AtomicU64::new(0)),
      store_write_errors: CachePadded::new(AtomicU64::new(0)),
      invalidations: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

#[inline]
pub(crate) fn bump(counter: &CachePadded<AtomicU64>) {
  counter.fetch_add(1, Ordering::Relaxed);
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    let fresh_hits = self.fresh_hits.load(Ordering::Relaxed);
    let stale_hits = self.stale_hits.load(Ordering::Relaxed);
    let revalidating_hits = self.revalidating_hits.load(Ordering::Relaxed);
    let stale_on_error = self.stale_on_error.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let stale_refreshes = self.stale_refreshes.load(Ordering::Relaxed);

    let hits = fresh_hits + stale_hits + revalidating_hits + stale_on_error;
    let lookups = hits + misses + stale_refreshes;

    MetricsSnapshot {
      requests: self.requests.load(Ordering::Relaxed),
      fresh_hits,
      stale_hits,
      revalidating_hits,
      stale_on_error,
      misses,
      stale_refreshes,
      bypassed: self.bypassed.load(Ordering::Relaxed),
      hit_ratio: if lookups == 0 {
        0.0
      } else {
        hits as f64 / lookups as f64
      },
      producer_errors: self.producer_errors.load(Ordering::Relaxed),
      background_errors: self.background_errors.load(Ordering::Relaxed),
      store_read_errors: self.store_read_errors.load(Ordering::Relaxed),
      store_write_errors: self.store_write_errors.load(Ordering::Relaxed),
      invalidations: self.invalidations.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time snapshot of a cache's counters.
#[derive(Clone, Serialize)]
pub struct MetricsSnapshot {
  /// Calls to `get` and `refresh`.
  pub requests: u64,
  /// Requests answered by a fresh entry.
  pub fresh_hits: u64,
  /// Requests answered by a stale entry, without revalidation.
  pub stale_hits: u64,
  /// Requests answered by a stale entry while it was revalidated.
  pub revalidating_hits: u64,
  /// Requests answered by a stale entry because the producer failed.
  pub stale_on_error: u64,
  /// Requests with no usable entry that had to wait on the producer.
  pub misses: u64,
  /// Requests holding an entry usable only if the producer failed, which
  /// waited on the producer and got a new result. Not counted in `misses`.
  pub stale_refreshes: u64,
  /// Requests that skipped the cache as uncacheable.
  pub bypassed: u64,
  /// Hits over all cacheable lookups, stale refreshes included. Bypassed
  /// requests are not counted.
  pub hit_ratio: f64,
  /// Producer failures surfaced to callers.
  pub producer_errors: u64,
  /// Failed background revalidations.
  pub background_errors: u64,
  pub store_read_errors: u64,
  pub store_write_errors: u64,
  /// Calls to `invalidate`.
  pub invalidations: u64,
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("requests", &self.requests)
      .field("fresh_hits", &self.fresh_hits)
      .field("stale_hits", &self.stale_hits)
      .field("revalidating_hits", &self.revalidating_hits)
      .field("stale_on_error", &self.stale_on_error)
      .field("misses", &self.misses)
      .field("stale_refreshes", &self.stale_refreshes)
      .field("bypassed", &self.bypassed)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("producer_errors", &self.producer_errors)
      .field("background_errors", &self.background_errors)
      .field("store_read_errors", &self.store_read_errors)
      .field("store_write_errors", &self.store_write_errors)
      .field("invalidations", &self.invalidations)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
