use std::cmp::Reverse;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use crate::builder::CacheBuilder;
use crate::entry::{Entry, Freshness};
use crate::error::Result;
use crate::logger::ComponentLogger;
use crate::metrics::{bump, Metrics, MetricsSnapshot};
use crate::normalize::{
  request_key, variant_matches_request, variant_task_key, NormalizedParams, NormalizedVary,
  ParamNormalizer,
};
use crate::producer::RequestPairedProducer;
use crate::request::ConsumerRequest;
use crate::result::ProducerResult;
use crate::store::Store;
use crate::task::{CollapsedTaskCreator, TimerSet};
use crate::time::Clock;

/// How a response was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStatus {
  /// A fresh stored entry.
  Fresh,
  /// A stale stored entry the consumer accepts as-is.
  Stale,
  /// A stale stored entry, served while a background call refreshes it.
  Revalidating,
  /// A stale stored entry, served because the producer failed.
  StaleOnError,
  /// A new result from the producer.
  Produced,
  /// A new result for an uncacheable request. Nothing was read or stored.
  Bypassed,
}

impl CacheStatus {
  /// Whether the response came from the store.
  pub fn is_hit(&self) -> bool {
    matches!(
      self,
      CacheStatus::Fresh | CacheStatus::Stale | CacheStatus::Revalidating | CacheStatus::StaleOnError
    )
  }
}

/// The answer to a [`Cache::get`].
#[derive(Debug)]
pub struct CacheResponse<C> {
  pub entry: Arc<Entry<C>>,
  pub status: CacheStatus,
}

impl<C> Clone for CacheResponse<C> {
  fn clone(&self) -> Self {
    Self {
      entry: self.entry.clone(),
      status: self.status,
    }
  }
}

impl<C> CacheResponse<C> {
  pub fn content(&self) -> &C {
    &self.entry.content
  }
}

pub(crate) struct CacheInner<C> {
  pub(crate) store: Arc<dyn Store<C>>,
  pub(crate) producer: RequestPairedProducer<C>,
  pub(crate) normalizer: ParamNormalizer,
  pub(crate) clock: Arc<dyn Clock>,
  pub(crate) tasks: CollapsedTaskCreator<Arc<Entry<C>>>,
  pub(crate) timers: TimerSet,
  pub(crate) shutdown_timeout: Duration,
  pub(crate) metrics: Metrics,
  pub(crate) logger: ComponentLogger,
}

impl<C> CacheInner<C>
where
  C: Send + Sync + 'static,
{
  fn entry_from(&self, id: String, params: &NormalizedParams, result: ProducerResult<C>) -> Entry<C> {
    let vary_keys = self.normalizer.normalize_vary(result.vary.as_slice());
    let vary = NormalizedVary::project(&vary_keys, params);
    Entry::from_result(id, vary, result, self.clock.now())
  }

  async fn lookup(&self, request: &ConsumerRequest, params: &NormalizedParams) -> Vec<Arc<Entry<C>>> {
    match self.store.get(&request.id, params).await {
      Ok(entries) => entries,
      Err(error) => {
        bump(&self.metrics.store_read_errors);
        self.logger.error(
          "Store read failed, treating as a miss.",
          json!({ "id": request.id, "error": error.to_string() }),
        );
        Vec::new()
      }
    }
  }

  /// Calls the producer and writes the result, and any supplemental
  /// resources, to the store. Write failures are logged and do not fail the
  /// call.
  async fn produce_and_store(
    &self,
    request: ConsumerRequest,
    params: NormalizedParams,
  ) -> Result<Arc<Entry<C>>> {
    let id = request.id.clone();
    let mut result = match self.producer.call_with(request, &self.normalizer).await {
      Ok(result) => result,
      Err(error) => {
        bump(&self.metrics.producer_errors);
        return Err(error);
      }
    };

    for resource in std::mem::take(&mut result.supplemental) {
      let Some(resource_id) = resource.id.clone() else {
        self.logger.warn(
          "Supplemental resource has no id, dropping it.",
          json!({ "id": id }),
        );
        continue;
      };
      let entry = Arc::new(self.entry_from(resource_id, &params, resource));
      self.store_entry(entry).await;
    }

    let entry = Arc::new(self.entry_from(id, &params, result));
    self.store_entry(entry.clone()).await;
    Ok(entry)
  }

  async fn store_entry(&self, entry: Arc<Entry<C>>) {
    let store_for = entry.max_store_for(self.clock.now());
    if store_for == Some(Duration::ZERO) {
      self.logger.trace(
        "Result is not storable, skipping the write.",
        json!({ "id": entry.id }),
      );
      return;
    }

    let id = entry.id.clone();
    if let Err(error) = self.store.set(entry, store_for).await {
      bump(&self.metrics.store_write_errors);
      self.logger.error(
        "Store write failed, returning the result unstored.",
        json!({ "id": id, "error": error.to_string() }),
      );
    }
  }
}

/// The key a producer call for `id` and `params` is coalesced under.
///
/// Once a stored variant matches the request, calls are keyed by that
/// variant, so blocking calls and background revalidations of it share one
/// producer call. Otherwise they are keyed by the request's params.
fn task_key(id: &str, params: &NormalizedParams, variant: Option<&NormalizedVary>) -> String {
  match variant {
    Some(vary) => format!("variant:{}", variant_task_key(id, vary)),
    None => format!("request:{}", request_key(id, params)),
  }
}

/// A read-through cache in front of one producer.
///
/// `get` serves stored entries while they are fresh, serves stale ones within
/// the staleness both sides tolerate (refreshing them in the background when
/// asked to), and otherwise waits on the producer. Concurrent producer calls
/// for the same request are coalesced into one.
///
/// A `Cache` is cheap to clone; clones share everything.
pub struct Cache<C> {
  pub(crate) inner: Arc<CacheInner<C>>,
}

impl<C> Clone for Cache<C> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<C> fmt::Debug for Cache<C> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Cache")
      .field("producer", &self.inner.producer)
      .field("tasks", &self.inner.tasks)
      .field("timers", &self.inner.timers)
      .field("metrics", &self.inner.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

impl<C> Cache<C>
where
  C: Send + Sync + 'static,
{
  /// Creates a cache with default settings.
  pub fn new(store: impl Store<C> + 'static, producer: RequestPairedProducer<C>) -> Self {
    CacheBuilder::new().assemble(Arc::new(store), producer)
  }

  pub fn builder() -> CacheBuilder<C> {
    CacheBuilder::new()
  }

  /// Answers a request from the store or the producer.
  ///
  /// Fails only when the producer had to be called and failed, in which case
  /// every caller coalesced onto that call receives the same error.
  pub async fn get(&self, request: ConsumerRequest) -> Result<CacheResponse<C>> {
    let inner = &self.inner;
    bump(&inner.metrics.requests);

    if !inner.producer.is_cacheable(&request) {
      return self.bypass(request).await;
    }

    let params = inner.normalizer.normalize(&request.params);
    let entries = inner.lookup(&request, &params).await;
    let now = inner.clock.now();
    let best = entries
      .into_iter()
      .filter(|entry| variant_matches_request(&entry.vary, &params))
      .map(|entry| (entry.classify(&request.directives, now), entry))
      .min_by_key(|(freshness, entry)| (*freshness, Reverse(entry.birth_time())));

    match best {
      Some((Freshness::Fresh, entry)) => {
        bump(&inner.metrics.fresh_hits);
        Ok(CacheResponse {
          entry,
          status: CacheStatus::Fresh,
        })
      }
      Some((Freshness::StaleAcceptable, entry)) => {
        bump(&inner.metrics.stale_hits);
        Ok(CacheResponse {
          entry,
          status: CacheStatus::Stale,
        })
      }
      Some((Freshness::StaleUsable, entry)) => {
        bump(&inner.metrics.revalidating_hits);
        self.revalidate_in_background(request, params, &entry.vary);
        Ok(CacheResponse {
          entry,
          status: CacheStatus::Revalidating,
        })
      }
      Some((Freshness::StaleIfError, stale)) => {
        let id = request.id.clone();
        let produced = self.produce(request, params, Some(&stale.vary)).await;
        match produced {
          Ok(entry) => {
            bump(&inner.metrics.stale_refreshes);
            Ok(CacheResponse {
              entry,
              status: CacheStatus::Produced,
            })
          }
          Err(error) => {
            bump(&inner.metrics.stale_on_error);
            inner.logger.warn(
              "Producer failed, serving stale entry.",
              json!({ "id": id, "error": error.to_string() }),
            );
            Ok(CacheResponse {
              entry: stale,
              status: CacheStatus::StaleOnError,
            })
          }
        }
      }
      Some((Freshness::StaleUnusable, stale)) => {
        bump(&inner.metrics.misses);
        let entry = self.produce(request, params, Some(&stale.vary)).await?;
        Ok(CacheResponse {
          entry,
          status: CacheStatus::Produced,
        })
      }
      None => {
        bump(&inner.metrics.misses);
        let entry = self.produce(request, params, None).await?;
        Ok(CacheResponse {
          entry,
          status: CacheStatus::Produced,
        })
      }
    }
  }

  /// Calls the producer regardless of what is stored, and stores the result.
  /// Joins a producer call already in flight for the same request.
  pub async fn refresh(&self, request: ConsumerRequest) -> Result<CacheResponse<C>> {
    bump(&self.inner.metrics.requests);
    if !self.inner.producer.is_cacheable(&request) {
      return self.bypass(request).await;
    }
    let params = self.inner.normalizer.normalize(&request.params);
    let stored = self
      .inner
      .lookup(&request, &params)
      .await
      .into_iter()
      .find(|entry| variant_matches_request(&entry.vary, &params));
    let entry = self
      .produce(request, params, stored.as_ref().map(|entry| &entry.vary))
      .await?;
    Ok(CacheResponse {
      entry,
      status: CacheStatus::Produced,
    })
  }

  /// Removes every stored variant under `id`.
  pub async fn invalidate(&self, id: &str) -> Result<()> {
    bump(&self.inner.metrics.invalidations);
    self.inner.logger.debug("Invalidating id.", json!({ "id": id }));
    self.inner.store.delete(id).await
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.inner.metrics.snapshot()
  }

  /// The timer set used for coalescing watchdogs.
  pub fn timer_set(&self) -> &TimerSet {
    &self.inner.timers
  }

  /// Shuts down, waiting at most `timeout` for in-flight producer calls and
  /// timers, then closes the store. `None` uses the configured shutdown
  /// timeout.
  pub async fn close(&self, timeout: Option<Duration>) -> Result<()> {
    let timeout = timeout.unwrap_or(self.inner.shutdown_timeout);
    let deadline = Instant::now() + timeout;

    if !self.inner.tasks.drain(Some(timeout)).await {
      self.inner.logger.warn(
        "Producer calls still in flight at close.",
        json!({ "pending": self.inner.tasks.pending_count() }),
      );
    }
    let remaining = deadline.saturating_duration_since(Instant::now());
    self.inner.timers.close(Some(remaining)).await;

    let remaining = deadline.saturating_duration_since(Instant::now());
    self.inner.store.close(Some(remaining)).await
  }

  async fn bypass(&self, request: ConsumerRequest) -> Result<CacheResponse<C>> {
    let inner = &self.inner;
    bump(&inner.metrics.bypassed);
    let id = request.id.clone();
    let params = inner.normalizer.normalize(&request.params);
    let result = match inner.producer.call_with(request, &inner.normalizer).await {
      Ok(result) => result,
      Err(error) => {
        bump(&inner.metrics.producer_errors);
        return Err(error);
      }
    };
    Ok(CacheResponse {
      entry: Arc::new(inner.entry_from(id, &params, result)),
      status: CacheStatus::Bypassed,
    })
  }

  /// A coalesced, blocking producer call. `variant` is the stored variant
  /// matching the request, if any.
  async fn produce(
    &self,
    request: ConsumerRequest,
    params: NormalizedParams,
    variant: Option<&NormalizedVary>,
  ) -> Result<Arc<Entry<C>>> {
    let key = task_key(&request.id, &params, variant);
    let inner = self.inner.clone();
    let task = self.inner.tasks.run(key, move || async move {
      inner.produce_and_store(request, params).await
    });
    task.await
  }

  /// Starts a coalesced revalidation of the variant `vary` and returns at once.
  fn revalidate_in_background(
    &self,
    request: ConsumerRequest,
    params: NormalizedParams,
    vary: &NormalizedVary,
  ) {
    let key = task_key(&request.id, &params, Some(vary));
    let inner = self.inner.clone();
    // Only the task that actually runs reports its failure.
    let _detached = self.inner.tasks.run(key, move || async move {
      let id = request.id.clone();
      let result = inner.produce_and_store(request, params).await;
      match &result {
        Ok(_) => inner.logger.debug("Background revalidation stored.", json!({ "id": id })),
        Err(error) => {
          bump(&inner.metrics.background_errors);
          inner.logger.warn(
            "Background revalidation failed.",
            json!({ "id": id, "error": error.to_string() }),
          );
        }
      }
      result
    });
  }
}
