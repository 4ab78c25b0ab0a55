use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::logger::{default_logger, Component, ComponentLogger, Logger};
use crate::task::timer::{TimerHandle, TimerSet};

/// How long an in-flight task is joined by new callers, by default.
pub const DEFAULT_COLLAPSE_WINDOW: Duration = Duration::from_secs(3);

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The future handed to every caller joined on one task.
pub type CollapsedTask<T> = Shared<BoxFuture<'static, Result<T>>>;

struct Pending<T> {
  generation: u64,
  started: Instant,
  task: CollapsedTask<T>,
}

struct Watchdog {
  timeout: Duration,
  timers: TimerSet,
}

struct Inner<T> {
  pending: Mutex<AHashMap<String, Pending<T>>>,
  next_generation: AtomicU64,
  collapse_window: Option<Duration>,
  watchdog: Option<Watchdog>,
  logger: ComponentLogger,
}

impl<T> Inner<T> {
  /// Removes the registry entry for `key` if it still belongs to `generation`.
  fn release(&self, key: &str, generation: u64) {
    let mut pending = self.pending.lock();
    if pending.get(key).is_some_and(|it| it.generation == generation) {
      pending.remove(key);
    }
  }
}

/// The one-shot settlement of a single task, shared by the task itself and
/// its watchdog. Whichever settles first wins.
struct Settlement<T> {
  inner: Arc<Inner<T>>,
  key: String,
  generation: u64,
  sender: Mutex<Option<oneshot::Sender<Result<T>>>>,
  watchdog: Mutex<Option<TimerHandle>>,
}

impl<T> Settlement<T> {
  fn settle(&self, result: Result<T>) {
    let Some(sender) = self.sender.lock().take() else {
      return;
    };
    if let (Some(handle), Some(watchdog)) = (self.watchdog.lock().take(), &self.inner.watchdog) {
      watchdog.timers.clear_timeout(handle);
    }
    // The next call for this key must start over, even one made by a joined
    // caller reacting to this very result.
    self.inner.release(&self.key, self.generation);
    let _ = sender.send(result);
  }
}

/// Settles the task as aborted if it is dropped before settling, e.g. when
/// the task panics or its runtime shuts down.
struct SettleOnDrop<T>(Arc<Settlement<T>>);

impl<T> Drop for SettleOnDrop<T> {
  fn drop(&mut self) {
    let key = self.0.key.clone();
    self.0.settle(Err(Error::TaskAborted { key }));
  }
}

/// Deduplicates concurrent tasks by key.
///
/// While a task for a key is in flight, further calls with that key join it
/// instead of starting another, and all callers observe the same result.
/// Tasks run on their own tokio task, so callers dropping their futures never
/// cancel work others are waiting on.
pub struct CollapsedTaskCreator<T> {
  inner: Arc<Inner<T>>,
}

impl<T> Clone for CollapsedTaskCreator<T> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<T> fmt::Debug for CollapsedTaskCreator<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CollapsedTaskCreator")
      .field("pending", &self.inner.pending.lock().len())
      .field("collapse_window", &self.inner.collapse_window)
      .field("watchdog", &self.inner.watchdog.as_ref().map(|it| it.timeout))
      .finish()
  }
}

impl<T> Default for CollapsedTaskCreator<T>
where
  T: Clone + Send + Sync + 'static,
{
  fn default() -> Self {
    Self::new(Some(DEFAULT_COLLAPSE_WINDOW), None, default_logger())
  }
}

impl<T> CollapsedTaskCreator<T>
where
  T: Clone + Send + Sync + 'static,
{
  /// Creates a task creator.
  ///
  /// - `collapse_window`: an in-flight task older than this is no longer
  ///   joined; the next call starts a fresh one. `None` joins regardless of age.
  /// - `watchdog`: a timeout after which an unsettled task fails with
  ///   [`Error::Timeout`] and is aborted, scheduled on the given `TimerSet`.
  pub fn new(
    collapse_window: Option<Duration>,
    watchdog: Option<(Duration, TimerSet)>,
    logger: Arc<dyn Logger>,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        pending: Mutex::new(AHashMap::new()),
        next_generation: AtomicU64::new(0),
        collapse_window,
        watchdog: watchdog.map(|(timeout, timers)| Watchdog { timeout, timers }),
        logger: ComponentLogger::new(Component::CollapsedTaskCreator, logger),
      }),
    }
  }

  /// Runs `task` under `key`, or joins the task already in flight for it.
  ///
  /// The task is registered before this returns. It is spawned on the tokio
  /// runtime and runs to completion whether or not the returned future is
  /// polled.
  pub fn run<F, Fut>(&self, key: impl Into<String>, task: F) -> CollapsedTask<T>
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let key = key.into();
    let mut pending = self.inner.pending.lock();

    if let Some(existing) = pending.get(&key) {
      let in_window = self
        .inner
        .collapse_window
        .map_or(true, |window| existing.started.elapsed() < window);
      if in_window {
        self.inner.logger.trace("Joining in-flight task.", json!({ "key": key }));
        return existing.task.clone();
      }
      self.inner.logger.debug(
        "In-flight task is past the collapse window, starting another.",
        json!({ "key": key }),
      );
    }

    let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
    let (sender, receiver) = oneshot::channel();
    let aborted_key = key.clone();
    let shared = receiver
      .map(move |received| received.unwrap_or(Err(Error::TaskAborted { key: aborted_key })))
      .boxed()
      .shared();

    // Registered before spawning, so settlement always finds it.
    pending.insert(
      key.clone(),
      Pending {
        generation,
        started: Instant::now(),
        task: shared.clone(),
      },
    );

    let settlement = Arc::new(Settlement {
      inner: self.inner.clone(),
      key: key.clone(),
      generation,
      sender: Mutex::new(Some(sender)),
      watchdog: Mutex::new(None),
    });

    let guard = SettleOnDrop(settlement.clone());
    let handle = tokio::spawn(async move {
      let result = task().await;
      guard.0.settle(result);
    });

    if let Some(watchdog) = &self.inner.watchdog {
      let timeout = watchdog.timeout;
      let abort = handle.abort_handle();
      let on_timeout = settlement.clone();
      let scheduled = watchdog.timers.set_timeout(timeout, move || {
        on_timeout.inner.logger.warn(
          "Task did not settle in time, failing it.",
          json!({
            "key": on_timeout.key,
            "timeout": humantime::format_duration(timeout).to_string(),
          }),
        );
        on_timeout.settle(Err(Error::Timeout {
          key: on_timeout.key.clone(),
          after: timeout,
        }));
        abort.abort();
      });
      match scheduled {
        Ok(timer) => {
          *settlement.watchdog.lock() = Some(timer);
          // The task may have settled before its watchdog was recorded.
          if settlement.sender.lock().is_none() {
            if let Some(timer) = settlement.watchdog.lock().take() {
              watchdog.timers.clear_timeout(timer);
            }
          }
        }
        Err(error) => self.inner.logger.warn(
          "Could not schedule watchdog, task runs unguarded.",
          json!({ "key": key, "error": error.to_string() }),
        ),
      }
    }

    shared
  }

  /// The number of keys with a task in flight.
  pub fn pending_count(&self) -> usize {
    self.inner.pending.lock().len()
  }

  pub fn is_pending(&self, key: &str) -> bool {
    self.inner.pending.lock().contains_key(key)
  }

  /// Waits until no task is in flight, or until `timeout` elapses. Returns
  /// whether the registry drained.
  pub async fn drain(&self, timeout: Option<Duration>) -> bool {
    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    loop {
      if self.pending_count() == 0 {
        return true;
      }
      if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
        return false;
      }
      tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::logger::NoopLogger;
  use std::sync::atomic::AtomicUsize;

  fn creator() -> CollapsedTaskCreator<u32> {
    CollapsedTaskCreator::new(Some(DEFAULT_COLLAPSE_WINDOW), None, Arc::new(NoopLogger))
  }

  #[tokio::test]
  async fn registry_is_empty_after_settlement() {
    let creator = creator();
    let task = creator.run("k", || async { Ok(7) });
    assert!(creator.is_pending("k"));
    assert_eq!(task.await.unwrap(), 7);
    assert_eq!(creator.pending_count(), 0);
  }

  #[tokio::test]
  async fn failure_is_not_replayed() {
    let creator = creator();
    let calls = Arc::new(AtomicUsize::new(0));

    let c = calls.clone();
    let first = creator.run("k", move || async move {
      c.fetch_add(1, Ordering::SeqCst);
      Err(Error::producer("boom"))
    });
    assert!(first.await.is_err());

    let c = calls.clone();
    let second = creator.run("k", move || async move {
      c.fetch_add(1, Ordering::SeqCst);
      Ok(1)
    });
    assert_eq!(second.await.unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  async fn explode() -> Result<u32> {
    panic!("task exploded")
  }

  #[tokio::test]
  async fn panicking_task_settles_as_aborted() {
    let creator = creator();
    let task = creator.run("k", explode);
    let error = task.await.unwrap_err();
    assert!(matches!(error, Error::TaskAborted { ref key } if key == "k"));
    assert_eq!(creator.pending_count(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn expired_window_starts_a_new_task() {
    let creator =
      CollapsedTaskCreator::<u32>::new(Some(Duration::from_millis(100)), None, Arc::new(NoopLogger));

    let slow = creator.run("k", || async {
      tokio::time::sleep(Duration::from_millis(500)).await;
      Ok(1)
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    let fresh = creator.run("k", || async { Ok(2) });

    assert_eq!(fresh.await.unwrap(), 2);
    assert_eq!(slow.await.unwrap(), 1);
    assert_eq!(creator.pending_count(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn watchdog_fails_stuck_tasks_and_frees_the_key() {
    let timers = TimerSet::with_logger(Arc::new(NoopLogger));
    let creator = CollapsedTaskCreator::<u32>::new(
      None,
      Some((Duration::from_millis(50), timers.clone())),
      Arc::new(NoopLogger),
    );

    let stuck = creator.run("k", || std::future::pending());
    let joined = creator.run("k", || async { Ok(99) });

    let error = stuck.await.unwrap_err();
    assert!(error.is_timeout());
    assert!(joined.await.unwrap_err().is_timeout());
    assert!(!creator.is_pending("k"));

    assert_eq!(creator.run("k", || async { Ok(3) }).await.unwrap(), 3);
    assert!(timers.is_empty());
  }
}
