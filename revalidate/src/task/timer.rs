use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::logger::{default_logger, Component, ComponentLogger, Logger};

/// How often `close` checks whether all timers have fired.
const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Identifies a timer scheduled on a [`TimerSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

struct State {
  closed: bool,
  timers: AHashMap<u64, JoinHandle<()>>,
}

struct Inner {
  state: Mutex<State>,
  next_id: AtomicU64,
  logger: ComponentLogger,
}

/// Tracks outstanding timers so shutdown can wait for them with a bound.
///
/// Each timer is a tokio task that sleeps, untracks itself, then runs its
/// callback. Cloning a `TimerSet` yields another handle to the same set.
#[derive(Clone)]
pub struct TimerSet {
  inner: Arc<Inner>,
}

impl fmt::Debug for TimerSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.inner.state.lock();
    f.debug_struct("TimerSet")
      .field("pending", &state.timers.len())
      .field("closed", &state.closed)
      .finish()
  }
}

impl Default for TimerSet {
  fn default() -> Self {
    Self::new()
  }
}

impl TimerSet {
  pub fn new() -> Self {
    Self::with_logger(default_logger())
  }

  pub fn with_logger(logger: Arc<dyn Logger>) -> Self {
    Self {
      inner: Arc::new(Inner {
        state: Mutex::new(State {
          closed: false,
          timers: AHashMap::new(),
        }),
        next_id: AtomicU64::new(0),
        logger: ComponentLogger::new(Component::TimerSet, logger),
      }),
    }
  }

  /// Runs `callback` after `delay`, unless cleared first.
  ///
  /// Returns [`Error::Closed`] once [`close`](TimerSet::close) has been called.
  ///
  /// # Panics
  ///
  /// Panics if called outside of a tokio runtime.
  pub fn set_timeout<F>(&self, delay: Duration, callback: F) -> Result<TimerHandle>
  where
    F: FnOnce() + Send + 'static,
  {
    let mut state = self.inner.state.lock();
    if state.closed {
      return Err(Error::Closed);
    }

    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
    let inner = self.inner.clone();
    // The task cannot untrack itself before it is tracked, as it needs the
    // state lock held here.
    let task = tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      inner.state.lock().timers.remove(&id);
      callback();
    });
    state.timers.insert(id, task);
    Ok(TimerHandle(id))
  }

  /// Cancels a timer. Returns `false` if it already fired or was cleared.
  pub fn clear_timeout(&self, handle: TimerHandle) -> bool {
    let task = self.inner.state.lock().timers.remove(&handle.0);
    match task {
      Some(task) => {
        task.abort();
        true
      }
      None => false,
    }
  }

  /// The number of timers that have neither fired nor been cleared.
  pub fn len(&self) -> usize {
    self.inner.state.lock().timers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn is_closed(&self) -> bool {
    self.inner.state.lock().closed
  }

  /// Stops accepting timers and waits for the outstanding ones to fire.
  ///
  /// With a `timeout`, gives up waiting once it elapses: remaining timers are
  /// detached, still firing later, and `close` returns. Calling `close` again
  /// is harmless.
  pub async fn close(&self, timeout: Option<Duration>) {
    self.inner.state.lock().closed = true;
    let deadline = timeout.map(|timeout| Instant::now() + timeout);

    loop {
      if self.is_empty() {
        return;
      }
      if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
        let detached: Vec<_> = self.inner.state.lock().timers.drain().collect();
        self.inner.logger.warn(
          "Timers still pending at close, detaching them.",
          json!({ "pending": detached.len() }),
        );
        // Dropping a `JoinHandle` detaches its task without cancelling it.
        drop(detached);
        return;
      }
      tokio::time::sleep(CLOSE_POLL_INTERVAL).await;
    }
  }
}
