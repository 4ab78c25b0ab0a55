//! The storage abstraction and its reference implementation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::entry::Entry;
use crate::error::Result;
use crate::normalize::NormalizedParams;

pub mod memory;

pub use memory::MemoryStore;

/// Persists and retrieves entries, keyed by id and variant.
///
/// Implementations must be safe to call concurrently. A store may return
/// variants that do not match the request's params; the cache filters them
/// again. It must never return an entry stored under a different id.
pub trait Store<C>: Send + Sync {
  /// Returns the variants stored under `id`, ideally only those matching
  /// `params`. An unknown id yields an empty list, not an error.
  fn get<'a>(
    &'a self,
    id: &'a str,
    params: &'a NormalizedParams,
  ) -> BoxFuture<'a, Result<Vec<Arc<Entry<C>>>>>;

  /// Upserts an entry, replacing any entry under the same id with the same
  /// variant key. `store_for` bounds how long the entry should be kept; `None`
  /// leaves retention to the store.
  fn set<'a>(&'a self, entry: Arc<Entry<C>>, store_for: Option<Duration>) -> BoxFuture<'a, Result<()>>;

  /// Removes every variant under `id`.
  fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>>;

  /// Releases any resources, waiting at most `timeout` for pending work.
  fn close<'a>(&'a self, _timeout: Option<Duration>) -> BoxFuture<'a, Result<()>> {
    Box::pin(async { Ok(()) })
  }
}

/// Describes the reason an entry was removed from a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
  /// The entry outlived its retention bound.
  Expired,
  /// A newer entry with the same variant key took its place.
  Replaced,
  /// The entry's id was explicitly invalidated.
  Invalidated,
}

impl fmt::Display for EvictionReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EvictionReason::Expired => write!(f, "expired"),
      EvictionReason::Replaced => write!(f, "replaced by a newer variant"),
      EvictionReason::Invalidated => write!(f, "manually invalidated"),
    }
  }
}

/// Receives entries removed from a store.
///
/// Called after the store has released its internal locks, so it may call
/// back into the store.
pub trait EvictionListener<C>: Send + Sync {
  fn on_evict(&self, entry: Arc<Entry<C>>, reason: EvictionReason);
}

impl<C, F> EvictionListener<C> for F
where
  F: Fn(Arc<Entry<C>>, EvictionReason) + Send + Sync,
{
  fn on_evict(&self, entry: Arc<Entry<C>>, reason: EvictionReason) {
    self(entry, reason)
  }
}
