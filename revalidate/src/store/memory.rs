use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::json;

use crate::entry::Entry;
use crate::error::Result;
use crate::logger::{default_logger, Component, ComponentLogger, Logger};
use crate::normalize::{request_variant_key_for_vary_keys, NormalizedParams, VaryKeys};
use crate::store::{EvictionListener, EvictionReason, Store};
use crate::time::{add_duration, default_clock, Clock};

/// How long an entry with no retention bound is kept.
pub const DEFAULT_FALLBACK_DELETE_AFTER: Duration = Duration::from_secs(60 * 60);

struct StoredVariant<C> {
  variant_key: String,
  entry: Arc<Entry<C>>,
  expires_at: DateTime<Utc>,
}

/// All variants stored under one id.
struct Slot<C> {
  // Every distinct vary-name set seen under this id. Lookups compute one
  // candidate variant key per set.
  vary_keys: Vec<VaryKeys>,
  variants: Vec<StoredVariant<C>>,
}

impl<C> Default for Slot<C> {
  fn default() -> Self {
    Slot {
      vary_keys: Vec::new(),
      variants: Vec::new(),
    }
  }
}

impl<C> Slot<C> {
  /// Removes expired variants, returning them.
  fn drain_expired(&mut self, now: DateTime<Utc>) -> Vec<Arc<Entry<C>>> {
    let mut expired = Vec::new();
    self.variants.retain(|variant| {
      if variant.expires_at <= now {
        expired.push(variant.entry.clone());
        false
      } else {
        true
      }
    });
    if !expired.is_empty() {
      let variants = &self.variants;
      self
        .vary_keys
        .retain(|keys| variants.iter().any(|it| it.entry.vary.keys() == *keys));
    }
    expired
  }
}

/// An in-process [`Store`] backed by a hash map of small variant lists.
///
/// Entries are kept for their retention bound, or `fallback_delete_after`
/// when none is given. Expired entries are dropped lazily on lookup, or all
/// at once by [`purge_expired`](MemoryStore::purge_expired).
pub struct MemoryStore<C> {
  slots: RwLock<AHashMap<String, Slot<C>>>,
  clock: Arc<dyn Clock>,
  fallback_delete_after: Duration,
  listener: Option<Arc<dyn EvictionListener<C>>>,
  logger: ComponentLogger,
}

impl<C> fmt::Debug for MemoryStore<C> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MemoryStore")
      .field("ids", &self.slots.read().len())
      .field("fallback_delete_after", &self.fallback_delete_after)
      .field("has_listener", &self.listener.is_some())
      .finish()
  }
}

impl<C> Default for MemoryStore<C> {
  fn default() -> Self {
    Self::new()
  }
}

impl<C> MemoryStore<C> {
  pub fn new() -> Self {
    Self {
      slots: RwLock::new(AHashMap::new()),
      clock: default_clock(),
      fallback_delete_after: DEFAULT_FALLBACK_DELETE_AFTER,
      listener: None,
      logger: ComponentLogger::new(Component::MemoryStore, default_logger()),
    }
  }

  /// Sets how long entries without a retention bound are kept.
  pub fn fallback_delete_after(mut self, after: Duration) -> Self {
    self.fallback_delete_after = after;
    self
  }

  /// Sets the clock that decides expiry. Share it with the cache.
  pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
    self.logger = ComponentLogger::new(Component::MemoryStore, logger);
    self
  }

  /// Registers a listener notified of every removed entry.
  pub fn eviction_listener(mut self, listener: impl EvictionListener<C> + 'static) -> Self {
    self.listener = Some(Arc::new(listener));
    self
  }

  /// The number of variants held, expired ones included.
  pub fn len(&self) -> usize {
    self.slots.read().values().map(|slot| slot.variants.len()).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Drops every expired variant. Returns how many were dropped.
  pub fn purge_expired(&self) -> usize {
    let now = self.clock.now();
    let mut expired = Vec::new();
    {
      let mut slots = self.slots.write();
      slots.retain(|_, slot| {
        expired.extend(slot.drain_expired(now));
        !slot.variants.is_empty()
      });
    }
    let count = expired.len();
    self.notify(expired, EvictionReason::Expired);
    count
  }

  fn notify(&self, entries: Vec<Arc<Entry<C>>>, reason: EvictionReason) {
    if let Some(listener) = &self.listener {
      for entry in entries {
        listener.on_evict(entry, reason);
      }
    }
  }

  fn lookup(&self, id: &str, params: &NormalizedParams) -> Vec<Arc<Entry<C>>> {
    let now = self.clock.now();
    let (found, expired) = {
      let mut slots = self.slots.write();
      let Some(slot) = slots.get_mut(id) else {
        return Vec::new();
      };
      let expired = slot.drain_expired(now);
      let found: Vec<_> = slot
        .vary_keys
        .iter()
        .filter_map(|keys| {
          let key = request_variant_key_for_vary_keys(keys, params);
          slot
            .variants
            .iter()
            .find(|variant| variant.variant_key == key)
            .map(|variant| variant.entry.clone())
        })
        .collect();
      if slot.variants.is_empty() {
        slots.remove(id);
      }
      (found, expired)
    };
    self.notify(expired, EvictionReason::Expired);
    found
  }

  fn insert(&self, entry: Arc<Entry<C>>, store_for: Option<Duration>) {
    if store_for == Some(Duration::ZERO) {
      self.logger.trace(
        "Entry has no retention, not storing.",
        json!({ "id": entry.id }),
      );
      return;
    }

    let now = self.clock.now();
    let expires_at = add_duration(now, store_for.unwrap_or(self.fallback_delete_after));
    let variant_key = entry.variant_key();
    let vary_keys = entry.vary.keys();

    let replaced = {
      let mut slots = self.slots.write();
      let slot = slots.entry(entry.id.clone()).or_default();
      let replaced = slot
        .variants
        .iter()
        .position(|variant| variant.variant_key == variant_key)
        .map(|index| slot.variants.swap_remove(index).entry);
      if !slot.vary_keys.contains(&vary_keys) {
        slot.vary_keys.push(vary_keys);
      }
      slot.variants.push(StoredVariant {
        variant_key,
        entry,
        expires_at,
      });
      replaced
    };

    if let Some(replaced) = replaced {
      self.notify(vec![replaced], EvictionReason::Replaced);
    }
  }

  fn remove(&self, id: &str) {
    let removed = self.slots.write().remove(id);
    if let Some(slot) = removed {
      self.logger.debug(
        "Invalidated id.",
        json!({ "id": id, "variants": slot.variants.len() }),
      );
      let entries = slot.variants.into_iter().map(|it| it.entry).collect();
      self.notify(entries, EvictionReason::Invalidated);
    }
  }
}

impl<C> Store<C> for MemoryStore<C>
where
  C: Send + Sync + 'static,
{
  fn get<'a>(
    &'a self,
    id: &'a str,
    params: &'a NormalizedParams,
  ) -> BoxFuture<'a, Result<Vec<Arc<Entry<C>>>>> {
    Box::pin(async move { Ok(self.lookup(id, params)) })
  }

  fn set<'a>(&'a self, entry: Arc<Entry<C>>, store_for: Option<Duration>) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      self.insert(entry, store_for);
      Ok(())
    })
  }

  fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      self.remove(id);
      Ok(())
    })
  }

  fn close<'a>(&'a self, _timeout: Option<Duration>) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      self.slots.write().clear();
      Ok(())
    })
  }
}
