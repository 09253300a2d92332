//! In-memory entry map and in-flight fetch registry.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use std::any::Any;
use std::collections::HashMap;
use tokio::time::Instant;

use super::error::CacheError;
use super::traits::{CacheStats, TtlClass, TtlPolicy};

/// Type-erased cached payload. Callers downcast back to their own type.
pub(crate) type CachedValue = std::sync::Arc<dyn Any + Send + Sync>;

/// Pending upstream call that any number of callers can await.
pub(crate) type SharedFetch = Shared<BoxFuture<'static, Result<CachedValue, CacheError>>>;

/// A single cached value.
#[derive(Clone)]
pub struct CacheEntry {
  pub key: String,
  pub(crate) value: CachedValue,
  /// Monotonic store time used for expiry
  pub stored_at: Instant,
  /// Wall-clock store time reported to callers
  pub cached_at: DateTime<Utc>,
  pub ttl_class: TtlClass,
}

impl CacheEntry {
  /// An entry is live while `now - stored_at < ttl` for its class.
  pub fn is_live(&self, now: Instant, policy: &TtlPolicy) -> bool {
    now.saturating_duration_since(self.stored_at) < policy.ttl(self.ttl_class)
  }
}

impl std::fmt::Debug for CacheEntry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CacheEntry")
      .field("key", &self.key)
      .field("cached_at", &self.cached_at)
      .field("ttl_class", &self.ttl_class)
      .finish_non_exhaustive()
  }
}

pub(crate) struct InFlight {
  pub id: u64,
  pub future: SharedFetch,
}

/// Shared mutable state of the cache. Only the cache layer touches it,
/// always under its mutex and never across an await point.
#[derive(Default)]
pub(crate) struct CacheStorage {
  entries: HashMap<String, CacheEntry>,
  in_flight: HashMap<String, InFlight>,
  next_fetch_id: u64,
  hits: u64,
  misses: u64,
  coalesced: u64,
}

impl CacheStorage {
  /// Return the live entry for `key`, evicting it first if it has expired.
  pub fn live_entry(&mut self, key: &str, now: Instant, policy: &TtlPolicy) -> Option<&CacheEntry> {
    let live = self.entries.get(key)?.is_live(now, policy);
    if !live {
      self.entries.remove(key);
      return None;
    }
    self.entries.get(key)
  }

  pub fn in_flight(&self, key: &str) -> Option<SharedFetch> {
    self.in_flight.get(key).map(|f| f.future.clone())
  }

  pub fn next_fetch_id(&mut self) -> u64 {
    self.next_fetch_id += 1;
    self.next_fetch_id
  }

  pub fn register_in_flight(&mut self, key: &str, id: u64, future: SharedFetch) {
    self.in_flight.insert(key.to_string(), InFlight { id, future });
  }

  /// Store a fetched value if the fetch `id` still owns the key's in-flight
  /// slot. Returns false when an invalidation detached the fetch meanwhile.
  pub fn complete_fetch(&mut self, key: &str, id: u64, value: CachedValue, ttl_class: TtlClass) -> bool {
    if !self.release_in_flight(key, id) {
      return false;
    }
    self.entries.insert(
      key.to_string(),
      CacheEntry {
        key: key.to_string(),
        value,
        stored_at: Instant::now(),
        cached_at: Utc::now(),
        ttl_class,
      },
    );
    true
  }

  /// Drop the in-flight registration for `key` if it belongs to fetch `id`.
  pub fn release_in_flight(&mut self, key: &str, id: u64) -> bool {
    match self.in_flight.get(key) {
      Some(f) if f.id == id => {
        self.in_flight.remove(key);
        true
      }
      _ => false,
    }
  }

  /// Remove entries (and detach in-flight fetches) whose key starts with
  /// `prefix`, or everything when no prefix is given.
  pub fn invalidate(&mut self, prefix: Option<&str>) -> usize {
    let before = self.entries.len();
    match prefix {
      None => {
        self.entries.clear();
        self.in_flight.clear();
      }
      Some(p) => {
        self.entries.retain(|k, _| !k.starts_with(p));
        self.in_flight.retain(|k, _| !k.starts_with(p));
      }
    }
    before - self.entries.len()
  }

  /// Remove the entry for exactly `key` and detach its in-flight fetch.
  pub fn remove(&mut self, key: &str) -> bool {
    self.in_flight.remove(key);
    self.entries.remove(key).is_some()
  }

  pub fn prune_expired(&mut self, now: Instant, policy: &TtlPolicy) -> usize {
    let before = self.entries.len();
    self.entries.retain(|_, e| e.is_live(now, policy));
    before - self.entries.len()
  }

  pub fn record_hit(&mut self) {
    self.hits += 1;
  }

  pub fn record_miss(&mut self) {
    self.misses += 1;
  }

  pub fn record_coalesced(&mut self) {
    self.coalesced += 1;
  }

  pub fn stats(&self) -> CacheStats {
    CacheStats {
      entries: self.entries.len(),
      in_flight: self.in_flight.len(),
      hits: self.hits,
      misses: self.misses,
      coalesced: self.coalesced,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::time::Duration;

  fn value(n: u32) -> CachedValue {
    Arc::new(n)
  }

  fn pending() -> SharedFetch {
    let fut: BoxFuture<'static, Result<CachedValue, CacheError>> = Box::pin(async { Ok(value(0)) });
    futures::FutureExt::shared(fut)
  }

  #[test]
  fn test_entry_liveness_is_strict() {
    let policy = TtlPolicy::new(Duration::from_secs(10), Duration::from_secs(1));
    let stored_at = Instant::now();
    let entry = CacheEntry {
      key: "k".into(),
      value: value(1),
      stored_at,
      cached_at: Utc::now(),
      ttl_class: TtlClass::Fast,
    };
    assert!(entry.is_live(stored_at + Duration::from_millis(999), &policy));
    assert!(!entry.is_live(stored_at + Duration::from_secs(1), &policy));
  }

  #[test]
  fn test_complete_fetch_requires_current_registration() {
    let mut storage = CacheStorage::default();
    let id = storage.next_fetch_id();
    storage.register_in_flight("projects:a", id, pending());

    assert_eq!(storage.invalidate(Some("projects:")), 0);
    assert!(!storage.complete_fetch("projects:a", id, value(1), TtlClass::Standard));
    assert_eq!(storage.stats().entries, 0);
  }

  #[test]
  fn test_invalidate_prefix_counts_removed_entries() {
    let mut storage = CacheStorage::default();
    for key in ["projects:a", "projects:b", "access:a:1"] {
      let id = storage.next_fetch_id();
      storage.register_in_flight(key, id, pending());
      assert!(storage.complete_fetch(key, id, value(0), TtlClass::Standard));
    }

    assert_eq!(storage.invalidate(Some("projects:")), 2);
    assert_eq!(storage.stats().entries, 1);
    assert_eq!(storage.invalidate(None), 1);
  }
}
