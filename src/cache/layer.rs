//! Cache layer that orchestrates caching logic with upstream fetching.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::debug;

use super::error::{validate_key, CacheError, FetchFailure};
use super::storage::{CacheStorage, CachedValue, SharedFetch};
use super::traits::{CacheResult, CacheStats, QueryKey, TtlClass, TtlPolicy};

/// Fixed key under which the caller's identity is memoized.
pub const CURRENT_IDENTITY_KEY: &str = "current-identity";

/// Time-bound cache for identity-scoped read queries.
///
/// This layer sits between callers and a remote data source. Results are
/// memoized per key for the TTL of the key's class, concurrent misses for
/// the same key share one upstream call, and failures are never stored.
///
/// Cloning is cheap and every clone shares the same entries, so construct
/// one per application session and hand clones to whoever needs it.
pub struct ScopedCache {
  storage: Arc<Mutex<CacheStorage>>,
  policy: TtlPolicy,
}

impl ScopedCache {
  /// Create an empty cache with the given TTL durations.
  pub fn new(policy: TtlPolicy) -> Self {
    Self {
      storage: Arc::new(Mutex::new(CacheStorage::default())),
      policy,
    }
  }

  pub fn policy(&self) -> TtlPolicy {
    self.policy
  }

  fn lock(&self) -> MutexGuard<'_, CacheStorage> {
    // No critical section can panic half-way, so a poisoned map is still consistent.
    self.storage.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Return the cached value for `key`, or run `fetcher` and cache its result.
  pub async fn get_or_fetch<T, F, Fut>(
    &self,
    key: &str,
    ttl_class: TtlClass,
    fetcher: F,
  ) -> Result<Arc<T>, CacheError>
  where
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = color_eyre::Result<T>> + Send + 'static,
  {
    self
      .fetch_with_source(key, ttl_class, fetcher)
      .await
      .map(|result| result.data)
  }

  /// Same as [`get_or_fetch`](Self::get_or_fetch) but keyed by a [`QueryKey`].
  pub async fn fetch<T, K, F, Fut>(&self, query: &K, fetcher: F) -> Result<CacheResult<T>, CacheError>
  where
    T: Send + Sync + 'static,
    K: QueryKey,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = color_eyre::Result<T>> + Send + 'static,
  {
    debug!(query = %query.description(), "cache lookup");
    self
      .fetch_with_source(&query.cache_key(), query.ttl_class(), fetcher)
      .await
  }

  /// Cache-first lookup that also reports where the value came from.
  ///
  /// 1. A live entry is returned without calling `fetcher`
  /// 2. A fetch already in flight for `key` is joined
  /// 3. Otherwise `fetcher` is called and awaited in its own task; a
  ///    successful result is stored unless `key` was invalidated while it ran
  ///
  /// The fetch task outlives the caller, so dropping this future does not
  /// cancel the upstream call.
  pub async fn fetch_with_source<T, F, Fut>(
    &self,
    key: &str,
    ttl_class: TtlClass,
    fetcher: F,
  ) -> Result<CacheResult<T>, CacheError>
  where
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = color_eyre::Result<T>> + Send + 'static,
  {
    validate_key(key)?;

    let (pending, coalesced) = {
      let mut storage = self.lock();

      if let Some(entry) = storage.live_entry(key, Instant::now(), &self.policy) {
        let value = Arc::clone(&entry.value);
        let cached_at = entry.cached_at;
        storage.record_hit();
        debug!(key, "cache hit");
        return downcast::<T>(key, value).map(|data| CacheResult::from_cache(data, cached_at));
      }

      if let Some(pending) = storage.in_flight(key) {
        storage.record_coalesced();
        debug!(key, "joining in-flight fetch");
        (pending, true)
      } else {
        storage.record_miss();
        let id = storage.next_fetch_id();
        debug!(key, ?ttl_class, fetch_id = id, "cache miss, fetching");
        let pending = self.spawn_fetch(key, id, ttl_class, fetcher);
        storage.register_in_flight(key, id, pending.clone());
        (pending, false)
      }
    };

    let data = downcast::<T>(key, pending.await?)?;
    Ok(if coalesced {
      CacheResult::coalesced(data)
    } else {
      CacheResult::from_network(data)
    })
  }

  fn spawn_fetch<T, F, Fut>(&self, key: &str, id: u64, ttl_class: TtlClass, fetcher: F) -> SharedFetch
  where
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = color_eyre::Result<T>> + Send + 'static,
  {
    let guard = InFlightGuard {
      storage: Arc::clone(&self.storage),
      key: key.to_string(),
      id,
    };

    let handle = tokio::spawn(async move {
      match fetcher().await {
        Ok(value) => {
          let value: CachedValue = Arc::new(value);
          let stored = guard.lock().complete_fetch(&guard.key, id, Arc::clone(&value), ttl_class);
          if !stored {
            debug!(key = %guard.key, fetch_id = id, "key invalidated during fetch, result not cached");
          }
          Ok(value)
        }
        Err(report) => {
          debug!(key = %guard.key, fetch_id = id, error = %report, "fetch failed");
          Err(CacheError::Fetch(FetchFailure::new(report)))
        }
      }
    });

    let key = key.to_string();
    async move {
      match handle.await {
        Ok(result) => result,
        Err(join_err) => Err(CacheError::TaskFailed {
          key,
          reason: join_err.to_string(),
        }),
      }
    }
    .boxed()
    .shared()
  }

  /// Peek at a live entry without fetching.
  pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
    let mut storage = self.lock();
    let entry = storage.live_entry(key, Instant::now(), &self.policy)?;
    Arc::clone(&entry.value).downcast::<T>().ok()
  }

  /// Clear every entry, or only entries whose key starts with `prefix`.
  ///
  /// Fetches in flight for cleared keys keep running for the callers
  /// already waiting on them, but their results are not stored.
  pub fn invalidate(&self, prefix: Option<&str>) -> usize {
    let removed = self.lock().invalidate(prefix);
    debug!(prefix = prefix.unwrap_or("*"), removed, "cache invalidated");
    removed
  }

  /// Clear exactly one key. Returns whether an entry was cached for it.
  pub fn remove(&self, key: &str) -> bool {
    let removed = self.lock().remove(key);
    debug!(key, removed, "cache entry removed");
    removed
  }

  /// Resolve the caller's identity, memoized under the fast TTL class.
  pub async fn get_current_identity<I, F, Fut>(&self, resolve: F) -> Result<Arc<I>, CacheError>
  where
    I: Send + Sync + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = color_eyre::Result<I>> + Send + 'static,
  {
    self
      .get_or_fetch(CURRENT_IDENTITY_KEY, TtlClass::Fast, resolve)
      .await
  }

  /// Drop expired entries. Lookups evict lazily, this is for housekeeping.
  pub fn prune_expired(&self) -> usize {
    self.lock().prune_expired(Instant::now(), &self.policy)
  }

  pub fn stats(&self) -> CacheStats {
    self.lock().stats()
  }
}

impl Clone for ScopedCache {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      policy: self.policy,
    }
  }
}

impl Default for ScopedCache {
  fn default() -> Self {
    Self::new(TtlPolicy::default())
  }
}

fn downcast<T: Send + Sync + 'static>(key: &str, value: CachedValue) -> Result<Arc<T>, CacheError> {
  let value: Arc<dyn Any + Send + Sync> = value;
  value.downcast::<T>().map_err(|_| CacheError::TypeMismatch {
    key: key.to_string(),
    expected: std::any::type_name::<T>(),
  })
}

/// Releases a fetch's in-flight slot when its task ends, including on panic.
struct InFlightGuard {
  storage: Arc<Mutex<CacheStorage>>,
  key: String,
  id: u64,
}

impl InFlightGuard {
  fn lock(&self) -> MutexGuard<'_, CacheStorage> {
    self.storage.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl Drop for InFlightGuard {
  fn drop(&mut self) {
    self.lock().release_in_flight(&self.key, self.id);
  }
}
