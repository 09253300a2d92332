//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Freshness class of a key namespace.
///
/// Every namespace picks exactly one class when its key type is defined;
/// the class never changes for the lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtlClass {
  /// Relatively stable data such as project lists
  Standard,
  /// Session and identity lookups that may change between requests
  Fast,
}

/// Durations assigned to each [`TtlClass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
  pub standard: Duration,
  pub fast: Duration,
}

impl TtlPolicy {
  pub fn new(standard: Duration, fast: Duration) -> Self {
    Self { standard, fast }
  }

  /// Maximum age of an entry in the given class.
  pub fn ttl(&self, class: TtlClass) -> Duration {
    match class {
      TtlClass::Standard => self.standard,
      TtlClass::Fast => self.fast,
    }
  }
}

impl Default for TtlPolicy {
  fn default() -> Self {
    Self {
      standard: Duration::from_secs(5 * 60),
      fast: Duration::from_secs(30),
    }
  }
}

/// Semantic identity of a cached query.
///
/// Implementors build deterministic keys; scoped queries must embed the
/// identity they were resolved for so entries never cross identities.
pub trait QueryKey {
  /// Deterministic cache key (e.g., "projects:user-42")
  fn cache_key(&self) -> String;

  /// TTL class fixed by the key's namespace
  fn ttl_class(&self) -> TtlClass;

  /// Human readable description for logs
  fn description(&self) -> String;
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug)]
pub struct CacheResult<T> {
  /// The actual data, shared with every other caller that got this entry
  pub data: Arc<T>,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was stored (if served from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Data produced by a fetch started for this call.
  pub fn from_network(data: Arc<T>) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Data served from a live entry.
  pub fn from_cache(data: Arc<T>, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Data produced by a fetch another caller had already started.
  pub fn coalesced(data: Arc<T>) -> Self {
    Self {
      data,
      source: CacheSource::Coalesced,
      cached_at: None,
    }
  }
}

impl<T> Clone for CacheResult<T> {
  fn clone(&self) -> Self {
    Self {
      data: Arc::clone(&self.data),
      source: self.source,
      cached_at: self.cached_at,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from the upstream fetch started by this call
  Network,
  /// Live cached entry, no upstream call
  Cache,
  /// Joined an upstream fetch already in flight for the same key
  Coalesced,
}

/// Counters describing cache activity since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
  pub entries: usize,
  pub in_flight: usize,
  pub hits: u64,
  pub misses: u64,
  pub coalesced: u64,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_policy_fast_is_shorter() {
    let policy = TtlPolicy::default();
    assert!(policy.ttl(TtlClass::Fast) < policy.ttl(TtlClass::Standard));
  }

  #[test]
  fn test_ttl_class_deserializes_lowercase() {
    let class: TtlClass = serde_yaml::from_str("fast").unwrap();
    assert_eq!(class, TtlClass::Fast);
  }
}
