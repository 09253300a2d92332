//! Errors surfaced by the cache.

use std::error::Error as StdError;
use std::sync::Arc;

/// Errors returned by [`ScopedCache`](super::ScopedCache) operations.
///
/// Fetch failures are shared between every caller joined on the same
/// upstream call, so the original report is kept behind an `Arc`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
  /// Empty or malformed key, rejected before any fetch.
  #[error("invalid cache key {0:?}: {1}")]
  InvalidKey(String, &'static str),

  /// The fetch function failed. Never cached, never retried.
  #[error("fetch failed: {0}")]
  Fetch(#[source] FetchFailure),

  /// A live entry exists for the key but holds a different type.
  #[error("cached value for {key:?} is not a {expected}")]
  TypeMismatch { key: String, expected: &'static str },

  /// The spawned fetch task panicked or was aborted.
  #[error("fetch task for {key:?} did not complete: {reason}")]
  TaskFailed { key: String, reason: String },
}

impl CacheError {
  /// The upstream report, if this is a fetch failure.
  pub fn fetch_report(&self) -> Option<&color_eyre::Report> {
    match self {
      Self::Fetch(failure) => Some(failure.report()),
      _ => None,
    }
  }
}

/// A fetch function's report, shared by every caller joined on the fetch.
///
/// Displays as the report's outermost message and continues the chain with
/// the report's own causes.
#[derive(Debug, Clone)]
pub struct FetchFailure(Arc<color_eyre::Report>);

impl FetchFailure {
  pub fn new(report: color_eyre::Report) -> Self {
    Self(Arc::new(report))
  }

  pub fn report(&self) -> &color_eyre::Report {
    &self.0
  }

  /// Whether two failures came from the same upstream call.
  pub fn same_fetch(&self, other: &FetchFailure) -> bool {
    Arc::ptr_eq(&self.0, &other.0)
  }
}

impl std::fmt::Display for FetchFailure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    std::fmt::Display::fmt(&**self.0, f)
  }
}

impl StdError for FetchFailure {
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    self.0.source()
  }
}

/// Validate a key before any lookup or fetch.
pub(crate) fn validate_key(key: &str) -> Result<(), CacheError> {
  if key.trim().is_empty() {
    return Err(CacheError::InvalidKey(key.to_string(), "key is empty"));
  }
  if key.chars().any(char::is_control) {
    return Err(CacheError::InvalidKey(
      key.to_string(),
      "key contains control characters",
    ));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use color_eyre::eyre::{eyre, WrapErr};

  #[test]
  fn test_rejects_empty_and_blank_keys() {
    assert!(matches!(validate_key(""), Err(CacheError::InvalidKey(..))));
    assert!(matches!(validate_key("   "), Err(CacheError::InvalidKey(..))));
  }

  #[test]
  fn test_rejects_control_characters() {
    assert!(matches!(
      validate_key("projects:\nuser"),
      Err(CacheError::InvalidKey(..))
    ));
  }

  #[test]
  fn test_accepts_namespaced_key() {
    assert!(validate_key("projects:user-42").is_ok());
  }

  #[test]
  fn test_fetch_report_exposes_original_message() {
    let err = CacheError::Fetch(FetchFailure::new(eyre!("backend unavailable")));
    assert_eq!(
      err.fetch_report().map(|r| r.to_string()),
      Some("backend unavailable".to_string())
    );
  }

  #[test]
  fn test_fetch_error_keeps_upstream_chain() {
    let upstream: Result<(), std::io::Error> = Err(std::io::Error::other("connection reset"));
    let report = upstream.wrap_err("rest/v1/projects failed").unwrap_err();
    let err = CacheError::Fetch(FetchFailure::new(report));

    let mut chain = Vec::new();
    let mut current: Option<&(dyn StdError + 'static)> = Some(&err);
    while let Some(e) = current {
      chain.push(e.to_string());
      current = e.source();
    }

    assert_eq!(
      chain,
      vec![
        "fetch failed: rest/v1/projects failed".to_string(),
        "rest/v1/projects failed".to_string(),
        "connection reset".to_string(),
      ]
    );
  }
}
