//! Identity-scoped, time-bound caching for remote read queries.
//!
//! This module provides a backend-agnostic caching mechanism that:
//! - Memoizes query results per key for the TTL of the key's class
//! - Coalesces concurrent misses for the same key into one upstream call
//! - Never stores failed fetches
//! - Supports whole-cache and key-prefix invalidation (e.g. on auth change)

mod error;
mod layer;
mod storage;
mod traits;

pub use error::{CacheError, FetchFailure};
pub use layer::{ScopedCache, CURRENT_IDENTITY_KEY};
pub use storage::CacheEntry;
pub use traits::{CacheResult, CacheSource, CacheStats, QueryKey, TtlClass, TtlPolicy};
