//! Identity-scoped TTL caching and project data access for a CRM backend.
//!
//! This crate provides:
//! - [`cache::ScopedCache`], a time-bound cache with in-flight coalescing
//! - [`crm::ProjectService`], project queries scoped to the caller's identity
//! - Configuration and logging setup for the command-line front end

pub mod cache;
pub mod config;
pub mod crm;
pub mod logging;

pub use cache::{CacheError, ScopedCache, TtlClass, TtlPolicy};
pub use config::Config;
pub use crm::ProjectService;
