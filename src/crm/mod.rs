//! Scoped project data access for the CRM backend.

mod cache;
mod cached_client;
mod client;
mod types;

pub use cache::CrmQueryKey;
pub use cached_client::ProjectService;
pub use client::{CrmBackend, RestBackend};
pub use types::{Identity, Project, ProjectAccess, ProjectFilter, ProjectStatus};
