//! Project data access that wraps a CRM backend with identity-scoped caching.

use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CacheError, QueryKey, ScopedCache};
use crate::config::Config;

use super::cache::CrmQueryKey;
use super::client::{CrmBackend, RestBackend};
use super::types::{Identity, Project, ProjectFilter};

/// Project service with transparent caching.
///
/// Every scoped query resolves the caller's identity first and builds its
/// cache key from that identity, so a cached result is only ever returned
/// to the identity it was fetched for.
#[derive(Clone)]
pub struct ProjectService {
  backend: Arc<dyn CrmBackend>,
  cache: ScopedCache,
}

impl ProjectService {
  /// Create a service talking to the configured REST backend.
  pub fn new(config: &Config) -> color_eyre::Result<Self> {
    let backend = RestBackend::new(config)?;
    let cache = ScopedCache::new(config.cache.ttl_policy());
    Ok(Self::with_backend(Arc::new(backend), cache))
  }

  pub fn with_backend(backend: Arc<dyn CrmBackend>, cache: ScopedCache) -> Self {
    Self { backend, cache }
  }

  pub fn cache(&self) -> &ScopedCache {
    &self.cache
  }

  /// Identity of the current session, memoized for the fast TTL.
  pub async fn current_identity(&self) -> Result<Arc<Identity>, CacheError> {
    let backend = Arc::clone(&self.backend);
    self
      .cache
      .get_current_identity(move || async move { backend.current_identity().await })
      .await
  }

  /// Projects visible to the current identity.
  ///
  /// Only the unfiltered list is cached. Filters are applied to it on every
  /// call, so a filtered result is never older than the list it came from.
  pub async fn list_projects(&self, filter: &ProjectFilter) -> Result<Arc<Vec<Project>>, CacheError> {
    let identity = self.current_identity().await?;
    let all = self.all_projects(&identity).await?;

    if filter.is_empty() {
      return Ok(all);
    }

    let matching: Vec<Project> = all.iter().filter(|p| filter.matches(p)).cloned().collect();
    debug!(total = all.len(), matching = matching.len(), "project list filtered");
    Ok(Arc::new(matching))
  }

  async fn all_projects(&self, identity: &Arc<Identity>) -> Result<Arc<Vec<Project>>, CacheError> {
    let backend = Arc::clone(&self.backend);
    let identity = Arc::clone(identity);
    let query_key = CrmQueryKey::projects(&identity.user_id);

    let result = self
      .cache
      .fetch(&query_key, move || async move { backend.list_projects(&identity).await })
      .await?;

    Ok(result.data)
  }

  /// A single project as seen by the current identity.
  ///
  /// Served from the identity's cached project list when one is live.
  pub async fn get_project(&self, project_id: &str) -> Result<Option<Project>, CacheError> {
    let project_id = require_id(project_id)?;
    let identity = self.current_identity().await?;

    let list_key = CrmQueryKey::projects(&identity.user_id).cache_key();
    if let Some(projects) = self.cache.get::<Vec<Project>>(&list_key) {
      if let Some(project) = projects.iter().find(|p| p.id == project_id) {
        debug!(project_id, "project served from cached list");
        return Ok(Some(project.clone()));
      }
    }

    let backend = Arc::clone(&self.backend);
    let query_key = CrmQueryKey::Project {
      user_id: identity.user_id.clone(),
      project_id: project_id.to_string(),
    };
    let id = project_id.to_string();
    let result = self
      .cache
      .fetch(&query_key, move || async move { backend.get_project(&identity, &id).await })
      .await?;

    Ok(result.data.as_ref().clone())
  }

  /// Whether the current identity may open the project: it owns it, or
  /// has a membership row for it.
  pub async fn has_project_access(&self, project_id: &str) -> Result<bool, CacheError> {
    let project_id = require_id(project_id)?;
    let identity = self.current_identity().await?;

    if let Some(project) = self.get_project(project_id).await? {
      if project.owner_id.as_deref() == Some(identity.user_id.as_str()) {
        return Ok(true);
      }
    }

    let backend = Arc::clone(&self.backend);
    let query_key = CrmQueryKey::ProjectAccess {
      user_id: identity.user_id.clone(),
      project_id: project_id.to_string(),
    };
    let id = project_id.to_string();
    let result = self
      .cache
      .fetch(&query_key, move || async move {
        backend
          .project_access(&identity, &id)
          .await
          .map(|access| access.is_some())
      })
      .await?;

    Ok(*result.data)
  }

  /// Drop every project entry cached for the current identity, leaving
  /// other identities' entries alone.
  pub async fn refresh_projects(&self) -> Result<usize, CacheError> {
    let identity = self.current_identity().await?;
    let user_id = &identity.user_id;

    let mut removed = usize::from(self.cache.remove(&CrmQueryKey::projects(user_id).cache_key()));
    removed += self.cache.invalidate(Some(&CrmQueryKey::project_prefix(user_id)));
    removed += self.cache.invalidate(Some(&CrmQueryKey::access_prefix(user_id)));

    info!(user_id = %user_id, removed, "project cache refreshed");
    Ok(removed)
  }

  /// Forget everything, including the resolved identity. The owning
  /// application calls this on login and logout.
  pub fn on_auth_change(&self) {
    let removed = self.cache.invalidate(None);
    info!(removed, "auth changed, cache cleared");
  }
}

fn require_id(project_id: &str) -> Result<&str, CacheError> {
  let trimmed = project_id.trim();
  if trimmed.is_empty() {
    return Err(CacheError::InvalidKey(
      project_id.to_string(),
      "project id is empty",
    ));
  }
  Ok(trimmed)
}
