use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::crm::types::{Identity, Project, ProjectAccess};

const PROJECT_COLUMNS: &str = "id,name,status,client_name,owner_id,created_at,updated_at";

/// Remote data source behind the project cache.
///
/// Every call is made on behalf of the session the backend was built with;
/// scoped calls also take the resolved identity so results can be filtered
/// per user.
#[async_trait]
pub trait CrmBackend: Send + Sync {
  /// Resolve the identity of the authenticated session
  async fn current_identity(&self) -> Result<Identity>;

  /// Projects visible to `identity`
  async fn list_projects(&self, identity: &Identity) -> Result<Vec<Project>>;

  /// A single project, if visible to `identity`
  async fn get_project(&self, identity: &Identity, project_id: &str) -> Result<Option<Project>>;

  /// Membership row for `identity` in the project, if any
  async fn project_access(&self, identity: &Identity, project_id: &str) -> Result<Option<ProjectAccess>>;
}

/// Supabase-style REST backend
#[derive(Clone)]
pub struct RestBackend {
  client: reqwest::Client,
  base_url: Url,
}

impl RestBackend {
  pub fn new(config: &Config) -> Result<Self> {
    let api_key = Config::get_api_key()?;
    let access_token = Config::get_access_token()?;
    Self::with_credentials(
      &config.backend.url,
      &api_key,
      &access_token,
      Duration::from_secs(config.backend.timeout_secs),
    )
  }

  pub fn with_credentials(url: &str, api_key: &str, access_token: &str, timeout: Duration) -> Result<Self> {
    // Without the trailing slash, Url::join would replace the last path segment
    let normalized = format!("{}/", url.trim_end_matches('/'));
    let base_url = Url::parse(&normalized).map_err(|e| eyre!("Invalid backend URL {}: {}", url, e))?;

    let mut headers = HeaderMap::new();
    headers.insert(
      "apikey",
      HeaderValue::from_str(api_key).map_err(|e| eyre!("Invalid API key header: {}", e))?,
    );
    let mut bearer = HeaderValue::from_str(&format!("Bearer {}", access_token))
      .map_err(|e| eyre!("Invalid access token header: {}", e))?;
    bearer.set_sensitive(true);
    headers.insert(AUTHORIZATION, bearer);

    let client = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, base_url })
  }

  fn endpoint(&self, path: &str) -> Result<Url> {
    self
      .base_url
      .join(path)
      .map_err(|e| eyre!("Invalid endpoint {}: {}", path, e))
  }

  async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
    let url = self.endpoint(path)?;
    debug!(%url, ?query, "backend request");

    let response = self
      .client
      .get(url)
      .query(query)
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", path, e))?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(eyre!("{} returned {}: {}", path, status, body.trim()));
    }

    response
      .json::<T>()
      .await
      .map_err(|e| eyre!("Failed to parse response from {}: {}", path, e))
  }
}

#[async_trait]
impl CrmBackend for RestBackend {
  async fn current_identity(&self) -> Result<Identity> {
    self.get_json("auth/v1/user", &[]).await
  }

  async fn list_projects(&self, _identity: &Identity) -> Result<Vec<Project>> {
    // Row level security narrows the list to the session's user
    self
      .get_json(
        "rest/v1/projects",
        &[
          ("select", PROJECT_COLUMNS.to_string()),
          ("order", "updated_at.desc.nullslast".to_string()),
        ],
      )
      .await
  }

  async fn get_project(&self, _identity: &Identity, project_id: &str) -> Result<Option<Project>> {
    let rows: Vec<Project> = self
      .get_json(
        "rest/v1/projects",
        &[
          ("select", PROJECT_COLUMNS.to_string()),
          ("id", format!("eq.{}", project_id)),
          ("limit", "1".to_string()),
        ],
      )
      .await?;
    Ok(rows.into_iter().next())
  }

  async fn project_access(&self, identity: &Identity, project_id: &str) -> Result<Option<ProjectAccess>> {
    let rows: Vec<ProjectAccess> = self
      .get_json(
        "rest/v1/project_members",
        &[
          ("select", "project_id,user_id,role".to_string()),
          ("project_id", format!("eq.{}", project_id)),
          ("user_id", format!("eq.{}", identity.user_id)),
          ("limit", "1".to_string()),
        ],
      )
      .await?;
    Ok(rows.into_iter().next())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use wiremock::matchers::{header, method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn backend(server: &MockServer) -> RestBackend {
    RestBackend::with_credentials(&server.uri(), "anon-key", "session-token", Duration::from_secs(5)).unwrap()
  }

  fn identity() -> Identity {
    Identity {
      user_id: "user-42".to_string(),
      email: Some("ana@example.com".to_string()),
    }
  }

  #[tokio::test]
  async fn test_current_identity_sends_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/auth/v1/user"))
      .and(header("apikey", "anon-key"))
      .and(header("authorization", "Bearer session-token"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "id": "user-42",
        "email": "ana@example.com"
      })))
      .expect(1)
      .mount(&server)
      .await;

    let identity = backend(&server).current_identity().await.unwrap();
    assert_eq!(identity.user_id, "user-42");
  }

  #[tokio::test]
  async fn test_list_projects_parses_rows() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/rest/v1/projects"))
      .and(query_param("select", PROJECT_COLUMNS))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
        {
          "id": "p1",
          "name": "Kitchen remodel",
          "status": "active",
          "client_name": "Acme",
          "owner_id": "user-42",
          "created_at": "2024-03-01T10:00:00Z",
          "updated_at": "2024-03-02T10:00:00Z"
        }
      ])))
      .mount(&server)
      .await;

    let projects = backend(&server).list_projects(&identity()).await.unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].id, "p1");
  }

  #[tokio::test]
  async fn test_project_access_filters_by_user() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/rest/v1/project_members"))
      .and(query_param("project_id", "eq.p1"))
      .and(query_param("user_id", "eq.user-42"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
      .mount(&server)
      .await;

    let access = backend(&server).project_access(&identity(), "p1").await.unwrap();
    assert!(access.is_none());
  }

  #[tokio::test]
  async fn test_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/auth/v1/user"))
      .respond_with(ResponseTemplate::new(401).set_body_string("invalid JWT"))
      .mount(&server)
      .await;

    let err = backend(&server).current_identity().await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("401"), "{}", message);
    assert!(message.contains("invalid JWT"), "{}", message);
  }
}
