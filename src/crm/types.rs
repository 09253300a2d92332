use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Identity {
  #[serde(rename = "id")]
  pub user_id: String,
  #[serde(default)]
  pub email: Option<String>,
}

/// Project lifecycle status
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum ProjectStatus {
  Planning,
  Active,
  OnHold,
  Completed,
  Cancelled,
  /// Any status the backend knows about but we don't
  Other(String),
}

impl ProjectStatus {
  pub fn as_str(&self) -> &str {
    match self {
      Self::Planning => "planning",
      Self::Active => "active",
      Self::OnHold => "on_hold",
      Self::Completed => "completed",
      Self::Cancelled => "cancelled",
      Self::Other(s) => s,
    }
  }
}

impl From<&str> for ProjectStatus {
  fn from(s: &str) -> Self {
    match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
      "planning" => Self::Planning,
      "active" | "in_progress" => Self::Active,
      "on_hold" | "paused" => Self::OnHold,
      "completed" | "done" => Self::Completed,
      "cancelled" | "canceled" => Self::Cancelled,
      _ => Self::Other(s.to_string()),
    }
  }
}

impl From<ProjectStatus> for String {
  fn from(status: ProjectStatus) -> Self {
    status.as_str().to_string()
  }
}

impl<'de> Deserialize<'de> for ProjectStatus {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: serde::Deserializer<'de>,
  {
    let s = String::deserialize(deserializer)?;
    Ok(Self::from(s.as_str()))
  }
}

impl std::fmt::Display for ProjectStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Project row as returned by the backend
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Project {
  pub id: String,
  pub name: String,
  pub status: ProjectStatus,
  #[serde(default)]
  pub client_name: Option<String>,
  #[serde(default)]
  pub owner_id: Option<String>,
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub updated_at: Option<DateTime<Utc>>,
}

/// Membership of a user in a project
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProjectAccess {
  pub project_id: String,
  pub user_id: String,
  #[serde(default)]
  pub role: Option<String>,
}

/// Client-side narrowing of a project list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectFilter {
  pub status: Option<ProjectStatus>,
  /// Case-insensitive match on project or client name
  pub search: Option<String>,
}

impl ProjectFilter {
  pub fn is_empty(&self) -> bool {
    self.status.is_none() && self.search.as_deref().map_or(true, |s| s.trim().is_empty())
  }

  pub fn matches(&self, project: &Project) -> bool {
    if let Some(status) = &self.status {
      if &project.status != status {
        return false;
      }
    }

    match self.search.as_deref().map(|s| s.trim().to_lowercase()) {
      Some(needle) if !needle.is_empty() => {
        project.name.to_lowercase().contains(&needle)
          || project
            .client_name
            .as_deref()
            .is_some_and(|c| c.to_lowercase().contains(&needle))
      }
      _ => true,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn project(name: &str, status: &str, client: Option<&str>) -> Project {
    Project {
      id: name.to_lowercase(),
      name: name.to_string(),
      status: ProjectStatus::from(status),
      client_name: client.map(String::from),
      owner_id: None,
      created_at: Utc::now(),
      updated_at: None,
    }
  }

  #[test]
  fn test_status_aliases() {
    assert_eq!(ProjectStatus::from("In Progress"), ProjectStatus::Active);
    assert_eq!(ProjectStatus::from("canceled"), ProjectStatus::Cancelled);
    assert_eq!(
      ProjectStatus::from("archived"),
      ProjectStatus::Other("archived".to_string())
    );
  }

  #[test]
  fn test_project_deserializes_from_backend_row() {
    let json = r#"{
      "id": "p1",
      "name": "Kitchen remodel",
      "status": "on_hold",
      "client_name": "Acme",
      "owner_id": "user-42",
      "created_at": "2024-03-01T10:00:00Z",
      "updated_at": null
    }"#;
    let project: Project = serde_json::from_str(json).unwrap();
    assert_eq!(project.status, ProjectStatus::OnHold);
    assert_eq!(project.owner_id.as_deref(), Some("user-42"));
  }

  #[test]
  fn test_identity_reads_auth_user_payload() {
    let json = r#"{"id": "user-42", "email": "ana@example.com", "aud": "authenticated"}"#;
    let identity: Identity = serde_json::from_str(json).unwrap();
    assert_eq!(identity.user_id, "user-42");
    assert_eq!(identity.email.as_deref(), Some("ana@example.com"));
  }

  #[test]
  fn test_filter_matches_status_and_search() {
    let filter = ProjectFilter {
      status: Some(ProjectStatus::Active),
      search: Some("acme".to_string()),
    };
    assert!(filter.matches(&project("Roof", "active", Some("ACME Corp"))));
    assert!(!filter.matches(&project("Roof", "completed", Some("ACME Corp"))));
    assert!(!filter.matches(&project("Roof", "active", None)));
  }

  #[test]
  fn test_blank_search_is_empty_filter() {
    let filter = ProjectFilter {
      status: None,
      search: Some("  ".to_string()),
    };
    assert!(filter.is_empty());
    assert!(filter.matches(&project("Anything", "planning", None)));
  }
}
