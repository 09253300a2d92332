//! Cache keys for CRM queries.

use url::form_urlencoded;

use crate::cache::{QueryKey, TtlClass, CURRENT_IDENTITY_KEY};

/// Query key types for CRM backend calls.
///
/// Every scoped variant carries the user id it was resolved for as the
/// second key segment. Ids are percent-encoded, so no segment ever holds a
/// raw `:` and keys built from different ids never collide.
#[derive(Clone, Debug)]
pub enum CrmQueryKey {
  /// The session's own identity
  CurrentIdentity,
  /// Projects visible to a user
  Projects { user_id: String },
  /// A single project as seen by a user
  Project { user_id: String, project_id: String },
  /// Whether a user may open a project
  ProjectAccess { user_id: String, project_id: String },
}

impl CrmQueryKey {
  pub fn projects(user_id: &str) -> Self {
    Self::Projects {
      user_id: user_id.to_string(),
    }
  }

  /// Prefix covering every single-project entry cached for `user_id`.
  pub fn project_prefix(user_id: &str) -> String {
    format!("project:{}:", encode_segment(user_id))
  }

  /// Prefix covering every access check cached for `user_id`.
  pub fn access_prefix(user_id: &str) -> String {
    format!("access:{}:", encode_segment(user_id))
  }
}

impl QueryKey for CrmQueryKey {
  fn cache_key(&self) -> String {
    match self {
      Self::CurrentIdentity => CURRENT_IDENTITY_KEY.to_string(),
      Self::Projects { user_id } => format!("projects:{}", encode_segment(user_id)),
      Self::Project { user_id, project_id } => {
        format!("{}{}", Self::project_prefix(user_id), encode_segment(project_id))
      }
      Self::ProjectAccess { user_id, project_id } => {
        format!("{}{}", Self::access_prefix(user_id), encode_segment(project_id))
      }
    }
  }

  fn ttl_class(&self) -> TtlClass {
    match self {
      Self::CurrentIdentity | Self::ProjectAccess { .. } => TtlClass::Fast,
      Self::Projects { .. } | Self::Project { .. } => TtlClass::Standard,
    }
  }

  fn description(&self) -> String {
    match self {
      Self::CurrentIdentity => "current identity".to_string(),
      Self::Projects { user_id } => format!("projects for {}", user_id),
      Self::Project { user_id, project_id } => format!("project {} for {}", project_id, user_id),
      Self::ProjectAccess { user_id, project_id } => {
        format!("access to {} for {}", project_id, user_id)
      }
    }
  }
}

/// Percent-encode one key segment. Only `[A-Za-z0-9*-._]` pass through,
/// so the `:` separator can't appear inside a segment.
fn encode_segment(segment: &str) -> String {
  form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn project_key(user_id: &str, project_id: &str) -> String {
    CrmQueryKey::Project {
      user_id: user_id.to_string(),
      project_id: project_id.to_string(),
    }
    .cache_key()
  }

  fn access_key(user_id: &str, project_id: &str) -> String {
    CrmQueryKey::ProjectAccess {
      user_id: user_id.to_string(),
      project_id: project_id.to_string(),
    }
    .cache_key()
  }

  #[test]
  fn test_projects_key_embeds_user() {
    assert_eq!(CrmQueryKey::projects("user-42").cache_key(), "projects:user-42");
  }

  #[test]
  fn test_colons_in_ids_do_not_collide() {
    assert_ne!(project_key("a", "b:c"), project_key("a:b", "c"));
    assert_ne!(access_key("a", "b:c"), access_key("a:b", "c"));
    assert_eq!(project_key("a:b", "c"), "project:a%3Ab:c");
  }

  #[test]
  fn test_user_prefix_never_covers_another_user() {
    let key = project_key("a:b", "c");
    assert!(key.starts_with(&CrmQueryKey::project_prefix("a:b")));
    assert!(!key.starts_with(&CrmQueryKey::project_prefix("a")));
    assert!(!project_key("user-42", "p1").starts_with(&CrmQueryKey::project_prefix("user-4")));
    assert!(!access_key("a:b", "c").starts_with(&CrmQueryKey::access_prefix("a")));
  }

  #[test]
  fn test_encoded_segments_stay_valid_keys() {
    let key = project_key("user 42\n", "p1");
    assert!(!key.chars().any(char::is_control));
    assert_ne!(key, project_key("user+42", "p1"));
  }

  #[test]
  fn test_ttl_classes_are_fixed_per_namespace() {
    assert_eq!(CrmQueryKey::CurrentIdentity.ttl_class(), TtlClass::Fast);
    assert_eq!(CrmQueryKey::projects("u").ttl_class(), TtlClass::Standard);
    let access = CrmQueryKey::ProjectAccess {
      user_id: "u".to_string(),
      project_id: "p".to_string(),
    };
    assert_eq!(access.ttl_class(), TtlClass::Fast);
  }
}
