use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::TtlPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub backend: BackendConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  /// Base URL of the Supabase-style API (e.g., "https://xyz.supabase.co")
  pub url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  15
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Lifetime of stable data such as project lists
  pub standard_ttl_secs: u64,
  /// Lifetime of identity and access lookups
  pub fast_ttl_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    let policy = TtlPolicy::default();
    Self {
      standard_ttl_secs: policy.standard.as_secs(),
      fast_ttl_secs: policy.fast.as_secs(),
    }
  }
}

impl CacheConfig {
  pub fn ttl_policy(&self) -> TtlPolicy {
    TtlPolicy::new(
      Duration::from_secs(self.standard_ttl_secs),
      Duration::from_secs(self.fast_ttl_secs),
    )
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Default filter directive, overridden by RUST_LOG
  pub level: String,
  /// Log file path (default: $XDG_DATA_HOME/crm-cache/crm-cache.log)
  pub file: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./crm-cache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/crm-cache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/crm-cache/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("crm-cache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("crm-cache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents).map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.backend.url.trim().is_empty() {
      return Err(eyre!("backend.url must not be empty"));
    }
    if self.cache.fast_ttl_secs == 0 || self.cache.standard_ttl_secs == 0 {
      return Err(eyre!("cache TTLs must be greater than zero"));
    }
    if self.cache.fast_ttl_secs > self.cache.standard_ttl_secs {
      return Err(eyre!(
        "cache.fast_ttl_secs ({}) must not exceed cache.standard_ttl_secs ({})",
        self.cache.fast_ttl_secs,
        self.cache.standard_ttl_secs
      ));
    }
    Ok(())
  }

  /// Get the backend API key from environment variables.
  ///
  /// Checks CRM_API_KEY first, then SUPABASE_ANON_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("CRM_API_KEY")
      .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
      .map_err(|_| {
        eyre!("Backend API key not found. Set CRM_API_KEY or SUPABASE_ANON_KEY environment variable.")
      })
  }

  /// Get the session access token from environment variables.
  ///
  /// Checks CRM_ACCESS_TOKEN.
  pub fn get_access_token() -> Result<String> {
    std::env::var("CRM_ACCESS_TOKEN")
      .map_err(|_| eyre!("Access token not found. Set CRM_ACCESS_TOKEN environment variable."))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml("backend:\n  url: https://crm.example.com\n").unwrap();
    assert_eq!(config.backend.timeout_secs, 15);
    assert_eq!(config.cache.ttl_policy(), TtlPolicy::default());
    assert_eq!(config.log.level, "info");
  }

  #[test]
  fn test_cache_section_overrides_ttls() {
    let yaml = "backend:\n  url: https://crm.example.com\ncache:\n  standard_ttl_secs: 120\n  fast_ttl_secs: 10\n";
    let policy = Config::from_yaml(yaml).unwrap().cache.ttl_policy();
    assert_eq!(policy.standard, Duration::from_secs(120));
    assert_eq!(policy.fast, Duration::from_secs(10));
  }

  #[test]
  fn test_fast_ttl_longer_than_standard_is_rejected() {
    let yaml = "backend:\n  url: https://crm.example.com\ncache:\n  standard_ttl_secs: 10\n  fast_ttl_secs: 60\n";
    assert!(Config::from_yaml(yaml).is_err());
  }

  #[test]
  fn test_missing_backend_is_rejected() {
    assert!(Config::from_yaml("cache:\n  fast_ttl_secs: 5\n").is_err());
  }

  #[test]
  fn test_explicit_missing_path_is_an_error() {
    let err = Config::load(Some(Path::new("/nonexistent/crm-cache.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
