use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the site API (e.g., "https://example.org/api/")
  pub url: String,
  /// Per-request timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Seconds before cached records are refetched on next read
  #[serde(default = "default_stale_time_secs")]
  pub stale_time_secs: u64,
  /// Keep list results on disk between runs
  #[serde(default = "default_persist")]
  pub persist: bool,
  /// Cache database location (defaults to $XDG_DATA_HOME/backoffice/cache.db)
  pub path: Option<PathBuf>,
}

fn default_stale_time_secs() -> u64 {
  5 * 60
}

fn default_persist() -> bool {
  true
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_time_secs: default_stale_time_secs(),
      persist: default_persist(),
      path: None,
    }
  }
}

impl CacheConfig {
  pub fn stale_time(&self) -> Duration {
    Duration::from_secs(self.stale_time_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// Filter directive used when RUST_LOG is unset (e.g., "info", "backoffice=debug")
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Write logs to this file instead of stderr
  pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
  "warn".to_string()
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      file: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./backoffice.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/backoffice/config.yaml
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
        "No configuration file found. Create one at ~/.config/backoffice/config.yaml\n\
                 with at least:\n\n  api:\n    url: https://example.org/api/"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("backoffice.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("backoffice").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    url::Url::parse(&config.api.url)
      .map_err(|e| eyre!("api.url '{}' is not a valid URL: {}", config.api.url, e))?;
    Ok(config)
  }

  /// Get the API token from the environment, if set.
  ///
  /// Checks BACKOFFICE_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("BACKOFFICE_API_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("api:\n  url: https://example.org/api/\n").unwrap();
    assert_eq!(config.api.timeout(), Duration::from_secs(30));
    assert_eq!(config.cache.stale_time(), Duration::from_secs(300));
    assert!(config.cache.persist);
    assert_eq!(config.log.level, "warn");
    assert!(config.log.file.is_none());
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
api:
  url: http://localhost:4000/api
  timeout_secs: 5
cache:
  stale_time_secs: 60
  persist: false
  path: /tmp/bo.db
log:
  level: backoffice=debug
  file: /tmp/bo.log
"#;
    let config = Config::parse(yaml).unwrap();
    assert_eq!(config.api.timeout_secs, 5);
    assert_eq!(config.cache.stale_time(), Duration::from_secs(60));
    assert!(!config.cache.persist);
    assert_eq!(config.cache.path, Some(PathBuf::from("/tmp/bo.db")));
    assert_eq!(config.log.level, "backoffice=debug");
  }

  #[test]
  fn test_invalid_url_is_rejected() {
    assert!(Config::parse("api:\n  url: not a url\n").is_err());
  }

  #[test]
  fn test_missing_explicit_path() {
    let err = Config::load(Some(Path::new("/nonexistent/backoffice.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
