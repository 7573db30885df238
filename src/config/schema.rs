use crate::error::{DepotError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub downloads: DownloadConfig,
    #[serde(default)]
    pub manifests: ManifestConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct DownloadConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    pub models_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub require_network: bool,
    #[serde(default = "default_worker_slots")]
    pub worker_slots: usize,
    #[serde(default = "default_min_free_space_mb")]
    pub min_free_space_mb: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ManifestConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_hub_base_url")]
    pub hub_base_url: String,
    #[serde(default = "default_hub_token_env")]
    pub hub_token_env: String,
    pub verification_endpoint: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct CatalogConfig {
    pub bundled_path: Option<PathBuf>,
    pub remote_url: Option<String>,
}

// Default value functions
fn default_max_concurrent() -> usize {
    2
}
fn default_true() -> bool {
    true
}
fn default_worker_slots() -> usize {
    4
}
fn default_min_free_space_mb() -> u64 {
    100
}
fn default_cache_ttl_secs() -> u64 {
    6 * 60 * 60
}
fn default_http_timeout_secs() -> u64 {
    30
}
fn default_hub_base_url() -> String {
    "https://huggingface.co".to_string()
}
fn default_hub_token_env() -> String {
    "HF_TOKEN".to_string()
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            models_dir: None,
            require_network: default_true(),
            worker_slots: default_worker_slots(),
            min_free_space_mb: default_min_free_space_mb(),
        }
    }
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            hub_base_url: default_hub_base_url(),
            hub_token_env: default_hub_token_env(),
            verification_endpoint: None,
        }
    }
}

impl ManifestConfig {
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Config {
    /// Load config from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Load config from an explicit path; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| DepotError::Config(format!("Failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.downloads.max_concurrent == 0 {
            return Err(DepotError::Config(
                "downloads.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.downloads.worker_slots < self.downloads.max_concurrent {
            return Err(DepotError::Config(format!(
                "downloads.worker_slots ({}) must not be lower than downloads.max_concurrent ({})",
                self.downloads.worker_slots, self.downloads.max_concurrent
            )));
        }
        if let Some(endpoint) = &self.manifests.verification_endpoint {
            if !endpoint.contains("{model_id}") {
                return Err(DepotError::Config(
                    "manifests.verification_endpoint must contain {model_id}".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Directory holding model artifacts
    pub fn models_dir(&self) -> Result<PathBuf> {
        match &self.downloads.models_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(data_dir()?.join("models")),
        }
    }

    /// Directory holding persisted task, catalog and manifest snapshots
    pub fn state_dir(&self) -> Result<PathBuf> {
        Ok(data_dir()?.join("state"))
    }
}

/// Get config file path
pub fn config_path() -> Result<PathBuf> {
    let config_dir = if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config)
    } else {
        let home = std::env::var("HOME")
            .map_err(|_| DepotError::Config("HOME env var not set".to_string()))?;
        PathBuf::from(home).join(".config")
    };

    Ok(config_dir.join("modeldepot").join("config.toml"))
}

/// Get data directory
pub fn data_dir() -> Result<PathBuf> {
    let data_dir = if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        PathBuf::from(xdg_data)
    } else {
        dirs::data_dir()
            .ok_or_else(|| DepotError::Config("Could not determine data directory".to_string()))?
    };

    Ok(data_dir.join("modeldepot"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.downloads.max_concurrent, 2);
        assert!(config.downloads.require_network);
        assert_eq!(config.manifests.cache_ttl(), Duration::from_secs(21_600));
        assert_eq!(config.manifests.hub_base_url, "https://huggingface.co");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_merges_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[downloads]\nmax_concurrent = 3\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.downloads.max_concurrent, 3);
        assert_eq!(config.downloads.worker_slots, 4);
        assert_eq!(config.manifests.http_timeout_secs, 30);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load_from(&temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.downloads.max_concurrent, 2);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[downloads]\nmax_concurrent = 0\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("max_concurrent"));
    }

    #[test]
    fn test_verification_endpoint_needs_placeholder() {
        let mut config = Config::default();
        config.manifests.verification_endpoint = Some("https://api.example.com/verify".into());
        assert!(config.validate().is_err());

        config.manifests.verification_endpoint =
            Some("https://api.example.com/models/{model_id}/verify".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_paths_follow_xdg() {
        let temp_dir = TempDir::new().unwrap();
        let original_config = std::env::var("XDG_CONFIG_HOME").ok();
        let original_data = std::env::var("XDG_DATA_HOME").ok();
        std::env::set_var("XDG_CONFIG_HOME", temp_dir.path().join("cfg"));
        std::env::set_var("XDG_DATA_HOME", temp_dir.path().join("data"));

        let config_file = config_path().unwrap();
        let models_dir = Config::default().models_dir().unwrap();

        match original_config {
            Some(value) => std::env::set_var("XDG_CONFIG_HOME", value),
            None => std::env::remove_var("XDG_CONFIG_HOME"),
        }
        match original_data {
            Some(value) => std::env::set_var("XDG_DATA_HOME", value),
            None => std::env::remove_var("XDG_DATA_HOME"),
        }

        assert!(config_file.ends_with("cfg/modeldepot/config.toml"));
        assert!(models_dir.ends_with("data/modeldepot/models"));
    }
}
