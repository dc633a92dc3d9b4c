//! Offline configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{TaskerError, TaskerResult};

/// Identifier of the current cache generation.
pub const DEFAULT_CACHE_NAME: &str = "tasker-v1";

/// Resources the application needs to boot without a network.
pub const DEFAULT_SHELL_ASSETS: &[&str] = &[
    "/",
    "/index.html",
    "/icons/icon-192.svg",
    "/icons/icon-512.svg",
];

/// Offline cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Origin the shell asset list is resolved against
    pub origin: String,

    /// Current cache identifier
    pub cache_name: String,

    /// Shell asset list, in install order
    pub shell_assets: Vec<String>,

    /// Directory holding the on-disk cache store
    pub cache_dir: PathBuf,

    /// User agent sent with network requests
    pub user_agent: String,

    /// Per-request network timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            // Vite's dev server address
            origin: "http://localhost:5173/".to_string(),
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            shell_assets: DEFAULT_SHELL_ASSETS.iter().map(|s| s.to_string()).collect(),
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tasker"),
            user_agent: format!("tasker-offline/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 30,
        }
    }
}

impl OfflineConfig {
    /// Load a configuration from a JSON file.
    pub fn load(path: &Path) -> TaskerResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        debug!("Loaded offline config from {}", path.display());
        Ok(config)
    }

    /// Load a configuration, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> TaskerResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Write the configuration as pretty JSON.
    pub fn save(&self, path: &Path) -> TaskerResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Check the invariants the cache controller relies on.
    pub fn validate(&self) -> TaskerResult<()> {
        if self.cache_name.trim().is_empty() {
            return Err(TaskerError::config("cache_name must not be empty"));
        }
        // An empty generation is indistinguishable from a failed install.
        if self.shell_assets.is_empty() {
            return Err(TaskerError::config("shell_assets must not be empty"));
        }
        self.resolve_shell_assets()?;
        Ok(())
    }

    /// Parsed origin URL.
    pub fn origin_url(&self) -> TaskerResult<Url> {
        let origin = Url::parse(&self.origin)?;
        if origin.cannot_be_a_base() {
            return Err(TaskerError::config(format!(
                "origin {origin} cannot be used as a base URL"
            )));
        }
        Ok(origin)
    }

    /// Shell assets as absolute URLs, in configured order.
    pub fn resolve_shell_assets(&self) -> TaskerResult<Vec<Url>> {
        let origin = self.origin_url()?;
        self.shell_assets
            .iter()
            .map(|asset| origin.join(asset).map_err(TaskerError::from))
            .collect()
    }

    /// Network timeout as a `Duration`.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tasker")
            .join("offline.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OfflineConfig::default();
        assert_eq!(config.cache_name, "tasker-v1");
        assert_eq!(
            config.shell_assets,
            vec!["/", "/index.html", "/icons/icon-192.svg", "/icons/icon-512.svg"]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_shell_assets() {
        let config = OfflineConfig {
            origin: "https://tasker.example/app/".to_string(),
            ..Default::default()
        };
        let urls = config.resolve_shell_assets().unwrap();
        assert_eq!(urls[0].as_str(), "https://tasker.example/");
        assert_eq!(urls[1].as_str(), "https://tasker.example/index.html");
        assert_eq!(urls.len(), 4);
    }

    #[test]
    fn test_empty_cache_name_rejected() {
        let config = OfflineConfig {
            cache_name: "  ".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TaskerError::Config(_))));
    }

    #[test]
    fn test_empty_shell_rejected() {
        let config = OfflineConfig {
            shell_assets: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TaskerError::Config(_))));
    }

    #[test]
    fn test_bad_origin_rejected() {
        let config = OfflineConfig {
            origin: "mailto:someone@example.com".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TaskerError::Config(_))));

        let config = OfflineConfig {
            origin: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TaskerError::Url(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("offline.json");

        let config = OfflineConfig {
            cache_name: "tasker-v2".to_string(),
            request_timeout_secs: 5,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = OfflineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offline.json");
        std::fs::write(&path, r#"{ "cache_name": "tasker-v3" }"#).unwrap();

        let loaded = OfflineConfig::load(&path).unwrap();
        assert_eq!(loaded.cache_name, "tasker-v3");
        assert_eq!(loaded.shell_assets.len(), DEFAULT_SHELL_ASSETS.len());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = OfflineConfig::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded.cache_name, DEFAULT_CACHE_NAME);
    }
}
