//! CLI configuration management.

use crate::commands::GlobalArgs;
use serde::{Deserialize, Serialize};
use stash_cache::S3Settings;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings read from `config.yaml`. Command-line flags take precedence.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct StashConfig {
    /// S3 region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
    /// Local directory store; when set, S3 is not used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Compression workers for stream archives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    /// Default storage class for uploads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_class: Option<String>,
}

impl StashConfig {
    /// Load configuration from `explicit`, or from the default location if it exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        match explicit {
            Some(path) => Self::load_from(path),
            None => {
                let path = Self::config_path()?;
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Could not read {}: {}", path.display(), e))?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Save configuration to `path`.
    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        let dirs = directories::ProjectDirs::from("dev", "stash", "stash")
            .ok_or("Could not determine config directory")?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    /// Apply command-line overrides.
    pub fn merge(&mut self, args: &GlobalArgs) {
        if let Some(region) = &args.region {
            self.region = Some(region.clone());
        }
        if let Some(endpoint) = &args.endpoint {
            self.endpoint = Some(endpoint.clone());
        }
        if let Some(dir) = &args.store_dir {
            self.store_dir = Some(dir.clone());
        }
        if let Some(timeout) = args.timeout {
            self.timeout_secs = Some(timeout);
        }
        if let Some(workers) = args.workers {
            self.workers = Some(workers);
        }
    }

    /// Set a configuration value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        let number = |value: &str| {
            value
                .parse::<u64>()
                .map_err(|_| format!("Invalid number for {}: {}", key, value))
        };
        match key {
            "region" => self.region = Some(value.to_string()),
            "endpoint" => self.endpoint = Some(value.to_string()),
            "force_path_style" => {
                self.force_path_style = match value {
                    "true" => true,
                    "false" => false,
                    _ => return Err(format!("Invalid boolean: {}", value)),
                };
            }
            "store_dir" => self.store_dir = Some(PathBuf::from(value)),
            "timeout_secs" => self.timeout_secs = Some(number(value)?),
            "workers" => self.workers = Some(number(value)? as usize),
            "s3_class" => self.s3_class = Some(value.to_string()),
            _ => return Err(format!("Unknown config key: {}", key)),
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn s3_settings(&self) -> S3Settings {
        S3Settings {
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            force_path_style: self.force_path_style,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_load_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "region: eu-west-1\nendpoint: http://localhost:9000\nforce_path_style: true\ntimeout_secs: 30\n",
        )
        .unwrap();

        let config = StashConfig::load(Some(&path)).unwrap();
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert!(config.force_path_style);
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.workers, None);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(StashConfig::load(Some(&dir.path().join("nope.yaml"))).is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let mut config = StashConfig {
            region: Some("us-east-1".into()),
            workers: Some(2),
            ..StashConfig::default()
        };
        let args = GlobalArgs {
            region: Some("ap-south-1".into()),
            timeout: Some(5),
            ..GlobalArgs::default()
        };
        config.merge(&args);
        assert_eq!(config.region.as_deref(), Some("ap-south-1"));
        assert_eq!(config.workers, Some(2));
        assert_eq!(config.timeout_secs, Some(5));
    }

    #[test]
    fn test_set_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.yaml");

        let mut config = StashConfig::default();
        config.set("workers", "8").unwrap();
        config.set("s3_class", "STANDARD_IA").unwrap();
        assert!(config.set("workers", "many").is_err());
        assert!(config.set("colour", "blue").is_err());
        config.save(&path).unwrap();

        assert_eq!(StashConfig::load_from(&path).unwrap(), config);
    }
}
