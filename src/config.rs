//! Configuration management for the relay client.
//!
//! Handles loading and saving configuration from `config.toml` in the
//! platform config directory.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Session token, generated on first use
    pub token: Option<String>,
    /// Alternate relay host
    pub debug_url: Option<String>,
    /// Connect with `ws://` instead of `wss://`
    #[serde(default)]
    pub disable_security: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn save_token(token: &str) -> Result<()> {
        Self::save_token_to(&Self::config_path()?, token)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Store `token` in the config file at `path`, keeping its other settings.
    ///
    /// A file that exists but fails to parse is left untouched and the
    /// parse error is returned.
    pub fn save_token_to(path: &Path, token: &str) -> Result<()> {
        let mut config = Self::load_from(path).context("Refusing to overwrite config file")?;
        config.relay.token = Some(token.to_string());
        config.save_to(path)
    }

    pub fn config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("", "", "webhook-relay")
            .context("Could not determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();

        assert!(config.relay.token.is_none());
        assert!(!config.relay.disable_security);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.relay.token = Some("abc".to_string());
        config.relay.debug_url = Some("localhost:8080".to_string());
        config.relay.disable_security = true;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.relay.token.as_deref(), Some("abc"));
        assert_eq!(loaded.relay.debug_url.as_deref(), Some("localhost:8080"));
        assert!(loaded.relay.disable_security);
    }

    #[test]
    fn test_save_token_keeps_other_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[relay]\ndebug_url = \"localhost:8080\"\ndisable_security = true\n")
            .unwrap();

        Config::save_token_to(&path, "fresh").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.relay.token.as_deref(), Some("fresh"));
        assert_eq!(loaded.relay.debug_url.as_deref(), Some("localhost:8080"));
        assert!(loaded.relay.disable_security);
    }

    #[test]
    fn test_save_token_leaves_broken_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let broken = "relay = [\ndebug_url = \"localhost:8080\"\n";
        fs::write(&path, broken).unwrap();

        assert!(Config::save_token_to(&path, "fresh").is_err());
        assert_eq!(fs::read_to_string(&path).unwrap(), broken);
    }

    #[test]
    fn test_save_token_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        Config::save_token_to(&path, "fresh").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.relay.token.as_deref(), Some("fresh"));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "relay = [").unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}
