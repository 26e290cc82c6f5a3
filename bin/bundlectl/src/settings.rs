//! User settings layered from defaults, a config file and the environment.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Workspace host, e.g. `https://acme.cloud.databricks.com`.
    pub host: String,
    pub token: String,
    /// Deployment executor binary.
    pub executor: PathBuf,
    /// User name to deploy as when using a local workspace directory.
    pub user: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: String::new(),
            token: String::new(),
            executor: PathBuf::from("terraform"),
            user: std::env::var("USER").unwrap_or_default(),
        }
    }
}

/// `~/.config/bundlectl/config.toml`
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("bundlectl").join("config.toml"))
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed("BUNDLECTL_").only(&["host", "token", "executor", "user"]))
            .extract()
            .context("Failed to load bundlectl settings")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempdir::TempDir::new("settings").unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "host = \"https://acme.cloud.databricks.com\"\nuser = \"alice@acme.com\"\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.host, "https://acme.cloud.databricks.com");
        assert_eq!(settings.user, "alice@acme.com");
        assert_eq!(settings.executor, PathBuf::from("terraform"));
    }

    #[test]
    fn test_missing_file_is_ignored() {
        let dir = tempdir::TempDir::new("settings").unwrap();
        let settings = Settings::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(settings.executor, PathBuf::from("terraform"));
    }
}
