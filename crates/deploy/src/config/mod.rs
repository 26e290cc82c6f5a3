//! Typed bundle configuration.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::diag::Location;

mod merge;
pub mod resources;

pub use merge::Merge;
pub use resources::{
    Continuous, CronSchedule, Experiment, Job, JobDeployment, Model, PauseStatus, Permission,
    Pipeline, Principal, RegisteredModel, ResourceKind, ResourceMut, ResourceRef, Resources,
    ServingEndpoint, Tag, Task, Trigger,
};

/// The configuration file name looked up at the bundle root.
pub const BUNDLE_FILENAME: &str = "bundle.toml";

/// Deployment mode of the selected target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    #[default]
    #[strum(serialize = "")]
    Unset,
    Development,
    Production,
    #[strum(default)]
    Other(String),
}

impl Mode {
    pub fn as_str(&self) -> &str {
        match self {
            Mode::Unset => "",
            Mode::Development => "development",
            Mode::Production => "production",
            Mode::Other(s) => s,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Mode {
    fn from(s: String) -> Self {
        let parsed = s.parse();
        parsed.unwrap_or(Mode::Other(s))
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        mode.as_str().to_string()
    }
}

impl Serialize for Mode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Mode::from)
    }
}

/// Git provenance of the bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Git {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub origin_url: String,
    /// Branch the bundle is configured to deploy from.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub branch: String,
    /// Branch actually checked out locally.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub actual_branch: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit: String,
    /// True when origin/branch were read from the checkout rather than configured.
    #[serde(default)]
    pub inferred: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// `None` means "use the mode default".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub force: bool,
}

impl LockConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default)]
    pub lock: LockConfig,
}

/// The `[bundle]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleConfig {
    pub name: String,
    /// Name of the selected target, set by target selection.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub compute_id: String,
    #[serde(default)]
    pub git: Git,
    #[serde(default)]
    pub deployment: DeploymentConfig,
}

/// Identity of the authenticated deploying user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub user_name: String,
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl CurrentUser {
    /// Service principals authenticate with an application id (a UUID) as user name.
    pub fn is_service_principal(&self) -> bool {
        is_service_principal(&self.user_name)
    }
}

pub fn is_service_principal(user_name: &str) -> bool {
    uuid::Uuid::parse_str(user_name).is_ok()
}

/// The `[workspace]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub root_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub artifact_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_user: Option<CurrentUser>,
}

/// Identity deployed resources run as. Exactly one field must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunAs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_principal_name: Option<String>,
}

impl RunAs {
    /// The single configured identity, if exactly one is set.
    pub fn identity(&self) -> Option<&str> {
        match (&self.user_name, &self.service_principal_name) {
            (Some(u), None) => Some(u),
            (None, Some(sp)) => Some(sp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub source: String,
    /// Remote location after upload.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_path: String,
}

/// A locally built artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub build: String,
    #[serde(default)]
    pub files: Vec<ArtifactFile>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Paths relative to the bundle root that are not uploaded.
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// A named override fragment merged into the root on selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default)]
    pub default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<Git>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<Workspace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as: Option<RunAs>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<Permission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub artifacts: BTreeMap<String, Artifact>,
}

/// The configuration root. Flows by reference through the whole pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    pub bundle: BundleConfig,
    #[serde(default)]
    pub workspace: Workspace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as: Option<RunAs>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<Permission>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub targets: BTreeMap<String, Target>,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub artifacts: BTreeMap<String, Artifact>,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Root {
    /// Parse a configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse bundle config as TOML")
    }

    /// Load the configuration from a file, or from `bundle.toml` inside a directory.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(anyhow::anyhow!(
                "Bundle configuration not found: {}",
                path.display()
            ));
        }

        let config_path = if path.is_dir() {
            path.join(BUNDLE_FILENAME)
        } else {
            path.to_path_buf()
        };

        let content = std::fs::read_to_string(&config_path)
            .context(format!("Failed to read config from {}", config_path.display()))?;
        let config = Self::from_toml(&content)?;
        tracing::info!(path = %config_path.display(), "Bundle configuration loaded");
        Ok(config)
    }

    /// Whether the active target sets its own workspace root path.
    pub fn target_sets_root_path(&self) -> bool {
        self.targets
            .get(&self.bundle.target)
            .and_then(|t| t.workspace.as_ref())
            .is_some_and(|w| !w.root_path.is_empty())
    }
}

/// Walk up from `start` to the first directory containing a bundle configuration.
pub fn locate(start: &Path) -> Result<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(BUNDLE_FILENAME).is_file())
        .map(Path::to_path_buf)
        .with_context(|| {
            format!(
                "Unable to locate {} in {} or any parent directory",
                BUNDLE_FILENAME,
                start.display()
            )
        })
}

/// Map a TOML parse error onto a file location.
pub fn parse_error_location(file: &Path, content: &str, err: &toml::de::Error) -> Option<Location> {
    let offset = err.span()?.start;
    let before = content.get(..offset)?;
    let line = before.matches('\n').count() + 1;
    let column = before.rfind('\n').map_or(offset, |nl| offset - nl - 1) + 1;
    Some(Location {
        file: file.to_path_buf(),
        line,
        column,
    })
}
