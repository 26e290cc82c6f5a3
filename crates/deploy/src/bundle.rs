//! The in-memory bundle a pipeline invocation operates on.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};

use crate::{config::Root, lock::Locker, tags::Cloud};

/// Local cache directory name under the bundle root.
pub const CACHE_DIR: &str = ".bundle";

/// Everything a pipeline invocation reads and mutates.
///
/// Exclusively owned by the invocation and passed by `&mut` from mutator to
/// mutator; it is never copied wholesale.
#[derive(Debug)]
pub struct Bundle {
    /// Local directory containing the bundle configuration.
    pub root_path: PathBuf,
    pub config: Root,
    /// Tag normalization rules of the target workspace's cloud.
    pub tagging: Cloud,
    /// Deployment lock, created on acquire.
    pub locker: Option<Locker>,
    /// Paths, relative to the bundle root, of the files uploaded by the last sync.
    pub files: Vec<String>,
    /// Resources rendered for the deployment executor.
    pub executor_config: Option<serde_json::Value>,
    /// Skip interactive approval of destructive or binding changes.
    pub auto_approve: bool,
    /// Bypass soft validation such as the git branch check.
    pub force: bool,
}

impl Bundle {
    pub fn new(root_path: impl Into<PathBuf>, config: Root) -> Self {
        Self {
            root_path: root_path.into(),
            config,
            tagging: Cloud::default(),
            locker: None,
            files: Vec::new(),
            executor_config: None,
            auto_approve: false,
            force: false,
        }
    }

    /// Load `bundle.toml` from a bundle root.
    pub fn load(root_path: &Path) -> Result<Self> {
        let config = Root::load_from_file(root_path)?;
        Ok(Self::new(root_path, config))
    }

    /// Per-target local cache directory, created on first use.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        let target = &self.config.bundle.target;
        if target.is_empty() {
            anyhow::bail!("Failed to resolve cache directory: no target selected");
        }

        let dir = self.root_path.join(CACHE_DIR).join(target);
        std::fs::create_dir_all(&dir)
            .context(format!("Failed to create cache directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Working directory of the deployment executor.
    pub fn executor_dir(&self) -> Result<PathBuf> {
        let dir = self.cache_dir()?.join("executor");
        std::fs::create_dir_all(&dir)
            .context(format!("Failed to create executor directory {}", dir.display()))?;
        Ok(dir)
    }

    /// The deploying user's name, empty before the current user is populated.
    pub fn current_user_name(&self) -> &str {
        self.config
            .workspace
            .current_user
            .as_ref()
            .map_or("", |u| u.user_name.as_str())
    }
}
