//! Incremental upload of the bundle source tree.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::{
    bundle::{Bundle, CACHE_DIR},
    context::Context,
    diag::{DiagId, Diagnostics},
    mutator::Mutator,
    permissions::report_permission_denied,
    workspace::{WorkspaceClient, WorkspaceError},
};

const SNAPSHOT_FILENAME: &str = "sync-snapshot.json";

/// Directories under the bundle root that are never uploaded.
const ALWAYS_EXCLUDED: [&str; 2] = [CACHE_DIR, ".git"];

/// What the last successful upload sent, keyed by path relative to the bundle root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Remote directory the files were uploaded to.
    pub remote_path: String,
    /// Relative path to hex-encoded SHA-256 of the content.
    pub files: BTreeMap<String, String>,
}

impl Snapshot {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read sync snapshot {}", path.display()))?;
        serde_json::from_str(&content)
            .context(format!("Failed to parse sync snapshot {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize sync snapshot")?;
        std::fs::write(path, content)
            .context(format!("Failed to write sync snapshot {}", path.display()))
    }
}

fn hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

fn relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
    )
}

fn is_excluded(rel: &str, exclude: &[String]) -> bool {
    ALWAYS_EXCLUDED
        .iter()
        .copied()
        .chain(exclude.iter().map(|e| e.trim_end_matches('/')))
        .any(|prefix| rel == prefix || rel.starts_with(&format!("{}/", prefix)))
}

/// Hash every uploadable file under `root`.
pub fn scan(root: &Path, exclude: &[String]) -> Result<BTreeMap<String, String>> {
    let mut files = BTreeMap::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            relative(root, entry.path()).is_none_or(|rel| !is_excluded(&rel, exclude))
        });

    for entry in walker {
        let entry = entry.context(format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(rel) = relative(root, entry.path()) else {
            continue;
        };
        let content = std::fs::read(entry.path())
            .context(format!("Failed to read {}", entry.path().display()))?;
        files.insert(rel, hash(&content));
    }
    Ok(files)
}

/// Upload changed files and delete removed ones.
///
/// Returns the full list of files now present remotely.
async fn sync(
    workspace: &dyn WorkspaceClient,
    root: &Path,
    remote_path: &str,
    exclude: &[String],
    snapshot_path: &Path,
) -> Result<Vec<String>> {
    let previous = Snapshot::load(snapshot_path)?;
    let previous = if previous.remote_path == remote_path {
        previous.files
    } else {
        BTreeMap::new()
    };

    let current = scan(root, exclude)?;
    let remote = |rel: &str| format!("{}/{}", remote_path.trim_end_matches('/'), rel);

    let mut uploaded = 0;
    for (rel, digest) in &current {
        if previous.get(rel) == Some(digest) {
            continue;
        }
        let content = tokio::fs::read(root.join(rel))
            .await
            .context(format!("Failed to read {}", rel))?;
        workspace
            .write_file(&remote(rel), &content, true)
            .await
            .context(format!("Failed to upload {}", rel))?;
        uploaded += 1;
    }

    let mut deleted = 0;
    for rel in previous.keys().filter(|rel| !current.contains_key(*rel)) {
        match workspace.delete_file(&remote(rel)).await {
            Ok(()) | Err(WorkspaceError::NotFound(_)) => deleted += 1,
            Err(e) => return Err(e).context(format!("Failed to delete {}", rel)),
        }
    }

    tracing::debug!(uploaded, deleted, unchanged = current.len() - uploaded, "Files synchronized");

    Snapshot {
        remote_path: remote_path.to_string(),
        files: current.clone(),
    }
    .save(snapshot_path)?;

    Ok(current.into_keys().collect())
}

/// Uploads the bundle source tree to the workspace file path.
pub struct Upload;

#[async_trait]
impl Mutator for Upload {
    fn name(&self) -> &str {
        "files.Upload"
    }

    async fn apply(&self, ctx: &Context, b: &mut Bundle) -> Diagnostics {
        let remote_path = b.config.workspace.file_path.clone();
        tracing::info!(path = %remote_path, "Uploading bundle files");

        let snapshot_path: PathBuf = match b.cache_dir() {
            Ok(dir) => dir.join(SNAPSHOT_FILENAME),
            Err(e) => {
                return Diagnostics::from_err(
                    DiagId::SyncError,
                    e.context("cannot get bundle cache directory"),
                );
            }
        };

        let result = sync(
            ctx.workspace.as_ref(),
            &b.root_path,
            &remote_path,
            &b.config.sync.exclude,
            &snapshot_path,
        )
        .await;

        match result {
            Ok(files) => {
                tracing::info!(files = files.len(), "Uploaded bundle files");
                b.files = files;
                Diagnostics::new()
            }
            Err(e) if crate::workspace::is_permission_denied(&e) => {
                let state_path = b.config.workspace.state_path.clone();
                report_permission_denied(b, &state_path)
            }
            Err(e) => Diagnostics::from_err(DiagId::SyncError, e),
        }
    }
}
