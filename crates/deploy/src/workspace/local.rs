//! Directory-backed workspace for offline use and tests.

use std::{
    collections::BTreeMap,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use super::{RemoteJob, WorkspaceClient, WorkspaceError, WorkspaceResult};
use crate::config::{CurrentUser, Permission};

const JOBS_INDEX: &str = ".jobs.json";
const PERMISSIONS_INDEX: &str = ".permissions.json";

/// A workspace whose paths live under a local directory.
///
/// Workspace path `/Users/a/x` maps to `<root>/Users/a/x`. Jobs and directory
/// permissions are kept in JSON indexes at the root, updated under an
/// exclusive file lock so that concurrent processes do not lose writes.
#[derive(Debug, Clone)]
pub struct LocalWorkspace {
    root: Arc<PathBuf>,
    user: CurrentUser,
}

impl LocalWorkspace {
    pub fn new(root: impl Into<PathBuf>, user: CurrentUser) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            anyhow::anyhow!("Failed to create local workspace {}: {}", root.display(), e)
        })?;
        Ok(Self {
            root: Arc::new(root),
            user,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local location of a workspace path.
    pub fn local_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    /// Record a job as existing in the workspace.
    pub async fn register_job(&self, job: RemoteJob) -> WorkspaceResult<()> {
        let index = self.root.join(JOBS_INDEX);
        blocking(move || {
            update_index(&index, |jobs: &mut Vec<RemoteJob>| {
                jobs.retain(|j| j.id != job.id);
                jobs.push(job);
            })
        })
        .await
    }

    /// The access control list last set on a directory.
    pub async fn directory_permissions(&self, path: &str) -> WorkspaceResult<Vec<Permission>> {
        let index = self.root.join(PERMISSIONS_INDEX);
        let path = path.to_string();
        blocking(move || {
            let all: BTreeMap<String, Vec<Permission>> = read_index(&index)?;
            Ok(all.get(&path).cloned().unwrap_or_default())
        })
        .await
    }
}

#[async_trait]
impl WorkspaceClient for LocalWorkspace {
    async fn current_user(&self) -> WorkspaceResult<CurrentUser> {
        Ok(self.user.clone())
    }

    async fn find_job_by_name(&self, name: &str) -> WorkspaceResult<Option<RemoteJob>> {
        let index = self.root.join(JOBS_INDEX);
        let name = name.to_string();
        blocking(move || {
            let jobs: Vec<RemoteJob> = read_index(&index)?;
            Ok(jobs.into_iter().find(|j| j.name == name))
        })
        .await
    }

    async fn read_file(&self, path: &str) -> WorkspaceResult<Vec<u8>> {
        let local = self.local_path(path);
        tokio::fs::read(&local)
            .await
            .map_err(|e| map_io(e, path))
    }

    async fn write_file(
        &self,
        path: &str,
        content: &[u8],
        overwrite: bool,
    ) -> WorkspaceResult<()> {
        let local = self.local_path(path);
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io(e, path))?;
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }

        let mut file = options.open(&local).await.map_err(|e| map_io(e, path))?;
        tokio::io::AsyncWriteExt::write_all(&mut file, content)
            .await
            .map_err(|e| map_io(e, path))?;
        tokio::io::AsyncWriteExt::flush(&mut file)
            .await
            .map_err(|e| map_io(e, path))
    }

    async fn delete_file(&self, path: &str) -> WorkspaceResult<()> {
        tokio::fs::remove_file(self.local_path(path))
            .await
            .map_err(|e| map_io(e, path))
    }

    async fn mkdirs(&self, path: &str) -> WorkspaceResult<()> {
        tokio::fs::create_dir_all(self.local_path(path))
            .await
            .map_err(|e| map_io(e, path))
    }

    async fn set_directory_permissions(
        &self,
        path: &str,
        acl: &[Permission],
    ) -> WorkspaceResult<()> {
        if !self.local_path(path).is_dir() {
            return Err(WorkspaceError::NotFound(path.to_string()));
        }

        let index = self.root.join(PERMISSIONS_INDEX);
        let path = path.to_string();
        let acl = acl.to_vec();
        blocking(move || {
            update_index(&index, |all: &mut BTreeMap<String, Vec<Permission>>| {
                all.insert(path, acl);
            })
        })
        .await
    }
}

fn map_io(err: std::io::Error, path: &str) -> WorkspaceError {
    match WorkspaceError::from(err) {
        WorkspaceError::NotFound(_) => WorkspaceError::NotFound(path.to_string()),
        WorkspaceError::AlreadyExists(_) => WorkspaceError::AlreadyExists(path.to_string()),
        other => other,
    }
}

async fn blocking<T, F>(f: F) -> WorkspaceResult<T>
where
    F: FnOnce() -> WorkspaceResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| WorkspaceError::Transport(format!("index task failed: {}", e)))?
}

fn read_index<T: DeserializeOwned + Default>(path: &Path) -> WorkspaceResult<T> {
    match std::fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Ok(T::default()),
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
            WorkspaceError::Transport(format!("corrupt index {}: {}", path.display(), e))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

/// Read-modify-write an index file while holding an exclusive lock on it.
fn update_index<T, F>(path: &Path, f: F) -> WorkspaceResult<()>
where
    T: Serialize + DeserializeOwned + Default,
    F: FnOnce(&mut T),
{
    let mut file: File = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    fs2::FileExt::lock_exclusive(&file)?;

    let result = rewrite_index(&mut file, path, f);

    fs2::FileExt::unlock(&file)?;
    result
}

fn rewrite_index<T, F>(file: &mut File, path: &Path, f: F) -> WorkspaceResult<()>
where
    T: Serialize + DeserializeOwned + Default,
    F: FnOnce(&mut T),
{
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    let mut value: T = if buf.is_empty() {
        T::default()
    } else {
        serde_json::from_slice(&buf).map_err(|e| {
            WorkspaceError::Transport(format!("corrupt index {}: {}", path.display(), e))
        })?
    };

    f(&mut value);

    let out =
        serde_json::to_vec_pretty(&value).map_err(|e| WorkspaceError::Transport(e.to_string()))?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&out)?;
    file.flush()?;
    Ok(())
}
