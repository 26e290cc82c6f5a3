//! Remote workspace seam.
//!
//! Mutators only talk to the workspace through [`WorkspaceClient`]. Errors are
//! typed so that callers can branch on "not found" and "permission denied"
//! without string matching.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{CurrentUser, JobDeployment, Permission};

mod local;
mod rest;

pub use local::LocalWorkspace;
pub use rest::RestWorkspaceClient;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkspaceError {
    #[error("{0} does not exist")]
    NotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("workspace API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("transport failure: {0}")]
    Transport(String),
}

impl From<std::io::Error> for WorkspaceError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => WorkspaceError::NotFound(err.to_string()),
            std::io::ErrorKind::AlreadyExists => WorkspaceError::AlreadyExists(err.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                WorkspaceError::PermissionDenied(err.to_string())
            }
            _ => WorkspaceError::Transport(err.to_string()),
        }
    }
}

pub type WorkspaceResult<T> = std::result::Result<T, WorkspaceError>;

/// Whether a workspace permission denial caused this error.
pub fn is_permission_denied(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<WorkspaceError>(),
            Some(WorkspaceError::PermissionDenied(_))
        )
    })
}

/// A job as it exists in the remote workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteJob {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<JobDeployment>,
}

/// Outcome of looking up a job by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobLookup {
    Found(RemoteJob),
    NotFound,
    TransportFailure(String),
}

impl From<WorkspaceResult<Option<RemoteJob>>> for JobLookup {
    fn from(result: WorkspaceResult<Option<RemoteJob>>) -> Self {
        match result {
            Ok(Some(job)) => JobLookup::Found(job),
            Ok(None) | Err(WorkspaceError::NotFound(_)) => JobLookup::NotFound,
            Err(err) => JobLookup::TransportFailure(err.to_string()),
        }
    }
}

#[async_trait]
pub trait WorkspaceClient: Send + Sync {
    /// The authenticated identity.
    async fn current_user(&self) -> WorkspaceResult<CurrentUser>;

    /// The first job with exactly this name, if any.
    async fn find_job_by_name(&self, name: &str) -> WorkspaceResult<Option<RemoteJob>>;

    async fn read_file(&self, path: &str) -> WorkspaceResult<Vec<u8>>;

    /// Write a file, creating parent directories. Without `overwrite`, an
    /// existing file yields [`WorkspaceError::AlreadyExists`].
    async fn write_file(&self, path: &str, content: &[u8], overwrite: bool)
    -> WorkspaceResult<()>;

    async fn delete_file(&self, path: &str) -> WorkspaceResult<()>;

    async fn mkdirs(&self, path: &str) -> WorkspaceResult<()>;

    /// Replace the access control list of a directory.
    async fn set_directory_permissions(
        &self,
        path: &str,
        acl: &[Permission],
    ) -> WorkspaceResult<()>;
}
