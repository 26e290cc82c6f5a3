//! Detection of same-named jobs deployed from a different state lineage.

use async_trait::async_trait;

use crate::{
    bundle::Bundle,
    config::Mode,
    context::Context,
    diag::{DiagId, Diagnostics},
    metadata::metadata_file_path,
    mutator::Mutator,
    workspace::{JobLookup, RemoteJob},
};

/// Best-effort production check against one representative job.
///
/// Only jobs record which bundle deployed them, so only jobs are checked. A
/// failed lookup is treated as "no conflict".
pub struct CheckDeploymentConflicts;

#[async_trait]
impl Mutator for CheckDeploymentConflicts {
    fn name(&self) -> &str {
        "CheckDeploymentConflicts"
    }

    async fn apply(&self, ctx: &Context, b: &mut Bundle) -> Diagnostics {
        if b.config.bundle.mode != Mode::Production {
            return Diagnostics::new();
        }
        let Some((key, job)) = b.config.resources.jobs.iter().next() else {
            return Diagnostics::new();
        };

        let lookup = JobLookup::from(ctx.workspace.find_job_by_name(&job.name).await);
        match lookup {
            JobLookup::Found(existing) => check_job_conflict(b, &existing),
            JobLookup::NotFound => Diagnostics::new(),
            JobLookup::TransportFailure(err) => {
                tracing::debug!(job = %key, error = %err, "Skipping deployment conflict check");
                Diagnostics::new()
            }
        }
    }
}

fn check_job_conflict(b: &Bundle, existing: &RemoteJob) -> Diagnostics {
    let Some(existing_path) = existing
        .deployment
        .as_ref()
        .map(|d| d.metadata_file_path.as_str())
        .filter(|p| !p.is_empty())
    else {
        return Diagnostics::new();
    };

    let own_path = metadata_file_path(b);
    if existing_path == own_path {
        return Diagnostics::new();
    }

    Diagnostics::error(
        DiagId::DeploymentConflict,
        format!(
            "conflicting deployment: job with name '{}' already exists in the target workspace but was deployed from a different bundle or user (existing state path: '{}', this bundle's state path: '{}')",
            existing.name, existing_path, own_path
        ),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        config::{CurrentUser, Job, JobDeployment, Permission, Root},
        mutator::{apply, testing::*},
        workspace::{WorkspaceClient, WorkspaceError, WorkspaceResult},
    };

    fn config(mode: Mode) -> Root {
        let mut config = Root::default();
        config.bundle.mode = mode;
        config.workspace.state_path = "/a/b/c/state".into();
        config.resources.jobs.insert(
            "job1".into(),
            Job {
                name: "job1".into(),
                ..Default::default()
            },
        );
        config
    }

    fn remote(path: &str) -> RemoteJob {
        RemoteJob {
            id: "1".into(),
            name: "job1".into(),
            deployment: Some(JobDeployment {
                kind: "BUNDLE".into(),
                metadata_file_path: path.into(),
            }),
        }
    }

    async fn check(config: Root, existing: Option<RemoteJob>) -> Diagnostics {
        let dir = tempdir::TempDir::new("conflict").unwrap();
        let (ctx, ws) = context(&dir, user("alice@acme.com"));
        if let Some(job) = existing {
            ws.register_job(job).await.unwrap();
        }
        let mut b = bundle(&dir, config);
        apply(&ctx, &mut b, &CheckDeploymentConflicts).await
    }

    #[tokio::test]
    async fn test_same_metadata_path_is_no_conflict() {
        let job = remote("/a/b/c/state/metadata.json");
        let diags = check(config(Mode::Production), Some(job)).await;
        assert!(diags.is_empty());
    }

    #[tokio::test]
    async fn test_different_metadata_path_is_conflict() {
        let job = remote("/q/r/p/state/metadata.json");
        let diags = check(config(Mode::Production), Some(job)).await;
        assert!(diags.contains_id(DiagId::DeploymentConflict));
        assert!(diags[0].summary.contains("/q/r/p/state/metadata.json"));
        assert!(diags[0].summary.contains("/a/b/c/state/metadata.json"));
    }

    #[tokio::test]
    async fn test_job_without_metadata_is_no_conflict() {
        let mut job = remote("");
        job.deployment = None;
        assert!(check(config(Mode::Production), Some(job)).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_job_is_no_conflict() {
        assert!(check(config(Mode::Production), None).await.is_empty());
    }

    #[tokio::test]
    async fn test_only_production_is_checked() {
        let job = remote("/q/r/p/state/metadata.json");
        let diags = check(config(Mode::Development), Some(job)).await;
        assert!(diags.is_empty());
    }

    struct Unreachable;

    #[async_trait]
    impl WorkspaceClient for Unreachable {
        async fn current_user(&self) -> WorkspaceResult<CurrentUser> {
            Err(WorkspaceError::Transport("unreachable".into()))
        }
        async fn find_job_by_name(&self, _name: &str) -> WorkspaceResult<Option<RemoteJob>> {
            Err(WorkspaceError::Transport("connection reset".into()))
        }
        async fn read_file(&self, _path: &str) -> WorkspaceResult<Vec<u8>> {
            Err(WorkspaceError::Transport("unreachable".into()))
        }
        async fn write_file(&self, _p: &str, _c: &[u8], _o: bool) -> WorkspaceResult<()> {
            Err(WorkspaceError::Transport("unreachable".into()))
        }
        async fn delete_file(&self, _path: &str) -> WorkspaceResult<()> {
            Err(WorkspaceError::Transport("unreachable".into()))
        }
        async fn mkdirs(&self, _path: &str) -> WorkspaceResult<()> {
            Err(WorkspaceError::Transport("unreachable".into()))
        }
        async fn set_directory_permissions(
            &self,
            _path: &str,
            _acl: &[Permission],
        ) -> WorkspaceResult<()> {
            Err(WorkspaceError::Transport("unreachable".into()))
        }
    }

    #[tokio::test]
    async fn test_transport_failure_is_no_conflict() {
        let dir = tempdir::TempDir::new("conflict").unwrap();
        let ctx = crate::context::Context::new(Arc::new(Unreachable), Arc::new(NullExecutor));
        let mut b = bundle(&dir, config(Mode::Production));
        assert!(apply(&ctx, &mut b, &CheckDeploymentConflicts).await.is_empty());
    }
}
