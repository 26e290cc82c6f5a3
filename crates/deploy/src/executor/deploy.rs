use async_trait::async_trait;

use super::CONFIG_FILENAME;
use crate::{
    bundle::Bundle,
    context::Context,
    diag::{DiagId, Diagnostics},
    mutator::Mutator,
    permissions::try_report_executor_permission_error,
    state::{local_state_path, remote_state_path},
    workspace::WorkspaceError,
};

/// Prepares the executor working directory.
pub struct Initialize;

#[async_trait]
impl Mutator for Initialize {
    fn name(&self) -> &str {
        "executor.Initialize"
    }

    async fn apply(&self, ctx: &Context, b: &mut Bundle) -> Diagnostics {
        let dir = match b.executor_dir() {
            Ok(dir) => dir,
            Err(e) => return Diagnostics::from_err(DiagId::IoError, e),
        };
        if let Err(e) = ctx.executor.init(&dir).await {
            return Diagnostics::from_err(
                DiagId::ExecutorSetupError,
                e.context("Failed to initialize executor"),
            );
        }
        tracing::debug!(dir = %dir.display(), "Executor initialized");
        Diagnostics::new()
    }
}

/// Writes the rendered document into the working directory.
pub struct Write;

#[async_trait]
impl Mutator for Write {
    fn name(&self) -> &str {
        "executor.Write"
    }

    async fn apply(&self, _ctx: &Context, b: &mut Bundle) -> Diagnostics {
        let Some(document) = &b.executor_config else {
            return Diagnostics::error(DiagId::InternalError, "executor configuration not rendered");
        };

        let result = b.executor_dir().and_then(|dir| {
            let path = dir.join(CONFIG_FILENAME);
            let content = serde_json::to_vec_pretty(document)?;
            std::fs::write(&path, content)?;
            Ok(path)
        });
        match result {
            Ok(path) => {
                tracing::debug!(path = %path.display(), "Executor configuration written");
                Diagnostics::new()
            }
            Err(e) => Diagnostics::from_err(
                DiagId::IoError,
                e.context("Failed to write executor configuration"),
            ),
        }
    }
}

/// Replaces the local state with the remote one, when there is one.
pub struct StatePull;

#[async_trait]
impl Mutator for StatePull {
    fn name(&self) -> &str {
        "executor.StatePull"
    }

    async fn apply(&self, ctx: &Context, b: &mut Bundle) -> Diagnostics {
        let local = match local_state_path(b) {
            Ok(path) => path,
            Err(e) => return Diagnostics::from_err(DiagId::IoError, e),
        };
        let remote = remote_state_path(b);

        let content = match ctx.workspace.read_file(&remote).await {
            Ok(content) => content,
            Err(WorkspaceError::NotFound(_)) => {
                tracing::info!(path = %remote, "Remote state file does not exist");
                return Diagnostics::new();
            }
            Err(e) => return Diagnostics::from_err(DiagId::WorkspaceClientError, e),
        };

        if let Err(e) = std::fs::write(&local, content) {
            return Diagnostics::from_err(DiagId::IoError, e);
        }
        tracing::debug!(remote = %remote, local = %local.display(), "Remote state pulled");
        Diagnostics::new()
    }
}

/// Runs the executor to converge remote resources.
pub struct Apply;

#[async_trait]
impl Mutator for Apply {
    fn name(&self) -> &str {
        "executor.Apply"
    }

    async fn apply(&self, ctx: &Context, b: &mut Bundle) -> Diagnostics {
        let dir = match b.executor_dir() {
            Ok(dir) => dir,
            Err(e) => return Diagnostics::from_err(DiagId::IoError, e),
        };

        tracing::info!("Deploying resources...");
        if let Err(e) = ctx.executor.apply(&dir).await {
            let msg = format!("{:#}", e);
            return try_report_executor_permission_error(b, &msg).unwrap_or_else(|| {
                Diagnostics::error(DiagId::ExecutorError, format!("executor apply: {}", msg))
            });
        }

        tracing::info!("Deployment complete!");
        Diagnostics::new()
    }
}

/// Uploads the local state so that other deployers see it.
pub struct StatePush;

#[async_trait]
impl Mutator for StatePush {
    fn name(&self) -> &str {
        "executor.StatePush"
    }

    async fn apply(&self, ctx: &Context, b: &mut Bundle) -> Diagnostics {
        let local = match local_state_path(b) {
            Ok(path) => path,
            Err(e) => return Diagnostics::from_err(DiagId::IoError, e),
        };
        if !local.exists() {
            tracing::debug!(path = %local.display(), "No local state to push");
            return Diagnostics::new();
        }

        let content = match tokio::fs::read(&local).await {
            Ok(content) => content,
            Err(e) => return Diagnostics::from_err(DiagId::IoError, e),
        };

        let remote = remote_state_path(b);
        match ctx.workspace.write_file(&remote, &content, true).await {
            Ok(()) => {
                tracing::info!(path = %remote, "Deployment state updated");
                Diagnostics::new()
            }
            Err(e) => Diagnostics::from_err(DiagId::WorkspaceClientError, e),
        }
    }
}
