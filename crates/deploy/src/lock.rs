//! Advisory deployment lock.
//!
//! The lock is a JSON file under the workspace state path. Acquiring writes
//! the file only if it does not exist (or overwrites it when forced) and then
//! reads it back to confirm ownership.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    bundle::Bundle,
    context::Context,
    diag::{DiagId, Diagnostics},
    mutator::Mutator,
    permissions,
    workspace::{WorkspaceClient, WorkspaceError, is_permission_denied},
};

pub const LOCK_FILENAME: &str = "deploy.lock";

/// What the lock was taken for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Goal {
    Deploy,
    Bind,
    Unbind,
}

/// Content of the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    pub id: Uuid,
    pub acquisition_time: DateTime<Utc>,
    pub is_forced: bool,
    pub user: String,
}

#[derive(Debug, Clone)]
pub struct Locker {
    id: Uuid,
    user: String,
    target_dir: String,
    active: bool,
}

impl Locker {
    pub fn new(user: impl Into<String>, target_dir: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user: user.into(),
            target_dir: target_dir.into(),
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn lock_path(&self) -> String {
        format!("{}/{}", self.target_dir.trim_end_matches('/'), LOCK_FILENAME)
    }

    async fn remote_state(&self, ws: &dyn WorkspaceClient) -> Result<LockState, WorkspaceError> {
        let bytes = ws.read_file(&self.lock_path()).await?;
        serde_json::from_slice(&bytes).map_err(|e| WorkspaceError::Api {
            status: 0,
            message: format!("malformed lock file {}: {}", self.lock_path(), e),
        })
    }

    pub async fn lock(&mut self, ws: &dyn WorkspaceClient, force: bool) -> Result<()> {
        let state = LockState {
            id: self.id,
            acquisition_time: Utc::now(),
            is_forced: force,
            user: self.user.clone(),
        };
        let content = serde_json::to_vec(&state).context("Failed to serialize lock state")?;

        match ws.write_file(&self.lock_path(), &content, force).await {
            Ok(()) => {}
            Err(WorkspaceError::AlreadyExists(_)) => {
                let holder = self
                    .remote_state(ws)
                    .await
                    .context("Failed to read existing deploy lock")?;
                anyhow::bail!(
                    "deploy lock acquired by {} at {}. Use --force-lock to override",
                    holder.user,
                    holder.acquisition_time
                );
            }
            Err(e) => return Err(e).context("Failed to write deploy lock"),
        }

        let remote = self
            .remote_state(ws)
            .await
            .context("Failed to verify deploy lock")?;
        if remote.id != self.id {
            anyhow::bail!(
                "deploy lock acquired by {} at {}. Use --force-lock to override",
                remote.user,
                remote.acquisition_time
            );
        }

        self.active = true;
        tracing::info!(path = %self.lock_path(), forced = force, "Deployment lock acquired");
        Ok(())
    }

    pub async fn unlock(&mut self, ws: &dyn WorkspaceClient, goal: Goal) -> Result<()> {
        if !self.active {
            anyhow::bail!("unlock called when lock is not held");
        }

        let remote = self
            .remote_state(ws)
            .await
            .context("Failed to read deploy lock")?;

        if remote.id != self.id {
            anyhow::bail!(
                "deploy lock is held by {} since {}, not by this process",
                remote.user,
                remote.acquisition_time
            );
        }

        ws.delete_file(&self.lock_path())
            .await
            .context("Failed to delete deploy lock")?;
        self.active = false;
        tracing::info!(path = %self.lock_path(), goal = %goal, "Deployment lock released");
        Ok(())
    }
}

pub struct Acquire;

#[async_trait]
impl Mutator for Acquire {
    fn name(&self) -> &str {
        "lock:acquire"
    }

    async fn apply(&self, ctx: &Context, b: &mut Bundle) -> Diagnostics {
        let lock = &b.config.bundle.deployment.lock;
        if !lock.is_enabled() {
            tracing::info!("Skipping; locking is disabled");
            return Diagnostics::new();
        }
        let force = lock.force;

        let state_path = b.config.workspace.state_path.clone();
        let mut locker = Locker::new(b.current_user_name(), &state_path);

        if let Err(err) = locker.lock(ctx.workspace.as_ref(), force).await {
            if is_permission_denied(&err) {
                return permissions::report_permission_denied(b, &state_path);
            }
            return Diagnostics::error(
                DiagId::LockError,
                format!("Failed to acquire deployment lock: {:#}", err),
            );
        }

        b.locker = Some(locker);
        Diagnostics::new()
    }
}

pub struct Release {
    goal: Goal,
}

impl Release {
    pub fn new(goal: Goal) -> Self {
        Self { goal }
    }
}

#[async_trait]
impl Mutator for Release {
    fn name(&self) -> &str {
        "lock:release"
    }

    async fn apply(&self, ctx: &Context, b: &mut Bundle) -> Diagnostics {
        if !b.config.bundle.deployment.lock.is_enabled() {
            tracing::info!("Skipping; locking is disabled");
            return Diagnostics::new();
        }

        let Some(locker) = b.locker.as_mut() else {
            tracing::warn!("Unable to release lock if locker is not configured");
            return Diagnostics::new();
        };
        if !locker.is_active() {
            tracing::debug!("Lock was not acquired, nothing to release");
            return Diagnostics::new();
        }

        match locker.unlock(ctx.workspace.as_ref(), self.goal).await {
            Ok(()) => Diagnostics::new(),
            Err(err) => Diagnostics::error(
                DiagId::LockError,
                format!("Failed to release deployment lock: {:#}", err),
            ),
        }
    }
}
