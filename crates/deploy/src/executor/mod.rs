//! Seam to the external deployment executor.
//!
//! The executor turns the rendered resource document into remote
//! infrastructure and records what it created in the deployment state file.
//! Mutators in this module drive it; the engine never talks to the control
//! plane for resource CRUD itself.

use std::path::Path;

use async_trait::async_trait;

mod bind;
mod cmd;
mod deploy;
mod interpolate;
mod process;

pub use bind::{BindOptions, Import, Unbind};
pub use cmd::{ExecutorCmdBuilder, Subcommand};
pub use deploy::{Apply, Initialize, StatePull, StatePush, Write};
pub use interpolate::{Interpolate, render};
pub use process::ProcessExecutor;

/// File the rendered resource document is written to in the working directory.
pub const CONFIG_FILENAME: &str = "bundle.exec.json";

/// Result of planning against a state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Plan {
    /// Whether applying would change remote resources.
    pub changed: bool,
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Prepare the working directory.
    async fn init(&self, working_dir: &Path) -> anyhow::Result<()>;

    /// Plan against the working directory state, or against `state` when given,
    /// optionally restricted to a single resource address.
    async fn plan(
        &self,
        working_dir: &Path,
        state: Option<&Path>,
        target: Option<&str>,
    ) -> anyhow::Result<Plan>;

    /// Apply the rendered document, updating the working directory state.
    async fn apply(&self, working_dir: &Path) -> anyhow::Result<()>;

    /// Bind an existing remote resource to `address`, writing the resulting state to `state_out`.
    async fn import(
        &self,
        working_dir: &Path,
        state_out: &Path,
        address: &str,
        id: &str,
    ) -> anyhow::Result<()>;

    /// Forget `address` without touching the remote resource.
    async fn state_rm(&self, working_dir: &Path, address: &str) -> anyhow::Result<()>;
}
