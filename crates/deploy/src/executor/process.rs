//! Executor backed by an external binary.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use super::{
    Executor, Plan,
    cmd::{ExecutorCmdBuilder, Subcommand},
};
use crate::state::STATE_FILENAME;

/// Runs the executor binary as a child process, one invocation per operation.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    binary: PathBuf,
    leading_args: Vec<String>,
    env: Vec<(String, String)>,
}

/// Captured result of one executor invocation.
struct Output {
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl ProcessExecutor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            leading_args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Arguments placed before every command line, e.g. a script run by an interpreter.
    pub fn with_leading_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.leading_args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Extra environment passed to every invocation, e.g. workspace credentials.
    pub fn with_env(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(env);
        self
    }

    async fn run(&self, args: Vec<String>) -> Result<Output> {
        tracing::debug!(binary = %self.binary.display(), args = ?args, "Running executor");

        let output = Command::new(&self.binary)
            .args(&self.leading_args)
            .args(&args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true)
            .output()
            .await
            .context(format!("Failed to run executor {}", self.binary.display()))?;

        Ok(Output {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run and require a zero exit status.
    async fn run_ok(&self, subcommand: Subcommand, args: Vec<String>) -> Result<()> {
        let output = self.run(args).await?;
        if output.code != Some(0) {
            anyhow::bail!("executor {} failed: {}", subcommand, output.stderr.trim());
        }
        tracing::trace!(stdout = %output.stdout, "Executor {} finished", subcommand);
        Ok(())
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn init(&self, working_dir: &Path) -> Result<()> {
        let args = ExecutorCmdBuilder::new(Subcommand::Init)
            .working_dir(working_dir)
            .build();
        self.run_ok(Subcommand::Init, args).await
    }

    async fn plan(
        &self,
        working_dir: &Path,
        state: Option<&Path>,
        target: Option<&str>,
    ) -> Result<Plan> {
        let state = state.map_or_else(|| working_dir.join(STATE_FILENAME), Path::to_path_buf);
        let mut builder = ExecutorCmdBuilder::new(Subcommand::Plan)
            .working_dir(working_dir)
            .state(state)
            .detailed_exitcode(true);
        if let Some(target) = target {
            builder = builder.target(target);
        }

        let output = self.run(builder.build()).await?;
        match output.code {
            Some(0) => Ok(Plan { changed: false }),
            Some(2) => Ok(Plan { changed: true }),
            _ => anyhow::bail!("executor plan failed: {}", output.stderr.trim()),
        }
    }

    async fn apply(&self, working_dir: &Path) -> Result<()> {
        let args = ExecutorCmdBuilder::new(Subcommand::Apply)
            .working_dir(working_dir)
            .state(working_dir.join(STATE_FILENAME))
            .auto_approve(true)
            .build();
        self.run_ok(Subcommand::Apply, args).await
    }

    async fn import(
        &self,
        working_dir: &Path,
        state_out: &Path,
        address: &str,
        id: &str,
    ) -> Result<()> {
        let args = ExecutorCmdBuilder::new(Subcommand::Import)
            .working_dir(working_dir)
            .state_out(state_out)
            .arg(address)
            .arg(id)
            .build();
        self.run_ok(Subcommand::Import, args).await
    }

    async fn state_rm(&self, working_dir: &Path, address: &str) -> Result<()> {
        let args = ExecutorCmdBuilder::new(Subcommand::StateRm)
            .working_dir(working_dir)
            .state(working_dir.join(STATE_FILENAME))
            .arg(address)
            .build();
        self.run_ok(Subcommand::StateRm, args).await
    }
}
