//! Command builder for the executor binary.

use std::path::Path;

/// Executor subcommands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Subcommand {
    #[strum(serialize = "init")]
    Init,
    #[strum(serialize = "plan")]
    Plan,
    #[strum(serialize = "apply")]
    Apply,
    #[strum(serialize = "import")]
    Import,
    #[strum(serialize = "state rm")]
    StateRm,
}

/// Builder for executor command lines.
#[derive(Debug, Clone)]
pub struct ExecutorCmdBuilder {
    subcommand: Subcommand,
    working_dir: Option<String>,
    state: Option<String>,
    state_out: Option<String>,
    target: Option<String>,
    auto_approve: bool,
    detailed_exitcode: bool,
    positional: Vec<String>,
}

impl ExecutorCmdBuilder {
    pub fn new(subcommand: Subcommand) -> Self {
        Self {
            subcommand,
            working_dir: None,
            state: None,
            state_out: None,
            target: None,
            auto_approve: false,
            detailed_exitcode: false,
            positional: Vec::new(),
        }
    }

    /// Run the executor in this directory.
    pub fn working_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.working_dir = Some(path.as_ref().display().to_string());
        self
    }

    /// Read state from this file instead of the working directory state.
    pub fn state(mut self, path: impl AsRef<Path>) -> Self {
        self.state = Some(path.as_ref().display().to_string());
        self
    }

    /// Write the resulting state to this file.
    pub fn state_out(mut self, path: impl AsRef<Path>) -> Self {
        self.state_out = Some(path.as_ref().display().to_string());
        self
    }

    /// Restrict the operation to one resource address.
    pub fn target(mut self, address: impl Into<String>) -> Self {
        self.target = Some(address.into());
        self
    }

    pub fn auto_approve(mut self, auto_approve: bool) -> Self {
        self.auto_approve = auto_approve;
        self
    }

    /// Exit with 2 when a plan has changes.
    pub fn detailed_exitcode(mut self, detailed: bool) -> Self {
        self.detailed_exitcode = detailed;
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.positional.push(arg.into());
        self
    }

    /// Build the command as a vector of strings.
    pub fn build(self) -> Vec<String> {
        let mut cmd = Vec::new();

        if let Some(dir) = self.working_dir {
            cmd.push(format!("-chdir={}", dir));
        }

        cmd.extend(self.subcommand.to_string().split(' ').map(str::to_string));
        // `state` subcommands take neither flag.
        if self.subcommand != Subcommand::StateRm {
            cmd.push("-input=false".to_string());
            cmd.push("-no-color".to_string());
        }

        if let Some(state) = self.state {
            cmd.push(format!("-state={}", state));
        }

        if let Some(state_out) = self.state_out {
            cmd.push(format!("-state-out={}", state_out));
        }

        if let Some(target) = self.target {
            cmd.push(format!("-target={}", target));
        }

        if self.auto_approve {
            cmd.push("-auto-approve".to_string());
        }

        if self.detailed_exitcode {
            cmd.push("-detailed-exitcode".to_string());
        }

        cmd.extend(self.positional);

        cmd
    }
}
