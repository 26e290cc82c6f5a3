//! Identity and default remote paths.

use async_trait::async_trait;

use crate::{
    bundle::Bundle,
    context::Context,
    diag::{DiagId, Diagnostics},
    mutator::Mutator,
    tags::Cloud,
};

/// Resolves the deploying identity once per invocation.
pub struct PopulateCurrentUser;

#[async_trait]
impl Mutator for PopulateCurrentUser {
    fn name(&self) -> &str {
        "PopulateCurrentUser"
    }

    async fn apply(&self, ctx: &Context, b: &mut Bundle) -> Diagnostics {
        if b.config.workspace.current_user.is_none() {
            let mut user = match ctx.workspace.current_user().await {
                Ok(user) => user,
                Err(e) => return Diagnostics::from_err(DiagId::WorkspaceClientError, e),
            };
            if user.short_name.is_empty() {
                user.short_name = short_name(&user.user_name);
            }
            tracing::info!(user = %user.user_name, "Current user resolved");
            b.config.workspace.current_user = Some(user);
        }

        b.tagging = Cloud::from_host(&b.config.workspace.host);
        Diagnostics::new()
    }
}

/// The local part of an email-style user name, made safe for resource names.
fn short_name(user_name: &str) -> String {
    let local = user_name.split('@').next().unwrap_or(user_name);
    local
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .to_lowercase()
}

pub struct DefineDefaultWorkspaceRoot;

#[async_trait]
impl Mutator for DefineDefaultWorkspaceRoot {
    fn name(&self) -> &str {
        "DefineDefaultWorkspaceRoot"
    }

    async fn apply(&self, _ctx: &Context, b: &mut Bundle) -> Diagnostics {
        if !b.config.workspace.root_path.is_empty() {
            return Diagnostics::new();
        }
        if b.config.bundle.name.is_empty() {
            return Diagnostics::error(
                DiagId::ConfigurationError,
                "unable to define default workspace root: bundle name not defined",
            );
        }
        if b.config.bundle.target.is_empty() {
            return Diagnostics::error(
                DiagId::ConfigurationError,
                "unable to define default workspace root: bundle target not selected",
            );
        }

        b.config.workspace.root_path = format!(
            "~/.bundle/{}/{}",
            b.config.bundle.name, b.config.bundle.target
        );
        Diagnostics::new()
    }
}

/// Expands a leading `~` to the current user's home folder.
pub struct ExpandWorkspaceRoot;

#[async_trait]
impl Mutator for ExpandWorkspaceRoot {
    fn name(&self) -> &str {
        "ExpandWorkspaceRoot"
    }

    async fn apply(&self, _ctx: &Context, b: &mut Bundle) -> Diagnostics {
        let root = &b.config.workspace.root_path;
        if root.is_empty() {
            return Diagnostics::error(
                DiagId::ConfigurationError,
                "unable to expand workspace root: workspace root not defined",
            );
        }

        let user = b.current_user_name();
        if user.is_empty() {
            return Diagnostics::error(
                DiagId::ConfigurationError,
                "unable to expand workspace root: current user not set",
            );
        }

        if let Some(rest) = root.strip_prefix('~') {
            b.config.workspace.root_path = format!("/Users/{}{}", user, rest);
        }
        Diagnostics::new()
    }
}

/// Files, artifacts and state live under the workspace root unless configured.
pub struct DefineDefaultWorkspacePaths;

#[async_trait]
impl Mutator for DefineDefaultWorkspacePaths {
    fn name(&self) -> &str {
        "DefineDefaultWorkspacePaths"
    }

    async fn apply(&self, _ctx: &Context, b: &mut Bundle) -> Diagnostics {
        let ws = &mut b.config.workspace;
        if ws.root_path.is_empty() {
            return Diagnostics::error(
                DiagId::ConfigurationError,
                "unable to define default workspace paths: workspace root not defined",
            );
        }

        let root = ws.root_path.trim_end_matches('/').to_string();
        for (path, leaf) in [
            (&mut ws.file_path, "files"),
            (&mut ws.artifact_path, "artifacts"),
            (&mut ws.state_path, "state"),
        ] {
            if path.is_empty() {
                *path = format!("{}/{}", root, leaf);
            }
        }
        Diagnostics::new()
    }
}
