use async_trait::async_trait;

use super::PermissionLevel;
use crate::{
    bundle::Bundle,
    config::Permission,
    context::Context,
    diag::{DiagId, Diagnostics},
    mutator::Mutator,
    workspace::WorkspaceError,
};

fn directory_level(level: &str) -> Result<&'static str, String> {
    match level.parse::<PermissionLevel>() {
        Ok(PermissionLevel::CanManage) => Ok("CAN_MANAGE"),
        Ok(PermissionLevel::CanRun) => Ok("CAN_RUN"),
        Ok(PermissionLevel::CanView) => Ok("CAN_READ"),
        _ => Err(format!("unsupported bundle permission level {}", level)),
    }
}

/// Grants the bundle-level permissions on the workspace root directory.
pub struct ApplyWorkspaceRootPermissions;

#[async_trait]
impl Mutator for ApplyWorkspaceRootPermissions {
    fn name(&self) -> &str {
        "ApplyWorkspaceRootPermissions"
    }

    async fn apply(&self, ctx: &Context, b: &mut Bundle) -> Diagnostics {
        let mut acl = Vec::with_capacity(b.config.permissions.len());
        for p in &b.config.permissions {
            match directory_level(&p.level) {
                Ok(level) => acl.push(Permission {
                    level: level.to_string(),
                    principal: p.principal.clone(),
                }),
                Err(msg) => return Diagnostics::error(DiagId::ConfigurationError, msg),
            }
        }

        if acl.is_empty() {
            return Diagnostics::new();
        }

        let root = b.config.workspace.root_path.clone();
        if let Err(e) = ctx.workspace.mkdirs(&root).await {
            return Diagnostics::from_err(DiagId::WorkspaceClientError, e);
        }

        match ctx.workspace.set_directory_permissions(&root, &acl).await {
            Ok(()) => {
                tracing::info!(
                    path = %root,
                    entries = acl.len(),
                    "Workspace root permissions applied"
                );
                Diagnostics::new()
            }
            Err(WorkspaceError::PermissionDenied(_)) => super::report_permission_denied(b, &root),
            Err(e) => Diagnostics::from_err(DiagId::WorkspaceClientError, e),
        }
    }
}
