//! Permission reconciliation.
//!
//! Bundle-level permissions use generic levels. Each resource kind has its own
//! concrete level names; [`resource_level`] maps between them.

use async_trait::async_trait;

use crate::{
    bundle::Bundle,
    config::{Permission, Principal, ResourceKind},
    context::Context,
    diag::{DiagId, Diagnostics},
    mutator::Mutator,
};

mod filter;
mod report;
mod workspace_root;

pub use filter::FilterCurrentUser;
pub use report::{
    ReportPermissionErrors, report_permission_denied, try_report_executor_permission_error,
};
pub use workspace_root::ApplyWorkspaceRootPermissions;

/// Generic permission levels accepted in the bundle-level list, plus the
/// synthesized owner level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PermissionLevel {
    CanManage,
    CanView,
    CanRun,
    IsOwner,
}

/// Levels a user may set at the bundle level. `IS_OWNER` is only synthesized.
pub const ALLOWED_LEVELS: [PermissionLevel; 3] = [
    PermissionLevel::CanManage,
    PermissionLevel::CanView,
    PermissionLevel::CanRun,
];

/// The concrete level of `level` on a resource of `kind`, if the kind supports it.
pub fn resource_level(kind: ResourceKind, level: PermissionLevel) -> Option<&'static str> {
    use PermissionLevel::*;
    use ResourceKind::*;

    match (kind, level) {
        (RegisteredModels, _) => None,
        (_, IsOwner) => Some("IS_OWNER"),
        (_, CanManage) => Some("CAN_MANAGE"),
        (Jobs, CanView) => Some("CAN_VIEW"),
        (Jobs, CanRun) => Some("CAN_MANAGE_RUN"),
        (Pipelines, CanView) => Some("CAN_VIEW"),
        (Pipelines, CanRun) => Some("CAN_RUN"),
        (Experiments | Models, CanView) => Some("CAN_READ"),
        (Experiments | Models, CanRun) => None,
        (ModelServingEndpoints, CanView) => Some("CAN_VIEW"),
        (ModelServingEndpoints, CanRun) => Some("CAN_QUERY"),
    }
}

fn validate(permissions: &[Permission]) -> Result<Vec<(PermissionLevel, &Principal)>, String> {
    permissions
        .iter()
        .map(|p| {
            p.level
                .parse::<PermissionLevel>()
                .ok()
                .filter(|level| ALLOWED_LEVELS.contains(level))
                .map(|level| (level, &p.principal))
                .ok_or_else(|| {
                    let allowed: Vec<_> = ALLOWED_LEVELS.iter().map(|l| l.as_ref()).collect();
                    format!(
                        "invalid permission level: {}, allowed values: [{}]",
                        p.level,
                        allowed.join(", ")
                    )
                })
        })
        .collect()
}

/// Layers bundle-level permissions and the run-as owner onto every resource.
pub struct ApplyResourcePermissions;

#[async_trait]
impl Mutator for ApplyResourcePermissions {
    fn name(&self) -> &str {
        "ApplyResourcePermissions"
    }

    async fn apply(&self, _ctx: &Context, b: &mut Bundle) -> Diagnostics {
        let bundle_permissions = b.config.permissions.clone();
        let levels = match validate(&bundle_permissions) {
            Ok(levels) => levels,
            Err(msg) => return Diagnostics::error(DiagId::ConfigurationError, msg),
        };

        let default_owner = b
            .config
            .run_as
            .as_ref()
            .and_then(|r| r.user_name.clone())
            .filter(|u| !u.is_empty());
        if let Some(owner) = &default_owner {
            tracing::info!(user = %owner, "Setting default IS_OWNER permissions based on run_as");
        }

        for (key, mut resource) in b.config.resources.iter_mut() {
            let kind = resource.kind();
            let Some(own) = resource.permissions_mut() else {
                continue;
            };

            let mut added = Vec::with_capacity(levels.len() + 1);
            for (level, principal) in &levels {
                match resource_level(kind, *level) {
                    Some(concrete) => added.push(Permission {
                        level: concrete.to_string(),
                        principal: (*principal).clone(),
                    }),
                    None => tracing::debug!(
                        resource = %key,
                        kind = %kind,
                        level = %level,
                        "Skipping permission level not supported by resource kind"
                    ),
                }
            }

            if let Some(owner) = &default_owner
                && !own.iter().any(|p| p.level == PermissionLevel::IsOwner.as_ref())
            {
                added.push(Permission::user(PermissionLevel::IsOwner.as_ref(), owner));
            }

            own.extend(added);
        }

        Diagnostics::new()
    }
}

/// Whether the bundle-level list makes the current user (or one of their groups) a manager.
pub(crate) fn current_user_is_manager(b: &Bundle) -> bool {
    let Some(user) = &b.config.workspace.current_user else {
        return false;
    };
    b.config
        .permissions
        .iter()
        .filter(|p| p.level == PermissionLevel::CanManage.as_ref())
        .any(|p| match &p.principal {
            Principal::UserName(n) | Principal::ServicePrincipalName(n) => *n == user.user_name,
            Principal::GroupName(g) => user.groups.contains(g),
        })
}
