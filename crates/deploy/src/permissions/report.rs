//! Actionable reporting of permission failures.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::{PermissionLevel, current_user_is_manager};
use crate::{
    bundle::Bundle,
    config::Principal,
    context::Context,
    diag::{DiagId, Diagnostics},
    mutator::Mutator,
};

const PERMISSIONS_DOCS: &str =
    "Please refer to https://docs.databricks.com/en/dev-tools/bundles/permissions.html for more on managing permissions.";

/// Executor errors are addressed as `<type>.<key>`, e.g. `bundle_job.nightly`.
static RESOURCE_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"bundle_(\w*)\.(\w*)").expect("resource address pattern is valid")
});

/// Warns when the bundle declares permissions that do not make the deploying user a manager.
pub struct ReportPermissionErrors;

#[async_trait]
impl Mutator for ReportPermissionErrors {
    fn name(&self) -> &str {
        "CheckPermissions"
    }

    async fn apply(&self, _ctx: &Context, b: &mut Bundle) -> Diagnostics {
        if b.config.permissions.is_empty() || current_user_is_manager(b) {
            return Diagnostics::new();
        }
        Diagnostics::warning(
            DiagId::ConfigurationWarning,
            format!(
                "Permissions section should list {} or one of their groups with CAN_MANAGE permissions",
                b.current_user_name()
            ),
        )
    }
}

/// Other identities that could act on this bundle: the run-as user and
/// every CAN_MANAGE user or group other than the current user.
fn other_managers(b: &Bundle) -> Vec<String> {
    let current = b.current_user_name();
    let groups = b
        .config
        .workspace
        .current_user
        .as_ref()
        .map(|u| u.groups.as_slice())
        .unwrap_or_default();

    let mut managers = Vec::new();
    if let Some(run_as) = b.config.run_as.as_ref().and_then(|r| r.user_name.as_ref())
        && !run_as.is_empty()
    {
        managers.push(run_as.clone());
    }

    for p in &b.config.permissions {
        if p.level != PermissionLevel::CanManage.as_ref() {
            continue;
        }
        match &p.principal {
            Principal::UserName(n) if n != current => managers.push(n.clone()),
            Principal::GroupName(g) if !groups.contains(g) => managers.push(g.clone()),
            _ => {}
        }
    }
    managers
}

fn assistance(b: &Bundle) -> String {
    let managers = other_managers(b);
    if managers.is_empty() {
        "For assistance, contact the owners of this project.".to_string()
    } else {
        format!(
            "For assistance, users or groups who may be able to update the permissions include: {}.",
            managers.join(", ")
        )
    }
}

/// Turn a permission denial on a workspace path into guidance.
///
/// The message differs on whether the bundle lists the current user as a
/// manager: if it does, someone else must redeploy; if not, the bundle's
/// permission list needs fixing.
pub fn report_permission_denied(b: &Bundle, path: &str) -> Diagnostics {
    tracing::error!(path = %path, "Failed to update workspace path");
    let user = b.current_user_name();

    if current_user_is_manager(b) {
        return Diagnostics::error(
            DiagId::CannotChangePathPermissions,
            format!(
                "access denied updating deployment permissions for {}.\n{}\nThey can redeploy the project to apply the latest set of permissions.\n{}",
                user,
                assistance(b),
                PERMISSIONS_DOCS
            ),
        );
    }

    Diagnostics::error(
        DiagId::PathPermissionDenied,
        format!(
            "{} doesn't have the necessary permissions to deploy.\n{}\n{}",
            user,
            assistance(b),
            PERMISSIONS_DOCS
        ),
    )
}

fn runs_as_current_user(b: &Bundle) -> bool {
    let user = b.current_user_name();
    match &b.config.run_as {
        None => true,
        Some(r) => {
            r.user_name.as_deref() == Some(user)
                || r.service_principal_name.as_deref() == Some(user)
        }
    }
}

/// Recognize a permission failure in executor output. `None` for unrelated errors.
pub fn try_report_executor_permission_error(b: &Bundle, err: &str) -> Option<Diagnostics> {
    let is_permission_error = [
        "cannot update permissions",
        "permissions on pipeline",
        "cannot read permissions",
    ]
    .iter()
    .any(|needle| err.contains(needle));
    if !is_permission_error {
        return None;
    }

    tracing::error!(error = %err, "Executor error during deployment");
    let resource = RESOURCE_ADDRESS
        .captures(err)
        .and_then(|c| c.get(2))
        .map_or("resource", |m| m.as_str());

    if runs_as_current_user(b) {
        return Some(Diagnostics::error(
            DiagId::CannotChangeResourcePermissions,
            format!(
                "access denied updating permissions to {}.\nRedeploying resources with another owner or run_as identity is currently not supported.\n{}\nOnly the current owner of the resource or a workspace admin can redeploy this resource.\n{}",
                resource,
                assistance(b),
                PERMISSIONS_DOCS
            ),
        ));
    }

    Some(Diagnostics::error(
        DiagId::ResourcePermissionDenied,
        format!(
            "access denied updating permissions to {}.\n{}\nThey can redeploy the project to apply the latest set of permissions.\n{}",
            resource,
            assistance(b),
            PERMISSIONS_DOCS
        ),
    ))
}
