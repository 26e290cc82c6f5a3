use async_trait::async_trait;

use crate::{
    bundle::Bundle,
    config::{Permission, Principal},
    context::Context,
    diag::Diagnostics,
    mutator::Mutator,
};

/// Removes the deploying identity from every resource's permission list, so
/// the executor is never asked to change the caller's own access.
pub struct FilterCurrentUser;

fn is_current_user(p: &Permission, user_name: &str) -> bool {
    match &p.principal {
        Principal::UserName(n) | Principal::ServicePrincipalName(n) => n == user_name,
        Principal::GroupName(_) => false,
    }
}

#[async_trait]
impl Mutator for FilterCurrentUser {
    fn name(&self) -> &str {
        "FilterCurrentUser"
    }

    async fn apply(&self, _ctx: &Context, b: &mut Bundle) -> Diagnostics {
        let user_name = b.current_user_name().to_string();
        if user_name.is_empty() {
            return Diagnostics::new();
        }

        for (key, mut resource) in b.config.resources.iter_mut() {
            let Some(permissions) = resource.permissions_mut() else {
                continue;
            };
            let before = permissions.len();
            permissions.retain(|p| !is_current_user(p, &user_name));
            if permissions.len() != before {
                tracing::debug!(
                    resource = %key,
                    removed = before - permissions.len(),
                    "Dropped current user from resource permissions"
                );
            }
        }
        Diagnostics::new()
    }
}
