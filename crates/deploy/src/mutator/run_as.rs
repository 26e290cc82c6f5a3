use async_trait::async_trait;

use crate::{
    bundle::Bundle,
    config::{Permission, Principal, RunAs},
    context::Context,
    diag::{DiagId, Diagnostics},
    mutator::Mutator,
    permissions::PermissionLevel,
};

const RUN_AS_DOCS: &str =
    "See https://docs.databricks.com/en/dev-tools/bundles/run-as.html to learn more about the run_as property.";

/// Validates `run_as` and propagates it to jobs that do not set their own.
pub struct SetRunAs;

#[async_trait]
impl Mutator for SetRunAs {
    fn name(&self) -> &str {
        "SetRunAs"
    }

    async fn apply(&self, _ctx: &Context, b: &mut Bundle) -> Diagnostics {
        let Some(run_as) = b.config.run_as.clone() else {
            return Diagnostics::new();
        };

        let diags = validate(b, &run_as);
        if diags.has_error() {
            return diags;
        }

        for job in b.config.resources.jobs.values_mut() {
            if job.run_as.is_none() {
                job.run_as = Some(run_as.clone());
            }
        }
        Diagnostics::new()
    }
}

fn validate(b: &Bundle, run_as: &RunAs) -> Diagnostics {
    let user = run_as.user_name.as_deref().filter(|s| !s.is_empty());
    let sp = run_as.service_principal_name.as_deref().filter(|s| !s.is_empty());

    let identity = match (user, sp) {
        (None, None) => {
            return Diagnostics::error(
                DiagId::ConfigurationError,
                "run_as section must specify exactly one identity. Neither service_principal_name nor user_name is specified",
            );
        }
        (Some(_), Some(_)) => {
            return Diagnostics::error(
                DiagId::ConfigurationError,
                "run_as section cannot specify both user_name and service_principal_name",
            );
        }
        (Some(id), None) | (None, Some(id)) => id,
    };

    if identity == b.current_user_name() {
        return Diagnostics::new();
    }

    // Pipelines and serving endpoints cannot run as anyone but their owner.
    let pipelines = b
        .config
        .resources
        .pipelines
        .iter()
        .map(|(key, p)| ("pipelines", key, &p.permissions));
    let endpoints = b
        .config
        .resources
        .model_serving_endpoints
        .iter()
        .map(|(key, e)| ("model_serving_endpoints", key, &e.permissions));

    for (kind, key, permissions) in pipelines.chain(endpoints) {
        if let Some(owner) = owner(permissions)
            && !owner_matches(owner, user, sp)
        {
            return Diagnostics::error(
                DiagId::RunAsDenied,
                format!(
                    "{} do not support a setting a run_as user that is different from the owner (resources.{}.{}).\n{}",
                    kind, kind, key, RUN_AS_DOCS
                ),
            );
        }
    }
    Diagnostics::new()
}

fn owner(permissions: &[Permission]) -> Option<&Principal> {
    permissions
        .iter()
        .find(|p| p.level == PermissionLevel::IsOwner.as_ref())
        .map(|p| &p.principal)
}

fn owner_matches(owner: &Principal, user: Option<&str>, sp: Option<&str>) -> bool {
    match owner {
        Principal::UserName(name) => user == Some(name.as_str()),
        Principal::ServicePrincipalName(name) => sp == Some(name.as_str()),
        Principal::GroupName(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Job, Pipeline, Root},
        mutator::{apply, testing::*},
    };

    fn run_as_user(name: &str) -> RunAs {
        RunAs {
            user_name: Some(name.into()),
            service_principal_name: None,
        }
    }

    fn config(run_as: Option<RunAs>) -> Root {
        let mut config = Root::default();
        config.workspace.current_user = Some(user("alice@acme.com"));
        config.run_as = run_as;
        config.resources.jobs.insert("inherits".into(), Job::default());
        config.resources.jobs.insert(
            "own".into(),
            Job {
                run_as: Some(run_as_user("carol@acme.com")),
                ..Default::default()
            },
        );
        config
    }

    async fn run(config: Root) -> (Bundle, Diagnostics) {
        let dir = tempdir::TempDir::new("run-as").unwrap();
        let (ctx, _) = context(&dir, user("alice@acme.com"));
        let mut b = bundle(&dir, config);
        let diags = apply(&ctx, &mut b, &SetRunAs).await;
        (b, diags)
    }

    #[tokio::test]
    async fn test_no_run_as_is_noop() {
        let (b, diags) = run(config(None)).await;
        assert!(diags.is_empty());
        assert!(b.config.resources.jobs["inherits"].run_as.is_none());
    }

    #[tokio::test]
    async fn test_jobs_inherit_run_as() {
        let (b, diags) = run(config(Some(run_as_user("bob@acme.com")))).await;
        assert!(diags.is_empty());
        assert_eq!(
            b.config.resources.jobs["inherits"].run_as,
            Some(run_as_user("bob@acme.com"))
        );
        assert_eq!(
            b.config.resources.jobs["own"].run_as,
            Some(run_as_user("carol@acme.com"))
        );
    }

    #[tokio::test]
    async fn test_exactly_one_identity() {
        let (_, diags) = run(config(Some(RunAs::default()))).await;
        assert!(diags[0].summary.contains("must specify exactly one identity"));

        let both = RunAs {
            user_name: Some("bob@acme.com".into()),
            service_principal_name: Some("sp-1".into()),
        };
        let (_, diags) = run(config(Some(both))).await;
        assert!(diags[0].summary.contains("cannot specify both"));
    }

    #[tokio::test]
    async fn test_pipeline_owner_must_match_run_as() {
        let mut c = config(Some(run_as_user("bob@acme.com")));
        c.resources.pipelines.insert(
            "p".into(),
            Pipeline {
                permissions: vec![Permission::user("IS_OWNER", "carol@acme.com")],
                ..Default::default()
            },
        );
        let (_, diags) = run(c).await;
        assert!(diags.contains_id(DiagId::RunAsDenied));
        assert!(diags[0].summary.contains("resources.pipelines.p"));
    }

    #[tokio::test]
    async fn test_pipeline_owner_matching_run_as_is_allowed() {
        let mut c = config(Some(run_as_user("bob@acme.com")));
        c.resources.pipelines.insert(
            "p".into(),
            Pipeline {
                permissions: vec![Permission::user("IS_OWNER", "bob@acme.com")],
                ..Default::default()
            },
        );
        assert!(run(c).await.1.is_empty());
    }

    #[tokio::test]
    async fn test_run_as_current_user_allows_everything() {
        let mut c = config(Some(run_as_user("alice@acme.com")));
        c.resources.pipelines.insert(
            "p".into(),
            Pipeline {
                permissions: vec![Permission::user("IS_OWNER", "carol@acme.com")],
                ..Default::default()
            },
        );
        assert!(run(c).await.1.is_empty());
    }
}
