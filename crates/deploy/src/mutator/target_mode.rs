//! Development and production mode policy.

use async_trait::async_trait;

use crate::{
    bundle::Bundle,
    config::{Mode, PauseStatus, Resources, Tag, is_service_principal},
    context::Context,
    diag::{DiagId, Diagnostics},
    mutator::Mutator,
};

/// Concurrent runs allowed for development jobs that do not set their own limit.
pub const DEVELOPMENT_CONCURRENT_RUNS: u32 = 4;

/// Applies the selected target's mode once per invocation.
pub struct ProcessTargetMode;

#[async_trait]
impl Mutator for ProcessTargetMode {
    fn name(&self) -> &str {
        "ProcessTargetMode"
    }

    async fn apply(&self, _ctx: &Context, b: &mut Bundle) -> Diagnostics {
        match b.config.bundle.mode.clone() {
            Mode::Development => {
                let diags = validate_development_mode(b);
                if diags.has_error() {
                    return diags;
                }
                transform_development_mode(b);
                Diagnostics::new()
            }
            Mode::Production => validate_production_mode(b),
            Mode::Unset => Diagnostics::new(),
            Mode::Other(other) => Diagnostics::error(
                DiagId::TargetModeError,
                format!(
                    "unsupported value '{}' specified for 'mode': must be either 'development' or 'production'",
                    other
                ),
            ),
        }
    }
}

/// The first non-empty workspace path that does not contain the user name.
fn find_non_user_path(b: &Bundle) -> Option<&'static str> {
    let user = b.current_user_name();
    let ws = &b.config.workspace;
    [
        ("root_path", &ws.root_path),
        ("state_path", &ws.state_path),
        ("file_path", &ws.file_path),
        ("artifact_path", &ws.artifact_path),
    ]
    .into_iter()
    .find(|(_, path)| !path.is_empty() && !path.contains(user))
    .map(|(field, _)| field)
}

fn validate_development_mode(b: &Bundle) -> Diagnostics {
    match find_non_user_path(b) {
        Some(field) => Diagnostics::error(
            DiagId::TargetModeError,
            format!(
                "{} must start with '~/' or contain the current username when using 'mode: development'",
                field
            ),
        ),
        None => Diagnostics::new(),
    }
}

fn pause(status: &mut Option<PauseStatus>) {
    if *status != Some(PauseStatus::Unpaused) {
        *status = Some(PauseStatus::Paused);
    }
}

fn transform_development_mode(b: &mut Bundle) {
    let lock = &mut b.config.bundle.deployment.lock;
    if lock.enabled != Some(true) {
        tracing::info!(
            "Development mode: disabling deployment lock since bundle.deployment.lock.enabled is not set to true"
        );
        lock.enabled = Some(false);
    }

    let short_name = b
        .config
        .workspace
        .current_user
        .as_ref()
        .map(|u| u.short_name.clone())
        .unwrap_or_default();
    let prefix = format!("[dev {}] ", short_name);
    let underscore_prefix = format!("dev_{}_", short_name);
    let tag_value = b.tagging.normalize_value(&short_name);
    let dev_tag = Tag {
        key: "dev".to_string(),
        value: tag_value.clone(),
    };

    let Resources {
        jobs,
        pipelines,
        experiments,
        models,
        model_serving_endpoints,
        registered_models,
    } = &mut b.config.resources;

    for job in jobs.values_mut() {
        job.name = format!("{}{}", prefix, job.name);
        job.tags.insert("dev".to_string(), tag_value.clone());
        if job.max_concurrent_runs == 0 {
            job.max_concurrent_runs = DEVELOPMENT_CONCURRENT_RUNS;
        }
        if let Some(schedule) = job.schedule.as_mut() {
            pause(&mut schedule.pause_status);
        }
        if let Some(continuous) = job.continuous.as_mut() {
            pause(&mut continuous.pause_status);
        }
        if let Some(trigger) = job.trigger.as_mut() {
            pause(&mut trigger.pause_status);
        }
    }

    for pipeline in pipelines.values_mut() {
        pipeline.name = format!("{}{}", prefix, pipeline.name);
        pipeline.development = true;
    }

    for model in models.values_mut() {
        model.name = format!("{}{}", prefix, model.name);
        model.tags.push(dev_tag.clone());
    }

    // Experiment names are paths; only the last segment is prefixed.
    for experiment in experiments.values_mut() {
        experiment.name = match experiment.name.rsplit_once('/') {
            Some((dir, base)) => format!("{}/{}{}", dir, prefix, base),
            None => format!("{}{}", prefix, experiment.name),
        };
        experiment.tags.push(dev_tag.clone());
    }

    for endpoint in model_serving_endpoints.values_mut() {
        endpoint.name = format!("{}{}", underscore_prefix, endpoint.name);
    }

    for model in registered_models.values_mut() {
        model.name = format!("{}{}", underscore_prefix, model.name);
    }
}

/// Every job declares its own `run_as`.
fn is_run_as_set(resources: &Resources) -> bool {
    resources.jobs.values().all(|job| job.run_as.is_some())
}

fn validate_production_mode(b: &Bundle) -> Diagnostics {
    if b.config.bundle.git.inferred {
        tracing::warn!(
            "target with 'mode: production' should specify an explicit 'targets.{}.git' configuration",
            b.config.bundle.target
        );
    }

    if b.config.resources.pipelines.values().any(|p| p.development) {
        return Diagnostics::error(
            DiagId::TargetModeError,
            "target with 'mode: production' cannot include a pipeline with 'development: true'",
        );
    }

    // A single deployment per target is enforced by an explicit root or run_as.
    if !b.config.target_sets_root_path() && !is_run_as_set(&b.config.resources) {
        if is_service_principal(b.current_user_name()) {
            return Diagnostics::warning(
                DiagId::TargetModeError,
                "target with 'mode: production' should specify explicit 'workspace.root_path' to make sure only one copy is deployed",
            );
        }
        return Diagnostics::error(
            DiagId::TargetModeError,
            "target with 'mode: production' must specify explicit 'workspace.root_path' to make sure only one copy is deployed",
        );
    }

    Diagnostics::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{
            Continuous, CronSchedule, CurrentUser, Experiment, Job, Model, Pipeline,
            RegisteredModel, Root, RunAs, ServingEndpoint, Target, Trigger, Workspace,
        },
        mutator::{apply, testing::*},
        tags::Cloud,
    };

    const USER: &str = "lennart@company.com";

    fn mock_config(mode: Mode) -> Root {
        let mut config = Root::default();
        config.bundle.target = "dev".into();
        config.bundle.mode = mode;
        config.workspace = Workspace {
            root_path: format!("/Users/{}/.bundle/x/y", USER),
            state_path: format!("/Users/{}/.bundle/x/y/state", USER),
            file_path: format!("/Users/{}/.bundle/x/y/files", USER),
            artifact_path: format!("/Users/{}/.bundle/x/y/artifacts", USER),
            current_user: Some(CurrentUser {
                user_name: USER.into(),
                short_name: "lennart".into(),
                id: "1".into(),
                groups: vec![],
            }),
            ..Default::default()
        };

        let r = &mut config.resources;
        r.jobs.insert(
            "job1".into(),
            Job {
                name: "job1".into(),
                schedule: Some(CronSchedule {
                    quartz_cron_expression: "* * * * *".into(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        r.jobs.insert(
            "job2".into(),
            Job {
                name: "job2".into(),
                schedule: Some(CronSchedule {
                    quartz_cron_expression: "* * * * *".into(),
                    pause_status: Some(PauseStatus::Unpaused),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        r.jobs.insert(
            "job3".into(),
            Job {
                name: "job3".into(),
                continuous: Some(Continuous::default()),
                trigger: Some(Trigger::default()),
                max_concurrent_runs: 7,
                ..Default::default()
            },
        );
        r.pipelines.insert(
            "pipeline1".into(),
            Pipeline {
                name: "pipeline1".into(),
                ..Default::default()
            },
        );
        r.experiments.insert(
            "experiment1".into(),
            Experiment {
                name: "/Users/lennart.kats@databricks.com/experiment1".into(),
                ..Default::default()
            },
        );
        r.experiments.insert(
            "experiment2".into(),
            Experiment {
                name: "experiment2".into(),
                ..Default::default()
            },
        );
        r.models.insert(
            "model1".into(),
            Model {
                name: "model1".into(),
                ..Default::default()
            },
        );
        r.model_serving_endpoints.insert(
            "servingendpoint1".into(),
            ServingEndpoint {
                name: "servingendpoint1".into(),
                ..Default::default()
            },
        );
        r.registered_models.insert(
            "registeredmodel1".into(),
            RegisteredModel {
                name: "registeredmodel1".into(),
                ..Default::default()
            },
        );
        config
    }

    async fn run(config: Root, cloud: Cloud) -> (Bundle, Diagnostics) {
        let dir = tempdir::TempDir::new("mode").unwrap();
        let (ctx, _) = context(&dir, user(USER));
        let mut b = bundle(&dir, config);
        b.tagging = cloud;
        let diags = apply(&ctx, &mut b, &ProcessTargetMode).await;
        (b, diags)
    }

    #[tokio::test]
    async fn test_development_mode_renames_tags_and_pauses() {
        let (b, diags) = run(mock_config(Mode::Development), Cloud::Aws).await;
        assert!(diags.is_empty(), "{:?}", diags);
        let r = &b.config.resources;

        assert_eq!(r.jobs["job1"].name, "[dev lennart] job1");
        assert_eq!(r.jobs["job1"].tags["dev"], "lennart");
        assert_eq!(r.jobs["job1"].max_concurrent_runs, DEVELOPMENT_CONCURRENT_RUNS);
        assert_eq!(r.jobs["job3"].max_concurrent_runs, 7);

        assert_eq!(
            r.jobs["job1"].schedule.as_ref().unwrap().pause_status,
            Some(PauseStatus::Paused)
        );
        assert_eq!(
            r.jobs["job2"].schedule.as_ref().unwrap().pause_status,
            Some(PauseStatus::Unpaused)
        );
        assert_eq!(
            r.jobs["job3"].continuous.as_ref().unwrap().pause_status,
            Some(PauseStatus::Paused)
        );
        assert_eq!(
            r.jobs["job3"].trigger.as_ref().unwrap().pause_status,
            Some(PauseStatus::Paused)
        );

        assert_eq!(r.pipelines["pipeline1"].name, "[dev lennart] pipeline1");
        assert!(r.pipelines["pipeline1"].development);

        assert_eq!(
            r.experiments["experiment1"].name,
            "/Users/lennart.kats@databricks.com/[dev lennart] experiment1"
        );
        assert_eq!(r.experiments["experiment2"].name, "[dev lennart] experiment2");
        assert_eq!(r.experiments["experiment1"].tags[0].key, "dev");

        assert_eq!(r.models["model1"].name, "[dev lennart] model1");
        assert_eq!(
            r.model_serving_endpoints["servingendpoint1"].name,
            "dev_lennart_servingendpoint1"
        );
        assert_eq!(r.registered_models["registeredmodel1"].name, "dev_lennart_registeredmodel1");

        assert_eq!(b.config.bundle.deployment.lock.enabled, Some(false));
    }

    #[tokio::test]
    async fn test_development_mode_prefixes_every_name_once() {
        let (mut b, _) = run(mock_config(Mode::Development), Cloud::Aws).await;
        for (_, resource) in b.config.resources.iter_mut() {
            let name = resource.name().to_string();
            let base = name.rsplit('/').next().unwrap_or(&name);
            let prefixed = base.starts_with("[dev lennart] ") || base.starts_with("dev_lennart_");
            assert!(prefixed, "{} is not prefixed", name);
            assert_eq!(name.matches("lennart]").count() + name.matches("dev_lennart_").count(), 1);
        }
    }

    #[tokio::test]
    async fn test_development_mode_keeps_explicitly_enabled_lock() {
        let mut config = mock_config(Mode::Development);
        config.bundle.deployment.lock.enabled = Some(true);
        let (b, _) = run(config, Cloud::Aws).await;
        assert_eq!(b.config.bundle.deployment.lock.enabled, Some(true));
    }

    #[tokio::test]
    async fn test_development_mode_tag_normalization_per_cloud() {
        let mut config = mock_config(Mode::Development);
        config.workspace.current_user.as_mut().unwrap().short_name = "Héllö wörld?!".into();

        let (b, _) = run(config.clone(), Cloud::Aws).await;
        assert_eq!(b.config.resources.jobs["job1"].tags["dev"], "Hello world__");

        let (b, _) = run(config.clone(), Cloud::Azure).await;
        assert_eq!(b.config.resources.jobs["job1"].tags["dev"], "Héllö wörld?!");

        let (b, _) = run(config, Cloud::Gcp).await;
        assert_eq!(b.config.resources.jobs["job1"].tags["dev"], "Hello_world");
    }

    #[tokio::test]
    async fn test_development_mode_rejects_shared_root_before_mutating() {
        let mut config = mock_config(Mode::Development);
        config.workspace.root_path = "/Shared/x".into();

        let (b, diags) = run(config, Cloud::Aws).await;
        assert!(diags.has_error());
        assert_eq!(
            diags[0].summary,
            "root_path must start with '~/' or contain the current username when using 'mode: development'"
        );
        assert_eq!(b.config.resources.jobs["job1"].name, "job1");
    }

    #[tokio::test]
    async fn test_development_mode_names_offending_state_path() {
        let mut config = mock_config(Mode::Development);
        config.workspace.state_path = "/Shared/state".into();

        let (_, diags) = run(config, Cloud::Aws).await;
        assert!(diags[0].summary.starts_with("state_path must start with"));
    }

    #[tokio::test]
    async fn test_production_mode_rejects_development_pipeline() {
        let mut config = mock_config(Mode::Production);
        config.resources.pipelines.get_mut("pipeline1").unwrap().development = true;

        let (_, diags) = run(config, Cloud::Aws).await;
        assert_eq!(
            diags[0].summary,
            "target with 'mode: production' cannot include a pipeline with 'development: true'"
        );
    }

    #[tokio::test]
    async fn test_production_mode_requires_root_or_run_as_for_humans() {
        let (_, diags) = run(mock_config(Mode::Production), Cloud::Aws).await;
        assert!(diags.has_error());
        assert!(diags[0].summary.contains("must specify explicit 'workspace.root_path'"));
    }

    #[tokio::test]
    async fn test_production_mode_only_warns_for_service_principals() {
        let mut config = mock_config(Mode::Production);
        config.workspace.current_user.as_mut().unwrap().user_name =
            "1d410060-a513-496f-a197-23cc82e5f46d".into();

        let (_, diags) = run(config, Cloud::Aws).await;
        assert!(!diags.has_error());
        assert_eq!(diags.warnings().count(), 1);
    }

    #[tokio::test]
    async fn test_production_mode_accepts_explicit_root() {
        let mut config = mock_config(Mode::Production);
        config.targets.insert(
            "dev".into(),
            Target {
                workspace: Some(Workspace {
                    root_path: "/Shared/x".into(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );

        let (_, diags) = run(config, Cloud::Aws).await;
        assert!(diags.is_empty());
    }

    #[tokio::test]
    async fn test_production_mode_accepts_run_as_on_every_job() {
        let mut config = mock_config(Mode::Production);
        for job in config.resources.jobs.values_mut() {
            job.run_as = Some(RunAs {
                user_name: Some(USER.into()),
                service_principal_name: None,
            });
        }

        let (_, diags) = run(config, Cloud::Aws).await;
        assert!(diags.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_mode_is_fatal() {
        let (_, diags) = run(mock_config(Mode::Other("staging".into())), Cloud::Aws).await;
        assert_eq!(
            diags[0].summary,
            "unsupported value 'staging' specified for 'mode': must be either 'development' or 'production'"
        );
    }

    #[tokio::test]
    async fn test_unset_mode_is_noop() {
        let (b, diags) = run(mock_config(Mode::Unset), Cloud::Aws).await;
        assert!(diags.is_empty());
        assert_eq!(b.config.resources.jobs["job1"].name, "job1");
    }
}
