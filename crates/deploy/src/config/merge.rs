//! Typed deep merge used to layer a target over the root configuration.
//!
//! Rules: scalars from the overlay win when they are set, maps merge per key,
//! lists append. Leaf structs without a meaningful field-wise merge are replaced.

use std::collections::BTreeMap;

use super::{
    Artifact, DeploymentConfig, Git, LockConfig, Mode, RunAs, Target, Workspace,
    resources::{
        Continuous, CronSchedule, Experiment, Job, JobDeployment, Model, PauseStatus, Permission,
        Pipeline, RegisteredModel, Resources, ServingEndpoint, Tag, Task, Trigger,
    },
};

pub trait Merge {
    /// Layer `other` on top of `self`.
    fn merge(&mut self, other: Self);
}

impl Merge for String {
    fn merge(&mut self, other: Self) {
        if !other.is_empty() {
            *self = other;
        }
    }
}

impl Merge for u32 {
    fn merge(&mut self, other: Self) {
        if other != 0 {
            *self = other;
        }
    }
}

impl Merge for bool {
    fn merge(&mut self, other: Self) {
        *self |= other;
    }
}

impl<T: Merge> Merge for Option<T> {
    fn merge(&mut self, other: Self) {
        let Some(other) = other else {
            return;
        };
        if let Some(current) = self {
            current.merge(other);
        } else {
            *self = Some(other);
        }
    }
}

impl<T: Merge> Merge for BTreeMap<String, T> {
    fn merge(&mut self, other: Self) {
        for (key, value) in other {
            match self.get_mut(&key) {
                Some(current) => current.merge(value),
                None => {
                    self.insert(key, value);
                }
            }
        }
    }
}

impl Merge for Vec<Permission> {
    fn merge(&mut self, other: Self) {
        self.extend(other);
    }
}

impl Merge for Vec<Tag> {
    fn merge(&mut self, other: Self) {
        self.extend(other);
    }
}

impl Merge for Vec<serde_json::Value> {
    fn merge(&mut self, other: Self) {
        self.extend(other);
    }
}

/// Tasks are keyed by `task_key`: an overlay task replaces the base task with the same key.
impl Merge for Vec<Task> {
    fn merge(&mut self, other: Self) {
        for task in other {
            match self.iter_mut().find(|t| t.task_key == task.task_key) {
                Some(existing) => *existing = task,
                None => self.push(task),
            }
        }
    }
}

macro_rules! merge_by_replace {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Merge for $ty {
                fn merge(&mut self, other: Self) {
                    *self = other;
                }
            }
        )*
    };
}

merge_by_replace!(
    Mode,
    PauseStatus,
    CronSchedule,
    Continuous,
    Trigger,
    JobDeployment,
    RunAs,
    LockConfig,
    serde_json::Value,
);

impl Merge for Git {
    fn merge(&mut self, other: Self) {
        self.origin_url.merge(other.origin_url);
        self.branch.merge(other.branch);
        self.commit.merge(other.commit);
    }
}

impl Merge for DeploymentConfig {
    fn merge(&mut self, other: Self) {
        self.lock.merge(other.lock);
    }
}

impl Merge for Workspace {
    fn merge(&mut self, other: Self) {
        self.host.merge(other.host);
        self.root_path.merge(other.root_path);
        self.state_path.merge(other.state_path);
        self.file_path.merge(other.file_path);
        self.artifact_path.merge(other.artifact_path);
    }
}

impl Merge for Job {
    fn merge(&mut self, other: Self) {
        self.name.merge(other.name);
        self.permissions.merge(other.permissions);
        self.tags.extend(other.tags);
        self.max_concurrent_runs.merge(other.max_concurrent_runs);
        self.schedule.merge(other.schedule);
        self.continuous.merge(other.continuous);
        self.trigger.merge(other.trigger);
        self.run_as.merge(other.run_as);
        self.tasks.merge(other.tasks);
    }
}

impl Merge for Pipeline {
    fn merge(&mut self, other: Self) {
        self.name.merge(other.name);
        self.permissions.merge(other.permissions);
        self.development.merge(other.development);
        self.catalog.merge(other.catalog);
        self.target.merge(other.target);
        self.libraries.merge(other.libraries);
    }
}

impl Merge for Experiment {
    fn merge(&mut self, other: Self) {
        self.name.merge(other.name);
        self.permissions.merge(other.permissions);
        self.tags.merge(other.tags);
    }
}

impl Merge for Model {
    fn merge(&mut self, other: Self) {
        self.name.merge(other.name);
        self.permissions.merge(other.permissions);
        self.description.merge(other.description);
        self.tags.merge(other.tags);
    }
}

impl Merge for ServingEndpoint {
    fn merge(&mut self, other: Self) {
        self.name.merge(other.name);
        self.permissions.merge(other.permissions);
        self.config.merge(other.config);
    }
}

impl Merge for RegisteredModel {
    fn merge(&mut self, other: Self) {
        self.name.merge(other.name);
        self.catalog_name.merge(other.catalog_name);
        self.schema_name.merge(other.schema_name);
        self.comment.merge(other.comment);
    }
}

impl Merge for Resources {
    fn merge(&mut self, other: Self) {
        self.jobs.merge(other.jobs);
        self.pipelines.merge(other.pipelines);
        self.experiments.merge(other.experiments);
        self.models.merge(other.models);
        self.model_serving_endpoints.merge(other.model_serving_endpoints);
        self.registered_models.merge(other.registered_models);
    }
}

impl Merge for Artifact {
    fn merge(&mut self, other: Self) {
        self.kind.merge(other.kind);
        self.path.merge(other.path);
        self.build.merge(other.build);
        if !other.files.is_empty() {
            self.files = other.files;
        }
    }
}

impl super::Root {
    /// Merge a target fragment into the root. The targets map itself is left untouched.
    pub fn merge_target(&mut self, target: Target) {
        if let Some(mode) = target.mode {
            self.bundle.mode = mode;
        }
        if let Some(compute_id) = target.compute_id {
            self.bundle.compute_id.merge(compute_id);
        }
        if let Some(git) = target.git {
            self.bundle.git.merge(git);
        }
        if let Some(deployment) = target.deployment {
            self.bundle.deployment.merge(deployment);
        }
        if let Some(workspace) = target.workspace {
            self.workspace.merge(workspace);
        }
        self.run_as.merge(target.run_as);
        self.permissions.merge(target.permissions);
        if let Some(resources) = target.resources {
            self.resources.merge(resources);
        }
        self.artifacts.merge(target.artifacts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Root;

    #[test]
    fn test_scalars_override_only_when_set() {
        let mut ws = Workspace {
            host: "https://a".into(),
            root_path: "/base".into(),
            ..Default::default()
        };
        ws.merge(Workspace {
            root_path: "/override".into(),
            ..Default::default()
        });
        assert_eq!(ws.host, "https://a");
        assert_eq!(ws.root_path, "/override");
    }

    #[test]
    fn test_resources_merge_per_key() {
        let mut base = Resources::default();
        base.jobs.insert(
            "a".into(),
            Job {
                name: "a".into(),
                permissions: vec![Permission::user("CAN_VIEW", "x")],
                ..Default::default()
            },
        );

        let mut overlay = Resources::default();
        overlay.jobs.insert(
            "a".into(),
            Job {
                max_concurrent_runs: 2,
                permissions: vec![Permission::user("CAN_MANAGE", "y")],
                ..Default::default()
            },
        );
        overlay.jobs.insert("b".into(), Job::default());

        base.merge(overlay);
        assert_eq!(base.jobs.len(), 2);
        assert_eq!(base.jobs["a"].name, "a");
        assert_eq!(base.jobs["a"].max_concurrent_runs, 2);
        assert_eq!(base.jobs["a"].permissions.len(), 2);
    }

    #[test]
    fn test_tasks_replace_by_key() {
        let mut tasks = vec![
            Task {
                task_key: "a".into(),
                job_cluster_key: "small".into(),
                ..Default::default()
            },
            Task {
                task_key: "b".into(),
                ..Default::default()
            },
        ];
        tasks.merge(vec![Task {
            task_key: "a".into(),
            existing_cluster_id: "c-1".into(),
            ..Default::default()
        }]);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].existing_cluster_id, "c-1");
        assert!(tasks[0].job_cluster_key.is_empty());
    }

    #[test]
    fn test_merge_target_sets_mode_and_run_as() {
        let mut root = Root::default();
        root.merge_target(Target {
            mode: Some(Mode::Production),
            run_as: Some(RunAs {
                service_principal_name: Some("sp".into()),
                ..Default::default()
            }),
            ..Default::default()
        });
        assert_eq!(root.bundle.mode, Mode::Production);
        assert_eq!(root.run_as.unwrap().identity(), Some("sp"));
    }
}
