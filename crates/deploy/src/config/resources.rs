//! Typed resource declarations.
//!
//! Each resource kind has its own payload type and its own map in
//! [`Resources`]. Generic passes (renaming, permissions, state merge) go
//! through [`ResourceMut`], a closed enum over the kinds, so adding a kind
//! forces every `match` in the crate to handle it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::RunAs;

/// The closed set of resource kinds.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResourceKind {
    Jobs,
    Pipelines,
    Experiments,
    Models,
    ModelServingEndpoints,
    RegisteredModels,
}

impl ResourceKind {
    /// The resource type name used in executor addresses.
    pub fn executor_type(&self) -> &'static str {
        match self {
            Self::Jobs => "bundle_job",
            Self::Pipelines => "bundle_pipeline",
            Self::Experiments => "bundle_experiment",
            Self::Models => "bundle_model",
            Self::ModelServingEndpoints => "bundle_serving_endpoint",
            Self::RegisteredModels => "bundle_registered_model",
        }
    }

    /// Reverse of [`ResourceKind::executor_type`].
    pub fn from_executor_type(s: &str) -> Option<Self> {
        use strum::IntoEnumIterator;
        Self::iter().find(|k| k.executor_type() == s)
    }
}

/// A principal a permission is granted to. Exactly one identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Principal {
    UserName(String),
    GroupName(String),
    ServicePrincipalName(String),
}

impl Principal {
    pub fn name(&self) -> &str {
        match self {
            Self::UserName(n) | Self::GroupName(n) | Self::ServicePrincipalName(n) => n,
        }
    }
}

/// A (level, principal) pair.
///
/// The level is kept as the wire string: bundle-level entries use the generic
/// levels, resource-level entries use the per-kind concrete levels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Permission {
    pub level: String,
    #[serde(flatten)]
    pub principal: Principal,
}

impl Permission {
    pub fn user(level: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            principal: Principal::UserName(name.into()),
        }
    }

    pub fn group(level: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            principal: Principal::GroupName(name.into()),
        }
    }

    pub fn service_principal(level: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            principal: Principal::ServicePrincipalName(name.into()),
        }
    }
}

/// A key/value tag as used by experiments and models.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PauseStatus {
    Paused,
    Unpaused,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronSchedule {
    pub quartz_cron_expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_status: Option<PauseStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuous {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_status: Option<PauseStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileArrival {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_status: Option<PauseStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_arrival: Option<FileArrival>,
}

/// Deployment provenance written onto jobs so independent deployments can be told apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDeployment {
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub metadata_file_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub existing_cluster_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub job_cluster_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub environment_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_cluster: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notebook_path: Option<String>,
}

impl Task {
    /// Whether the task names any compute that a compute override replaces.
    pub fn uses_compute(&self) -> bool {
        self.new_cluster.is_some()
            || !self.existing_cluster_id.is_empty()
            || !self.environment_key.is_empty()
            || !self.job_cluster_key.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<Permission>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// Zero means "not specified".
    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_concurrent_runs: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<CronSchedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuous: Option<Continuous>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as: Option<RunAs>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<JobDeployment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_mode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub development: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub libraries: Vec<serde_json::Value>,
}

/// An experiment. Its name is a workspace path; only the last segment is display text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experiment {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<Permission>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<Permission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServingEndpoint {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<Permission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

/// A catalog-registered model. Access is governed by catalog grants, so there
/// is no permission list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredModel {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub catalog_name: String,
    #[serde(default)]
    pub schema_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

/// All declared resources, one map per kind keyed by resource key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub jobs: BTreeMap<String, Job>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pipelines: BTreeMap<String, Pipeline>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub experiments: BTreeMap<String, Experiment>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub models: BTreeMap<String, Model>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub model_serving_endpoints: BTreeMap<String, ServingEndpoint>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub registered_models: BTreeMap<String, RegisteredModel>,
}

/// Mutable view over one resource of any kind.
pub enum ResourceMut<'a> {
    Job(&'a mut Job),
    Pipeline(&'a mut Pipeline),
    Experiment(&'a mut Experiment),
    Model(&'a mut Model),
    ServingEndpoint(&'a mut ServingEndpoint),
    RegisteredModel(&'a mut RegisteredModel),
}

impl ResourceMut<'_> {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Job(_) => ResourceKind::Jobs,
            Self::Pipeline(_) => ResourceKind::Pipelines,
            Self::Experiment(_) => ResourceKind::Experiments,
            Self::Model(_) => ResourceKind::Models,
            Self::ServingEndpoint(_) => ResourceKind::ModelServingEndpoints,
            Self::RegisteredModel(_) => ResourceKind::RegisteredModels,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Job(r) => &r.name,
            Self::Pipeline(r) => &r.name,
            Self::Experiment(r) => &r.name,
            Self::Model(r) => &r.name,
            Self::ServingEndpoint(r) => &r.name,
            Self::RegisteredModel(r) => &r.name,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Job(r) => &r.id,
            Self::Pipeline(r) => &r.id,
            Self::Experiment(r) => &r.id,
            Self::Model(r) => &r.id,
            Self::ServingEndpoint(r) => &r.id,
            Self::RegisteredModel(r) => &r.id,
        }
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        match self {
            Self::Job(r) => r.id = id,
            Self::Pipeline(r) => r.id = id,
            Self::Experiment(r) => r.id = id,
            Self::Model(r) => r.id = id,
            Self::ServingEndpoint(r) => r.id = id,
            Self::RegisteredModel(r) => r.id = id,
        }
    }

    /// The resource's own permission list, if the kind has one.
    pub fn permissions_mut(&mut self) -> Option<&mut Vec<Permission>> {
        match self {
            Self::Job(r) => Some(&mut r.permissions),
            Self::Pipeline(r) => Some(&mut r.permissions),
            Self::Experiment(r) => Some(&mut r.permissions),
            Self::Model(r) => Some(&mut r.permissions),
            Self::ServingEndpoint(r) => Some(&mut r.permissions),
            Self::RegisteredModel(_) => None,
        }
    }
}

/// Shared view over one resource of any kind.
#[derive(Debug, Clone, Copy)]
pub enum ResourceRef<'a> {
    Job(&'a Job),
    Pipeline(&'a Pipeline),
    Experiment(&'a Experiment),
    Model(&'a Model),
    ServingEndpoint(&'a ServingEndpoint),
    RegisteredModel(&'a RegisteredModel),
}

impl<'a> ResourceRef<'a> {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Job(_) => ResourceKind::Jobs,
            Self::Pipeline(_) => ResourceKind::Pipelines,
            Self::Experiment(_) => ResourceKind::Experiments,
            Self::Model(_) => ResourceKind::Models,
            Self::ServingEndpoint(_) => ResourceKind::ModelServingEndpoints,
            Self::RegisteredModel(_) => ResourceKind::RegisteredModels,
        }
    }

    pub fn name(&self) -> &'a str {
        match *self {
            Self::Job(r) => &r.name,
            Self::Pipeline(r) => &r.name,
            Self::Experiment(r) => &r.name,
            Self::Model(r) => &r.name,
            Self::ServingEndpoint(r) => &r.name,
            Self::RegisteredModel(r) => &r.name,
        }
    }

    pub fn id(&self) -> &'a str {
        match *self {
            Self::Job(r) => &r.id,
            Self::Pipeline(r) => &r.id,
            Self::Experiment(r) => &r.id,
            Self::Model(r) => &r.id,
            Self::ServingEndpoint(r) => &r.id,
            Self::RegisteredModel(r) => &r.id,
        }
    }
}

impl Resources {
    /// Iterate over every resource of every kind in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, ResourceRef<'_>)> {
        let jobs = self.jobs.iter().map(|(k, r)| (k.as_str(), ResourceRef::Job(r)));
        let pipelines = self
            .pipelines
            .iter()
            .map(|(k, r)| (k.as_str(), ResourceRef::Pipeline(r)));
        let experiments = self
            .experiments
            .iter()
            .map(|(k, r)| (k.as_str(), ResourceRef::Experiment(r)));
        let models = self.models.iter().map(|(k, r)| (k.as_str(), ResourceRef::Model(r)));
        let endpoints = self
            .model_serving_endpoints
            .iter()
            .map(|(k, r)| (k.as_str(), ResourceRef::ServingEndpoint(r)));
        let registered = self
            .registered_models
            .iter()
            .map(|(k, r)| (k.as_str(), ResourceRef::RegisteredModel(r)));

        jobs.chain(pipelines)
            .chain(experiments)
            .chain(models)
            .chain(endpoints)
            .chain(registered)
    }

    /// Mutable counterpart of [`Resources::iter`].
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, ResourceMut<'_>)> {
        let jobs = self.jobs.iter_mut().map(|(k, r)| (k.as_str(), ResourceMut::Job(r)));
        let pipelines = self
            .pipelines
            .iter_mut()
            .map(|(k, r)| (k.as_str(), ResourceMut::Pipeline(r)));
        let experiments = self
            .experiments
            .iter_mut()
            .map(|(k, r)| (k.as_str(), ResourceMut::Experiment(r)));
        let models = self.models.iter_mut().map(|(k, r)| (k.as_str(), ResourceMut::Model(r)));
        let endpoints = self
            .model_serving_endpoints
            .iter_mut()
            .map(|(k, r)| (k.as_str(), ResourceMut::ServingEndpoint(r)));
        let registered = self
            .registered_models
            .iter_mut()
            .map(|(k, r)| (k.as_str(), ResourceMut::RegisteredModel(r)));

        jobs.chain(pipelines)
            .chain(experiments)
            .chain(models)
            .chain(endpoints)
            .chain(registered)
    }

    /// Look up a single resource by kind and key.
    pub fn get_mut(&mut self, kind: ResourceKind, key: &str) -> Option<ResourceMut<'_>> {
        match kind {
            ResourceKind::Jobs => self.jobs.get_mut(key).map(ResourceMut::Job),
            ResourceKind::Pipelines => self.pipelines.get_mut(key).map(ResourceMut::Pipeline),
            ResourceKind::Experiments => self.experiments.get_mut(key).map(ResourceMut::Experiment),
            ResourceKind::Models => self.models.get_mut(key).map(ResourceMut::Model),
            ResourceKind::ModelServingEndpoints => self
                .model_serving_endpoints
                .get_mut(key)
                .map(ResourceMut::ServingEndpoint),
            ResourceKind::RegisteredModels => self
                .registered_models
                .get_mut(key)
                .map(ResourceMut::RegisteredModel),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
            && self.pipelines.is_empty()
            && self.experiments.is_empty()
            && self.models.is_empty()
            && self.model_serving_endpoints.is_empty()
            && self.registered_models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_permission_principal_is_flattened() {
        let p: Permission =
            serde_json::from_str(r#"{"level":"CAN_VIEW","group_name":"admins"}"#).unwrap();
        assert_eq!(p, Permission::group("CAN_VIEW", "admins"));

        let json = serde_json::to_value(Permission::user("CAN_RUN", "alice")).unwrap();
        assert_eq!(json["user_name"], "alice");
        assert_eq!(json["level"], "CAN_RUN");
    }

    #[test]
    fn test_kind_round_trips_through_executor_type() {
        use strum::IntoEnumIterator;
        for kind in ResourceKind::iter() {
            assert_eq!(ResourceKind::from_executor_type(kind.executor_type()), Some(kind));
        }
        assert_eq!(
            ResourceKind::from_str("model_serving_endpoints").unwrap(),
            ResourceKind::ModelServingEndpoints
        );
    }

    #[test]
    fn test_iter_mut_visits_every_kind() {
        let mut r = Resources::default();
        r.jobs.insert("j".into(), Job::default());
        r.pipelines.insert("p".into(), Pipeline::default());
        r.experiments.insert("e".into(), Experiment::default());
        r.models.insert("m".into(), Model::default());
        r.model_serving_endpoints.insert("s".into(), ServingEndpoint::default());
        r.registered_models.insert("r".into(), RegisteredModel::default());

        let kinds: Vec<_> = r.iter_mut().map(|(_, res)| res.kind()).collect();
        assert_eq!(kinds.len(), 6);
        let shared: Vec<_> = r.iter().map(|(_, res)| res.kind()).collect();
        assert_eq!(shared, kinds);

        let mut with_permissions = 0;
        for (_, mut res) in r.iter_mut() {
            if res.permissions_mut().is_some() {
                with_permissions += 1;
            }
        }
        assert_eq!(with_permissions, 5);
    }

    #[test]
    fn test_set_id_through_lookup() {
        let mut r = Resources::default();
        r.pipelines.insert("etl".into(), Pipeline::default());

        r.get_mut(ResourceKind::Pipelines, "etl").unwrap().set_id("p-123");
        assert_eq!(r.pipelines["etl"].id, "p-123");
        assert!(r.get_mut(ResourceKind::Jobs, "etl").is_none());
    }
}
