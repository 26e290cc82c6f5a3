//! Deployment state written by the executor, merged back into configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    bundle::Bundle,
    config::{ResourceKind, Root},
    context::Context,
    diag::{DiagId, Diagnostics},
    mutator::Mutator,
};

/// The only state schema version this engine reads.
pub const SUPPORTED_STATE_VERSION: u32 = 4;

/// State file name, both in the executor working directory and remotely under the state path.
pub const STATE_FILENAME: &str = "deployment.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateResource {
    /// Executor type, e.g. `bundle_job`.
    #[serde(rename = "type")]
    pub kind: String,
    pub key: String,
    pub remote_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub deployment_metadata_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub version: u32,
    #[serde(default)]
    pub resources: Vec<StateResource>,
}

impl Default for StateRecord {
    fn default() -> Self {
        Self {
            version: SUPPORTED_STATE_VERSION,
            resources: Vec::new(),
        }
    }
}

impl StateRecord {
    /// Read a state file. A missing file is an empty state at the supported version.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No local deployment state");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read deployment state from {}", path.display()))?;
        serde_json::from_str(&content)
            .context(format!("Failed to parse deployment state {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize deployment state")?;
        std::fs::write(path, content)
            .context(format!("Failed to write deployment state to {}", path.display()))
    }

    /// Copy remote ids into the matching configured resources.
    ///
    /// Resources missing from the state keep an empty id; state entries with no
    /// configured resource are ignored.
    pub fn merge_into(&self, config: &mut Root) {
        for entry in &self.resources {
            let Some(kind) = ResourceKind::from_executor_type(&entry.kind) else {
                tracing::debug!(
                    kind = %entry.kind,
                    key = %entry.key,
                    "Ignoring state entry of unknown type"
                );
                continue;
            };
            match config.resources.get_mut(kind, &entry.key) {
                Some(mut resource) => resource.set_id(entry.remote_id.clone()),
                None => {
                    tracing::debug!(
                        kind = %kind,
                        key = %entry.key,
                        "Ignoring state entry without configuration"
                    )
                }
            }
        }
    }
}

/// Path of the local state file.
pub fn local_state_path(b: &Bundle) -> Result<PathBuf> {
    Ok(b.executor_dir()?.join(STATE_FILENAME))
}

/// Path of the remote state file.
pub fn remote_state_path(b: &Bundle) -> String {
    format!(
        "{}/{}",
        b.config.workspace.state_path.trim_end_matches('/'),
        STATE_FILENAME
    )
}

fn validate(state: &StateRecord, error_on_empty: bool) -> Result<(), String> {
    if state.version != SUPPORTED_STATE_VERSION {
        return Err(format!(
            "unsupported deployment state version: {}. Try re-deploying the bundle",
            state.version
        ));
    }
    if error_on_empty && state.resources.is_empty() {
        return Err(
            "no deployment state. Did you forget to run 'bundlectl deploy'?".to_string(),
        );
    }
    Ok(())
}

/// Loads the local deployment state and merges remote ids into the configuration.
#[derive(Debug, Default)]
pub struct Load {
    error_on_empty: bool,
}

impl Load {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat an empty state as an error, for commands that need a prior deployment.
    pub fn error_on_empty(mut self) -> Self {
        self.error_on_empty = true;
        self
    }
}

#[async_trait]
impl Mutator for Load {
    fn name(&self) -> &str {
        "state.Load"
    }

    async fn apply(&self, _ctx: &Context, b: &mut Bundle) -> Diagnostics {
        let state = match local_state_path(b).and_then(|path| StateRecord::load(&path)) {
            Ok(state) => state,
            Err(e) => return Diagnostics::from_err(DiagId::StateError, e),
        };

        if let Err(msg) = validate(&state, self.error_on_empty) {
            return Diagnostics::error(DiagId::StateError, msg);
        }

        state.merge_into(&mut b.config);
        tracing::debug!(resources = state.resources.len(), "Deployment state loaded");
        Diagnostics::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Job, Pipeline},
        mutator::{apply, testing::*},
    };

    fn entry(kind: &str, key: &str, id: &str) -> StateResource {
        StateResource {
            kind: kind.into(),
            key: key.into(),
            remote_id: id.into(),
            deployment_metadata_path: String::new(),
        }
    }

    fn config() -> Root {
        let mut config = Root::default();
        config.bundle.target = "dev".into();
        config.resources.jobs.insert("nightly".into(), Job::default());
        config.resources.jobs.insert("fresh".into(), Job::default());
        config.resources.pipelines.insert("dlt".into(), Pipeline::default());
        config
    }

    async fn load(state: Option<StateRecord>, m: Load) -> (Bundle, Diagnostics) {
        let dir = tempdir::TempDir::new("state").unwrap();
        let (ctx, _) = context(&dir, user("alice@acme.com"));
        let mut b = bundle(&dir, config());
        if let Some(state) = state {
            state.save(&local_state_path(&b).unwrap()).unwrap();
        }
        let diags = apply(&ctx, &mut b, &m).await;
        (b, diags)
    }

    #[test]
    fn test_merge_assigns_ids_and_ignores_orphans() {
        let mut root = config();
        let state = StateRecord {
            version: SUPPORTED_STATE_VERSION,
            resources: vec![
                entry("bundle_job", "nightly", "101"),
                entry("bundle_pipeline", "dlt", "p-1"),
                entry("bundle_job", "deleted", "102"),
                entry("bundle_cluster", "x", "c-1"),
            ],
        };

        state.merge_into(&mut root);
        assert_eq!(root.resources.jobs["nightly"].id, "101");
        assert_eq!(root.resources.jobs["fresh"].id, "");
        assert_eq!(root.resources.pipelines["dlt"].id, "p-1");
        assert!(!root.resources.jobs.contains_key("deleted"));
    }

    #[tokio::test]
    async fn test_load_merges_state() {
        let state = StateRecord {
            version: SUPPORTED_STATE_VERSION,
            resources: vec![entry("bundle_job", "nightly", "101")],
        };
        let (b, diags) = load(Some(state), Load::new()).await;
        assert!(diags.is_empty());
        assert_eq!(b.config.resources.jobs["nightly"].id, "101");
    }

    #[tokio::test]
    async fn test_unsupported_version_is_fatal() {
        let state = StateRecord {
            version: 999,
            resources: vec![entry("bundle_job", "nightly", "101")],
        };
        let (b, diags) = load(Some(state), Load::new()).await;
        assert!(diags.contains_id(DiagId::StateError));
        assert!(diags[0].summary.contains("unsupported deployment state version: 999"));
        assert_eq!(b.config.resources.jobs["nightly"].id, "");
    }

    #[tokio::test]
    async fn test_empty_state_only_fatal_when_requested() {
        let (_, diags) = load(Some(StateRecord::default()), Load::new()).await;
        assert!(diags.is_empty());

        let (_, diags) = load(Some(StateRecord::default()), Load::new().error_on_empty()).await;
        assert!(diags[0].summary.contains("Did you forget to run"));
    }

    #[tokio::test]
    async fn test_missing_state_is_first_deploy() {
        let (_, diags) = load(None, Load::new()).await;
        assert!(diags.is_empty());

        let (_, diags) = load(None, Load::new().error_on_empty()).await;
        assert!(diags.has_error());
    }
}
