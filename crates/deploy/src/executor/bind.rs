//! Binding existing remote resources to configured ones, and undoing it.

use async_trait::async_trait;

use crate::{
    bundle::Bundle,
    config::ResourceKind,
    context::Context,
    diag::{DiagId, Diagnostics},
    mutator::Mutator,
    state::{STATE_FILENAME, local_state_path},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindOptions {
    pub kind: ResourceKind,
    pub key: String,
    /// Remote id of the existing resource.
    pub id: String,
    pub auto_approve: bool,
}

impl BindOptions {
    pub fn address(&self) -> String {
        address(self.kind, &self.key)
    }
}

fn address(kind: ResourceKind, key: &str) -> String {
    format!("{}.{}", kind.executor_type(), key)
}

/// Imports an existing remote resource into the deployment state.
///
/// The import is planned against a scratch copy of the state. If the remote
/// resource differs from its configuration the next deploy would change it, so
/// the bind is refused unless auto-approved.
pub struct Import {
    opts: BindOptions,
}

impl Import {
    pub fn new(opts: BindOptions) -> Self {
        Self { opts }
    }
}

#[async_trait]
impl Mutator for Import {
    fn name(&self) -> &str {
        "executor.Import"
    }

    async fn apply(&self, ctx: &Context, b: &mut Bundle) -> Diagnostics {
        if b.config.resources.get_mut(self.opts.kind, &self.opts.key).is_none() {
            return Diagnostics::error(
                DiagId::ConfigurationError,
                format!("no such resource: {}.{}", self.opts.kind, self.opts.key),
            );
        }

        let paths = b.executor_dir().and_then(|d| Ok((d, local_state_path(b)?)));
        let (dir, local_state) = match paths {
            Ok(paths) => paths,
            Err(e) => return Diagnostics::from_err(DiagId::IoError, e),
        };

        if let Err(e) = ctx.executor.init(&dir).await {
            return Diagnostics::from_err(
                DiagId::ExecutorSetupError,
                e.context("Failed to initialize executor"),
            );
        }

        let scratch = match tempdir::TempDir::new("state") {
            Ok(scratch) => scratch,
            Err(e) => return Diagnostics::from_err(DiagId::IoError, e),
        };
        let scratch_state = scratch.path().join(STATE_FILENAME);
        if local_state.exists()
            && let Err(e) = std::fs::copy(&local_state, &scratch_state)
        {
            return Diagnostics::from_err(DiagId::IoError, e);
        }

        let address = self.opts.address();
        if let Err(e) = ctx
            .executor
            .import(&dir, &scratch_state, &address, &self.opts.id)
            .await
        {
            return Diagnostics::error(DiagId::ExecutorError, format!("executor import: {:#}", e));
        }

        let plan = match ctx
            .executor
            .plan(&dir, Some(&scratch_state), Some(&address))
            .await
        {
            Ok(plan) => plan,
            Err(e) => {
                return Diagnostics::error(DiagId::ExecutorError, format!("executor plan: {:#}", e));
            }
        };

        if plan.changed && !self.opts.auto_approve {
            return Diagnostics::error(
                DiagId::AbortedError,
                format!(
                    "import aborted: {} differs from its configuration and would be changed on the next deploy. Re-run with --auto-approve to accept",
                    address
                ),
            );
        }

        if let Err(e) = std::fs::copy(&scratch_state, &local_state) {
            return Diagnostics::from_err(DiagId::IoError, e);
        }
        tracing::info!(address = %address, id = %self.opts.id, "Resource bound");
        Diagnostics::new()
    }
}

/// Removes a resource from the deployment state, leaving the remote resource alone.
pub struct Unbind {
    kind: ResourceKind,
    key: String,
}

impl Unbind {
    pub fn new(kind: ResourceKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }
}

#[async_trait]
impl Mutator for Unbind {
    fn name(&self) -> &str {
        "executor.Unbind"
    }

    async fn apply(&self, ctx: &Context, b: &mut Bundle) -> Diagnostics {
        let dir = match b.executor_dir() {
            Ok(dir) => dir,
            Err(e) => return Diagnostics::from_err(DiagId::IoError, e),
        };
        if let Err(e) = ctx.executor.init(&dir).await {
            return Diagnostics::from_err(
                DiagId::ExecutorSetupError,
                e.context("Failed to initialize executor"),
            );
        }

        let address = address(self.kind, &self.key);
        if let Err(e) = ctx.executor.state_rm(&dir, &address).await {
            return Diagnostics::error(DiagId::ExecutorError, format!("executor state rm: {:#}", e));
        }
        tracing::info!(address = %address, "Resource unbound");
        Diagnostics::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::Path,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{
        config::{Job, Root},
        executor::{Executor, Plan},
        mutator::{apply, testing::*},
        state::{SUPPORTED_STATE_VERSION, StateRecord, StateResource},
    };

    /// Writes a state entry for every import and records state removals.
    #[derive(Default)]
    struct Recording {
        changed: bool,
        removed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Executor for Recording {
        async fn init(&self, _working_dir: &Path) -> anyhow::Result<()> {
            Ok(())
        }
        async fn plan(
            &self,
            _w: &Path,
            state: Option<&Path>,
            _t: Option<&str>,
        ) -> anyhow::Result<Plan> {
            assert!(state.is_some_and(Path::exists));
            Ok(Plan {
                changed: self.changed,
            })
        }
        async fn apply(&self, _working_dir: &Path) -> anyhow::Result<()> {
            Ok(())
        }
        async fn import(
            &self,
            _w: &Path,
            state_out: &Path,
            address: &str,
            id: &str,
        ) -> anyhow::Result<()> {
            let mut state = StateRecord::load(state_out)?;
            let (kind, key) = address.split_once('.').unwrap_or_default();
            state.resources.push(StateResource {
                kind: kind.into(),
                key: key.into(),
                remote_id: id.into(),
                deployment_metadata_path: String::new(),
            });
            state.save(state_out)
        }
        async fn state_rm(&self, _w: &Path, address: &str) -> anyhow::Result<()> {
            self.removed.lock().unwrap().push(address.to_string());
            Ok(())
        }
    }

    fn opts(auto_approve: bool) -> BindOptions {
        BindOptions {
            kind: ResourceKind::Jobs,
            key: "nightly".into(),
            id: "123".into(),
            auto_approve,
        }
    }

    async fn bind(
        executor: Recording,
        opts: BindOptions,
    ) -> (tempdir::TempDir, Bundle, Diagnostics) {
        let dir = tempdir::TempDir::new("bind").unwrap();
        let (_, ws) = context(&dir, user("alice@acme.com"));
        let ctx = Context::new(Arc::new(ws), Arc::new(executor));
        let mut config = Root::default();
        config.bundle.target = "dev".into();
        config.resources.jobs.insert("nightly".into(), Job::default());
        let mut b = bundle(&dir, config);
        let diags = apply(&ctx, &mut b, &Import::new(opts)).await;
        (dir, b, diags)
    }

    #[tokio::test]
    async fn test_import_without_changes_updates_state() {
        let (_dir, b, diags) = bind(Recording::default(), opts(false)).await;
        assert!(diags.is_empty());

        let state = StateRecord::load(&local_state_path(&b).unwrap()).unwrap();
        assert_eq!(state.version, SUPPORTED_STATE_VERSION);
        assert_eq!(state.resources[0].kind, "bundle_job");
        assert_eq!(state.resources[0].remote_id, "123");
    }

    #[tokio::test]
    async fn test_import_with_changes_requires_approval() {
        let executor = Recording {
            changed: true,
            ..Default::default()
        };
        let (_dir, b, diags) = bind(executor, opts(false)).await;
        assert!(diags.contains_id(DiagId::AbortedError));
        assert!(!local_state_path(&b).unwrap().exists());

        let executor = Recording {
            changed: true,
            ..Default::default()
        };
        let (_dir, _, diags) = bind(executor, opts(true)).await;
        assert!(diags.is_empty());
    }

    #[tokio::test]
    async fn test_import_unknown_resource() {
        let mut opts = opts(false);
        opts.key = "missing".into();
        let (_dir, _, diags) = bind(Recording::default(), opts).await;
        assert_eq!(diags[0].summary, "no such resource: jobs.missing");
    }

    #[tokio::test]
    async fn test_unbind_removes_address() {
        let dir = tempdir::TempDir::new("unbind").unwrap();
        let (_, ws) = context(&dir, user("alice@acme.com"));
        let executor = Arc::new(Recording::default());
        let ctx = Context::new(Arc::new(ws), executor.clone());
        let mut config = Root::default();
        config.bundle.target = "dev".into();
        let mut b = bundle(&dir, config);

        let diags = apply(&ctx, &mut b, &Unbind::new(ResourceKind::Pipelines, "dlt")).await;
        assert!(diags.is_empty());
        assert_eq!(*executor.removed.lock().unwrap(), vec!["bundle_pipeline.dlt"]);
    }
}
