//! Per-invocation context threaded through every mutator.

use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::watch;

use crate::{executor::Executor, workspace::WorkspaceClient};

/// Environment variable holding a compute override for development deployments.
pub const COMPUTE_ID_ENV: &str = "BUNDLE_COMPUTE_ID";

/// Cooperative cancellation shared by a pipeline invocation.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled. Never resolves otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

/// Collaborators and inputs shared by all mutators of one invocation.
#[derive(Clone)]
pub struct Context {
    pub workspace: Arc<dyn WorkspaceClient>,
    pub executor: Arc<dyn Executor>,
    env: BTreeMap<String, String>,
    cancel: CancelToken,
}

impl Context {
    pub fn new(workspace: Arc<dyn WorkspaceClient>, executor: Arc<dyn Executor>) -> Self {
        Self {
            workspace,
            executor,
            env: BTreeMap::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Snapshot of the environment variables mutators may consult.
    pub fn with_env(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env = env.into_iter().collect();
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn env(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// A copy of this context that is never cancelled, for cleanup steps.
    pub fn detached(&self) -> Self {
        Self {
            cancel: CancelToken::new(),
            ..self.clone()
        }
    }
}
