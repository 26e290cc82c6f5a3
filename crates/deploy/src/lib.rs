//! bundlectl-deploy - Declarative deployment of bundle resources.
//!
//! A bundle is a `bundle.toml` describing jobs, pipelines and other workspace
//! resources plus per-target overrides. Deploying it runs a pipeline of
//! [`Mutator`]s over the in-memory configuration, grouped into [`phases`], each
//! step reporting [`Diagnostics`] instead of failing.

pub mod artifacts;
pub mod bundle;
pub mod config;
pub mod context;
pub mod diag;
pub mod executor;
pub mod files;
pub mod lock;
pub mod metadata;
pub mod mutator;
pub mod permissions;
pub mod phases;
pub mod state;
pub mod tags;
pub mod workspace;

pub use bundle::Bundle;
pub use config::{ResourceKind, Root};
pub use context::{CancelToken, Context};
pub use diag::{DiagId, Diagnostic, Diagnostics, Severity};
pub use executor::{BindOptions, Executor, ProcessExecutor};
pub use mutator::{Mutator, apply};
pub use workspace::{LocalWorkspace, RestWorkspaceClient, WorkspaceClient};
