use std::path::PathBuf;

use bundlectl_deploy::ResourceKind;
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "bundlectl")]
#[command(author, version, about = "Deploy declarative bundles of workspace resources")]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "BUNDLECTL_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// The bundle target to use. Defaults to the target marked `default`.
    #[arg(short, long, env = "BUNDLECTL_TARGET")]
    pub target: Option<String>,

    /// Take over the deployment lock even if another deployment holds it.
    #[arg(long)]
    pub force_lock: bool,

    /// Skip soft validation such as the git branch check.
    #[arg(long)]
    pub force: bool,

    /// Accept changes to remote resources without prompting.
    #[arg(long)]
    pub auto_approve: bool,

    /// Directory of the bundle. Defaults to the nearest parent containing a `bundle.toml`.
    #[arg(long, env = "BUNDLECTL_BUNDLE_ROOT")]
    pub bundle_root: Option<PathBuf>,

    /// Deploy into a local directory instead of a remote workspace.
    #[arg(long, env = "BUNDLECTL_WORKSPACE_DIR")]
    pub workspace_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Load and initialize the bundle without deploying it.
    Validate,
    /// Build artifacts and deploy every resource of the target.
    Deploy,
    /// Show the deployed resources and their remote ids.
    Summary,
    /// Adopt an existing remote resource as a configured one.
    Bind {
        kind: ResourceKind,
        key: String,
        /// Id of the existing remote resource.
        id: String,
    },
    /// Forget a deployed resource without deleting it remotely.
    Unbind { kind: ResourceKind, key: String },
}
