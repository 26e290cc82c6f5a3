//! bundlectl deploys declarative bundles of jobs, pipelines and models into a workspace.

mod cli;
mod settings;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use bundlectl_deploy::{
    BindOptions, Bundle, Context, Diagnostics, Executor, LocalWorkspace, Mutator, ProcessExecutor,
    RestWorkspaceClient, WorkspaceClient, apply, config, phases,
};
use clap::Parser;
use comfy_table::Table;

use cli::{Cli, Command};
use settings::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::load(settings::default_path().as_deref())?;

    let root = match &cli.bundle_root {
        Some(root) => root.clone(),
        None => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            config::locate(&cwd)?
        }
    };
    let mut b = Bundle::load(&root)?;
    b.force = cli.force;
    b.auto_approve = cli.auto_approve;

    let ctx = context(&cli, &settings, &b)?;

    let cancel = ctx.cancel_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, aborting the running step and releasing held locks");
            cancel.cancel();
        }
    });

    let mut diags = run(&ctx, &mut b, vec![phases::load(cli.target.clone())]).await;
    if cli.force_lock {
        b.config.bundle.deployment.lock.force = true;
    }

    let mut pipeline = vec![phases::initialize()];
    match &cli.command {
        Command::Validate => {}
        Command::Deploy => {
            pipeline.push(phases::build());
            pipeline.push(phases::deploy());
        }
        Command::Summary => pipeline.push(phases::summary()),
        Command::Bind { kind, key, id } => pipeline.push(phases::bind(BindOptions {
            kind: *kind,
            key: key.clone(),
            id: id.clone(),
            auto_approve: cli.auto_approve,
        })),
        Command::Unbind { kind, key } => pipeline.push(phases::unbind(*kind, key.clone())),
    }

    if !diags.has_error() {
        diags = diags.extend(run(&ctx, &mut b, pipeline).await);
    }
    render(&diags);
    diags.into_result()?;

    match cli.command {
        Command::Validate => {
            tracing::info!(bundle_target = %b.config.bundle.target, "Validation OK!")
        }
        Command::Summary => println!("{}", summary_table(&b)),
        _ => {}
    }
    Ok(())
}

/// Runs phases in order until one reports an error.
async fn run(ctx: &Context, b: &mut Bundle, pipeline: Vec<Box<dyn Mutator>>) -> Diagnostics {
    let mut diags = Diagnostics::new();
    for phase in pipeline {
        diags = diags.extend(apply(ctx, b, phase.as_ref()).await);
        if diags.has_error() {
            break;
        }
    }
    diags
}

fn context(cli: &Cli, settings: &Settings, b: &Bundle) -> Result<Context> {
    let workspace: Arc<dyn WorkspaceClient> = match &cli.workspace_dir {
        Some(dir) => {
            if settings.user.is_empty() {
                anyhow::bail!("A user name is required to deploy into a local workspace directory");
            }
            let user = config::CurrentUser {
                user_name: settings.user.clone(),
                short_name: String::new(),
                id: settings.user.clone(),
                groups: vec![],
            };
            Arc::new(LocalWorkspace::new(dir, user)?)
        }
        None => {
            let host = if b.config.workspace.host.is_empty() {
                settings.host.as_str()
            } else {
                b.config.workspace.host.as_str()
            };
            if host.is_empty() {
                anyhow::bail!("No workspace host configured. Set workspace.host or BUNDLECTL_HOST");
            }
            Arc::new(RestWorkspaceClient::new(host, &settings.token)?)
        }
    };

    let executor: Arc<dyn Executor> = Arc::new(ProcessExecutor::new(&settings.executor));
    Ok(Context::new(workspace, executor).with_env(std::env::vars()))
}

fn render(diags: &Diagnostics) {
    for diag in diags.iter() {
        eprintln!("{}", diag);
    }
}

fn summary_table(b: &Bundle) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Kind", "Key", "Name", "Id"]);
    for (key, resource) in b.config.resources.iter() {
        let id = match resource.id() {
            "" => "(not deployed)".to_string(),
            id => id.to_string(),
        };
        table.add_row(vec![
            resource.kind().to_string(),
            key.to_string(),
            resource.name().to_string(),
            id,
        ]);
    }
    table
}
