//! Lifecycle phases: fixed mutator sequences the CLI runs.

use crate::{
    artifacts,
    config::ResourceKind,
    executor::{self, BindOptions},
    files,
    lock::{Acquire, Goal, Release},
    metadata::AnnotateJobs,
    mutator::{
        CheckDeploymentConflicts, DefineDefaultWorkspacePaths, DefineDefaultWorkspaceRoot,
        ExpandWorkspaceRoot, LoadGitDetails, Mutator, OverrideCompute, PopulateCurrentUser,
        ProcessTargetMode, SelectDefaultTarget, SelectTarget, SetRunAs, ValidateGitDetails, defer,
        if_then_else, noop, phase, seq,
    },
    permissions::{
        ApplyResourcePermissions, ApplyWorkspaceRootPermissions, FilterCurrentUser,
        ReportPermissionErrors,
    },
    state,
};

/// Selects the target and reads git details from the bundle checkout.
pub fn load(target: Option<String>) -> Box<dyn Mutator> {
    let select: Box<dyn Mutator> = match target {
        Some(name) => Box::new(SelectTarget::new(name)),
        None => Box::new(SelectDefaultTarget),
    };
    phase("load", vec![select, Box::new(LoadGitDetails)])
}

/// Fills in defaults, validates the configuration and computes derived settings.
pub fn initialize() -> Box<dyn Mutator> {
    phase(
        "initialize",
        vec![
            Box::new(PopulateCurrentUser),
            Box::new(DefineDefaultWorkspaceRoot),
            Box::new(ExpandWorkspaceRoot),
            Box::new(DefineDefaultWorkspacePaths),
            Box::new(ReportPermissionErrors),
            Box::new(ApplyResourcePermissions),
            Box::new(SetRunAs),
            Box::new(OverrideCompute),
            Box::new(ProcessTargetMode),
            Box::new(FilterCurrentUser),
            Box::new(AnnotateJobs),
            Box::new(CheckDeploymentConflicts),
            Box::new(executor::Initialize),
        ],
    )
}

pub fn build() -> Box<dyn Mutator> {
    phase("build", vec![Box::new(artifacts::BuildAll)])
}

/// Everything between lock acquisition and release.
fn deploy_body() -> Box<dyn Mutator> {
    seq(vec![
        Box::new(ValidateGitDetails),
        Box::new(ApplyWorkspaceRootPermissions),
        Box::new(files::Upload),
        if_then_else(
            |b| !b.config.artifacts.is_empty(),
            Box::new(artifacts::UploadAll),
            noop(),
        ),
        Box::new(executor::Interpolate),
        Box::new(executor::Write),
        Box::new(executor::StatePull),
        Box::new(executor::Apply),
        Box::new(executor::StatePush),
        Box::new(state::Load::new()),
    ])
}

/// Wraps `body` so that the deployment lock is held for its duration.
fn locked(body: Box<dyn Mutator>, goal: Goal) -> Vec<Box<dyn Mutator>> {
    vec![Box::new(Acquire), defer(body, Box::new(Release::new(goal)))]
}

pub fn deploy() -> Box<dyn Mutator> {
    phase("deploy", locked(deploy_body(), Goal::Deploy))
}

pub fn bind(opts: BindOptions) -> Box<dyn Mutator> {
    let body = seq(vec![
        Box::new(executor::StatePull),
        Box::new(executor::Interpolate),
        Box::new(executor::Write),
        Box::new(executor::Import::new(opts)),
        Box::new(executor::StatePush),
    ]);
    phase("bind", locked(body, Goal::Bind))
}

pub fn unbind(kind: ResourceKind, key: impl Into<String>) -> Box<dyn Mutator> {
    let body = seq(vec![
        Box::new(executor::StatePull),
        Box::new(executor::Unbind::new(kind, key)),
        Box::new(executor::StatePush),
    ]);
    phase("unbind", locked(body, Goal::Unbind))
}

/// Merges the last deployment's remote ids into the configuration.
pub fn summary() -> Box<dyn Mutator> {
    phase(
        "summary",
        vec![Box::new(executor::StatePull), Box::new(state::Load::new())],
    )
}
