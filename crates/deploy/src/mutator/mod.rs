//! Mutators and their composition.
//!
//! A [`Mutator`] is a named step that mutates the [`Bundle`] in place and
//! reports what happened as [`Diagnostics`]. Steps are composed with [`Seq`]
//! (fail-fast), [`Defer`] (guaranteed cleanup), [`If`] and [`NoOp`]; a
//! [`Phase`] is a named `Seq`.

use async_trait::async_trait;
use tracing::Instrument;

use crate::{
    bundle::Bundle,
    context::Context,
    diag::{DiagId, Diagnostics},
};

mod compute;
mod conflicts;
mod git;
mod run_as;
mod select_target;
mod target_mode;
mod workspace;

pub use compute::OverrideCompute;
pub use conflicts::CheckDeploymentConflicts;
pub use git::{LoadGitDetails, ValidateGitDetails};
pub use run_as::SetRunAs;
pub use select_target::{SelectDefaultTarget, SelectTarget};
pub use target_mode::ProcessTargetMode;
pub use workspace::{
    DefineDefaultWorkspacePaths, DefineDefaultWorkspaceRoot, ExpandWorkspaceRoot,
    PopulateCurrentUser,
};

#[async_trait]
pub trait Mutator: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(&self, ctx: &Context, b: &mut Bundle) -> Diagnostics;

    /// Composites report through their children and are not logged twice.
    fn is_composite(&self) -> bool {
        false
    }
}

/// Apply a mutator, honoring cancellation.
///
/// A cancelled context refuses to start a leaf step; a leaf step that is
/// running when the context is cancelled is dropped and reported as aborted.
/// Composites are never raced against cancellation, so a [`Defer`] always
/// reaches its cleanup.
pub async fn apply(ctx: &Context, b: &mut Bundle, m: &dyn Mutator) -> Diagnostics {
    let span = tracing::info_span!("mutator", name = %m.name());
    async move {
        if m.is_composite() {
            return m.apply(ctx, b).await;
        }
        if ctx.is_cancelled() {
            return aborted(m.name());
        }

        tracing::debug!("Applying mutator");
        let diags = tokio::select! {
            biased;
            _ = ctx.cancelled() => aborted(m.name()),
            diags = m.apply(ctx, b) => diags,
        };
        report(m, &diags);
        diags
    }
    .instrument(span)
    .await
}

fn aborted(name: &str) -> Diagnostics {
    Diagnostics::error(DiagId::AbortedError, format!("{}: operation cancelled", name))
}

fn report(m: &dyn Mutator, diags: &Diagnostics) {
    if m.is_composite() {
        return;
    }
    for warning in diags.warnings() {
        tracing::warn!(id = ?warning.id, "{}", warning.summary);
    }
    for error in diags.errors() {
        tracing::debug!(id = ?error.id, "Mutator failed: {}", error.summary);
    }
}

/// Run mutators in order, stopping at the first error.
///
/// On error only the failing step's diagnostics are returned. Warnings of the
/// earlier steps have already been logged by [`apply`].
pub struct Seq {
    mutators: Vec<Box<dyn Mutator>>,
}

pub fn seq(mutators: Vec<Box<dyn Mutator>>) -> Box<dyn Mutator> {
    Box::new(Seq { mutators })
}

#[async_trait]
impl Mutator for Seq {
    fn name(&self) -> &str {
        "Seq"
    }

    fn is_composite(&self) -> bool {
        true
    }

    async fn apply(&self, ctx: &Context, b: &mut Bundle) -> Diagnostics {
        let mut diags = Diagnostics::new();
        for m in &self.mutators {
            let step = apply(ctx, b, m.as_ref()).await;
            if step.has_error() {
                return step;
            }
            diags = diags.extend(step);
        }
        diags
    }
}

/// Run `body`, then always run `cleanup`, concatenating both results.
///
/// Cleanup runs on a detached context so that it still executes after the
/// body was cancelled.
pub struct Defer {
    body: Box<dyn Mutator>,
    cleanup: Box<dyn Mutator>,
}

pub fn defer(body: Box<dyn Mutator>, cleanup: Box<dyn Mutator>) -> Box<dyn Mutator> {
    Box::new(Defer { body, cleanup })
}

#[async_trait]
impl Mutator for Defer {
    fn name(&self) -> &str {
        "Defer"
    }

    fn is_composite(&self) -> bool {
        true
    }

    async fn apply(&self, ctx: &Context, b: &mut Bundle) -> Diagnostics {
        let body = apply(ctx, b, self.body.as_ref()).await;
        let cleanup = apply(&ctx.detached(), b, self.cleanup.as_ref()).await;
        body.extend(cleanup)
    }
}

type Predicate = Box<dyn Fn(&Bundle) -> bool + Send + Sync>;

/// Dispatch on a side-effect-free predicate evaluated once.
pub struct If {
    predicate: Predicate,
    then: Box<dyn Mutator>,
    otherwise: Box<dyn Mutator>,
}

pub fn if_then_else(
    predicate: impl Fn(&Bundle) -> bool + Send + Sync + 'static,
    then: Box<dyn Mutator>,
    otherwise: Box<dyn Mutator>,
) -> Box<dyn Mutator> {
    Box::new(If {
        predicate: Box::new(predicate),
        then,
        otherwise,
    })
}

#[async_trait]
impl Mutator for If {
    fn name(&self) -> &str {
        "If"
    }

    fn is_composite(&self) -> bool {
        true
    }

    async fn apply(&self, ctx: &Context, b: &mut Bundle) -> Diagnostics {
        if (self.predicate)(&*b) {
            apply(ctx, b, self.then.as_ref()).await
        } else {
            apply(ctx, b, self.otherwise.as_ref()).await
        }
    }
}

pub struct NoOp;

pub fn noop() -> Box<dyn Mutator> {
    Box::new(NoOp)
}

#[async_trait]
impl Mutator for NoOp {
    fn name(&self) -> &str {
        "NoOp"
    }

    async fn apply(&self, _ctx: &Context, _b: &mut Bundle) -> Diagnostics {
        Diagnostics::new()
    }
}

/// A named lifecycle stage.
pub struct Phase {
    name: String,
    seq: Seq,
}

pub fn phase(name: impl Into<String>, mutators: Vec<Box<dyn Mutator>>) -> Box<dyn Mutator> {
    Box::new(Phase {
        name: name.into(),
        seq: Seq { mutators },
    })
}

#[async_trait]
impl Mutator for Phase {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_composite(&self) -> bool {
        true
    }

    async fn apply(&self, ctx: &Context, b: &mut Bundle) -> Diagnostics {
        tracing::info!(phase = %self.name, "Starting phase");
        let diags = self.seq.apply(ctx, b).await;
        if diags.has_error() {
            tracing::info!(phase = %self.name, "Phase failed");
        } else {
            tracing::info!(phase = %self.name, "Phase complete");
        }
        diags
    }
}
