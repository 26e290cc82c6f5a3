use async_trait::async_trait;

use crate::{
    bundle::Bundle,
    config::{Job, Mode},
    context::{COMPUTE_ID_ENV, Context},
    diag::{DiagId, Diagnostics},
    mutator::Mutator,
};

/// Points every job task that uses compute at a single cluster, in development only.
pub struct OverrideCompute;

fn override_job_compute(job: &mut Job, compute_id: &str) {
    for task in job.tasks.iter_mut().filter(|t| t.uses_compute()) {
        task.new_cluster = None;
        task.job_cluster_key.clear();
        task.environment_key.clear();
        task.existing_cluster_id = compute_id.to_string();
    }
}

#[async_trait]
impl Mutator for OverrideCompute {
    fn name(&self) -> &str {
        "OverrideCompute"
    }

    async fn apply(&self, ctx: &Context, b: &mut Bundle) -> Diagnostics {
        if b.config.bundle.mode != Mode::Development {
            if !b.config.bundle.compute_id.is_empty() {
                return Diagnostics::error(
                    DiagId::TargetModeError,
                    "can only override compute for a target that uses 'mode: development'",
                );
            }
            return Diagnostics::new();
        }

        if let Some(id) = ctx.env(COMPUTE_ID_ENV) {
            b.config.bundle.compute_id = id.to_string();
        }

        let compute_id = b.config.bundle.compute_id.clone();
        if compute_id.is_empty() {
            return Diagnostics::new();
        }

        tracing::info!(compute_id = %compute_id, "Overriding job compute");
        for job in b.config.resources.jobs.values_mut() {
            override_job_compute(job, &compute_id);
        }
        Diagnostics::new()
    }
}
