//! Deployment provenance.

use async_trait::async_trait;

use crate::{
    bundle::Bundle,
    config::JobDeployment,
    context::Context,
    diag::Diagnostics,
    mutator::Mutator,
};

pub const METADATA_FILENAME: &str = "metadata.json";

/// Jobs deployed by a bundle carry this deployment kind.
pub const DEPLOYMENT_KIND_BUNDLE: &str = "BUNDLE";

/// Edit mode that prevents editing a bundle-managed job in the UI.
pub const EDIT_MODE_UI_LOCKED: &str = "UI_LOCKED";

/// Where this bundle records its deployment metadata. Identifies the state lineage.
pub fn metadata_file_path(b: &Bundle) -> String {
    format!(
        "{}/{}",
        b.config.workspace.state_path.trim_end_matches('/'),
        METADATA_FILENAME
    )
}

/// Marks every job as deployed by this bundle.
pub struct AnnotateJobs;

#[async_trait]
impl Mutator for AnnotateJobs {
    fn name(&self) -> &str {
        "metadata.AnnotateJobs"
    }

    async fn apply(&self, _ctx: &Context, b: &mut Bundle) -> Diagnostics {
        let path = metadata_file_path(b);
        for job in b.config.resources.jobs.values_mut() {
            job.deployment = Some(JobDeployment {
                kind: DEPLOYMENT_KIND_BUNDLE.to_string(),
                metadata_file_path: path.clone(),
            });
            job.edit_mode = Some(EDIT_MODE_UI_LOCKED.to_string());
        }
        Diagnostics::new()
    }
}
