//! Rendering of configured resources into the executor document.

use std::{str::FromStr, sync::LazyLock};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::{
    bundle::Bundle,
    config::{ResourceKind, Resources},
    context::Context,
    diag::{DiagId, Diagnostics},
    mutator::Mutator,
};

/// `${resources.<kind>.<key>.<field>}` references between resources.
static RESOURCE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{resources\.(\w+)\.([\w-]+)\.([\w.\[\]-]+)\}")
        .expect("resource reference pattern is valid")
});

fn rewrite_references(s: &str) -> String {
    RESOURCE_REFERENCE
        .replace_all(s, |caps: &Captures| match ResourceKind::from_str(&caps[1]) {
            Ok(kind) => format!("${{{}.{}.{}}}", kind.executor_type(), &caps[2], &caps[3]),
            Err(_) => caps[0].to_string(),
        })
        .into_owned()
}

fn rewrite(value: &mut Value) {
    match value {
        Value::String(s) if s.contains("${resources.") => *s = rewrite_references(s),
        Value::Array(items) => items.iter_mut().for_each(rewrite),
        Value::Object(fields) => fields.values_mut().for_each(rewrite),
        _ => {}
    }
}

/// Render resources as `{"resource": {<executor type>: {<key>: {...}}}}`.
///
/// Ids are state, not configuration, and are left out.
pub fn render(resources: &Resources) -> Result<Value> {
    let by_kind = serde_json::to_value(resources).context("Failed to serialize resources")?;

    let mut rendered = Map::new();
    if let Value::Object(kinds) = by_kind {
        for (kind, entries) in kinds {
            let kind = ResourceKind::from_str(&kind)
                .context(format!("Failed to map resource kind {}", kind))?;
            let Value::Object(mut entries) = entries else {
                continue;
            };
            for entry in entries.values_mut() {
                if let Value::Object(fields) = entry {
                    fields.remove("id");
                }
                rewrite(entry);
            }
            rendered.insert(kind.executor_type().to_string(), Value::Object(entries));
        }
    }

    let mut document = Map::new();
    document.insert("resource".to_string(), Value::Object(rendered));
    Ok(Value::Object(document))
}

/// Renders the configured resources for the executor.
pub struct Interpolate;

#[async_trait]
impl Mutator for Interpolate {
    fn name(&self) -> &str {
        "executor.Interpolate"
    }

    async fn apply(&self, _ctx: &Context, b: &mut Bundle) -> Diagnostics {
        match render(&b.config.resources) {
            Ok(document) => {
                b.executor_config = Some(document);
                Diagnostics::new()
            }
            Err(e) => Diagnostics::from_err(DiagId::InternalError, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::{Job, Pipeline, Task};

    #[test]
    fn test_rewrite_references() {
        assert_eq!(
            rewrite_references("${resources.pipelines.dlt.id}"),
            "${bundle_pipeline.dlt.id}"
        );
        assert_eq!(
            rewrite_references("prefix ${resources.jobs.my-job.tasks[0].task_key} suffix"),
            "prefix ${bundle_job.my-job.tasks[0].task_key} suffix"
        );
        assert_eq!(
            rewrite_references("${resources.clusters.c.id}"),
            "${resources.clusters.c.id}"
        );
        assert_eq!(rewrite_references("${bundle.target}"), "${bundle.target}");
    }

    #[test]
    fn test_render_groups_by_executor_type() {
        let mut resources = Resources::default();
        resources.jobs.insert(
            "nightly".into(),
            Job {
                id: "101".into(),
                name: "nightly".into(),
                tasks: vec![Task {
                    task_key: "run".into(),
                    notebook_path: Some("${resources.pipelines.dlt.id}".into()),
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
        resources.pipelines.insert(
            "dlt".into(),
            Pipeline {
                name: "dlt".into(),
                ..Default::default()
            },
        );

        let document = render(&resources).unwrap();
        let job = &document["resource"]["bundle_job"]["nightly"];
        assert_eq!(job["name"], json!("nightly"));
        assert!(job.get("id").is_none());
        assert_eq!(job["tasks"][0]["notebook_path"], json!("${bundle_pipeline.dlt.id}"));
        assert_eq!(document["resource"]["bundle_pipeline"]["dlt"]["name"], json!("dlt"));
        assert!(document["resource"].get("bundle_model").is_none());
    }
}
