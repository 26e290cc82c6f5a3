use async_trait::async_trait;

use super::{Mutator, apply};
use crate::{
    bundle::Bundle,
    context::Context,
    diag::{DiagId, Diagnostics},
};

/// Merges the named target into the root configuration.
pub struct SelectTarget {
    name: String,
    label: String,
}

impl SelectTarget {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let label = format!("SelectTarget({})", name);
        Self { name, label }
    }
}

#[async_trait]
impl Mutator for SelectTarget {
    fn name(&self) -> &str {
        &self.label
    }

    async fn apply(&self, _ctx: &Context, b: &mut Bundle) -> Diagnostics {
        if b.config.targets.is_empty() {
            return Diagnostics::error(DiagId::ConfigurationError, "no targets defined");
        }

        let Some(target) = b.config.targets.get(&self.name).cloned() else {
            let available: Vec<&str> = b.config.targets.keys().map(String::as_str).collect();
            return Diagnostics::error(
                DiagId::ConfigurationError,
                format!(
                    "{}: no such target. Available targets: {}",
                    self.name,
                    available.join(", ")
                ),
            );
        };

        // The targets map stays: the production check reads the active target's root path.
        b.config.merge_target(target);
        b.config.bundle.target = self.name.clone();
        tracing::info!(target = %self.name, mode = %b.config.bundle.mode, "Target selected");
        Diagnostics::new()
    }
}

/// Selects the only target, or the single target marked `default = true`.
pub struct SelectDefaultTarget;

#[async_trait]
impl Mutator for SelectDefaultTarget {
    fn name(&self) -> &str {
        "SelectDefaultTarget"
    }

    async fn apply(&self, ctx: &Context, b: &mut Bundle) -> Diagnostics {
        let targets = &b.config.targets;
        if targets.is_empty() {
            return Diagnostics::error(DiagId::ConfigurationError, "no targets defined");
        }

        let name = if targets.len() == 1 {
            targets.keys().next().cloned()
        } else {
            let defaults: Vec<&str> = targets
                .iter()
                .filter(|(_, t)| t.default)
                .map(|(name, _)| name.as_str())
                .collect();
            match defaults.as_slice() {
                [] => None,
                [only] => Some(only.to_string()),
                many => {
                    return Diagnostics::error(
                        DiagId::ConfigurationError,
                        format!("multiple targets are marked as default ({})", many.join(", ")),
                    );
                }
            }
        };

        match name {
            Some(name) => apply(ctx, b, &SelectTarget::new(name)).await,
            None => Diagnostics::error(DiagId::ConfigurationError, "please specify target"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Mode, Root, Target, Workspace},
        mutator::testing::*,
    };

    fn target(default: bool, mode: Mode) -> Target {
        Target {
            default,
            mode: Some(mode),
            ..Default::default()
        }
    }

    async fn select(config: Root, m: &dyn Mutator) -> (Bundle, Diagnostics) {
        let dir = tempdir::TempDir::new("select").unwrap();
        let (ctx, _) = context(&dir, user("alice@acme.com"));
        let mut b = bundle(&dir, config);
        let diags = apply(&ctx, &mut b, m).await;
        (b, diags)
    }

    #[tokio::test]
    async fn test_select_target_merges_and_keeps_targets() {
        let mut config = Root::default();
        config.workspace.host = "https://acme.cloud.databricks.com".into();
        config.targets.insert(
            "prod".into(),
            Target {
                workspace: Some(Workspace {
                    root_path: "/Shared/etl".into(),
                    ..Default::default()
                }),
                ..target(false, Mode::Production)
            },
        );

        let (b, diags) = select(config, &SelectTarget::new("prod")).await;
        assert!(diags.is_empty());
        assert_eq!(b.config.bundle.target, "prod");
        assert_eq!(b.config.bundle.mode, Mode::Production);
        assert_eq!(b.config.workspace.root_path, "/Shared/etl");
        assert_eq!(b.config.workspace.host, "https://acme.cloud.databricks.com");
        assert!(b.config.target_sets_root_path());
    }

    #[tokio::test]
    async fn test_select_unknown_target() {
        let mut config = Root::default();
        config.targets.insert("dev".into(), Target::default());
        config.targets.insert("prod".into(), Target::default());

        let (_, diags) = select(config, &SelectTarget::new("qa")).await;
        assert_eq!(diags[0].summary, "qa: no such target. Available targets: dev, prod");
    }

    #[tokio::test]
    async fn test_select_without_targets() {
        let (_, diags) = select(Root::default(), &SelectTarget::new("dev")).await;
        assert_eq!(diags[0].summary, "no targets defined");

        let (_, diags) = select(Root::default(), &SelectDefaultTarget).await;
        assert_eq!(diags[0].summary, "no targets defined");
    }

    #[tokio::test]
    async fn test_single_target_is_default() {
        let mut config = Root::default();
        config.targets.insert("only".into(), target(false, Mode::Development));

        let (b, diags) = select(config, &SelectDefaultTarget).await;
        assert!(diags.is_empty());
        assert_eq!(b.config.bundle.target, "only");
    }

    #[tokio::test]
    async fn test_default_flag_selects_target() {
        let mut config = Root::default();
        config.targets.insert("dev".into(), target(true, Mode::Development));
        config.targets.insert("prod".into(), target(false, Mode::Production));

        let (b, diags) = select(config, &SelectDefaultTarget).await;
        assert!(diags.is_empty());
        assert_eq!(b.config.bundle.target, "dev");
        assert_eq!(b.config.bundle.mode, Mode::Development);
    }

    #[tokio::test]
    async fn test_multiple_defaults() {
        let mut config = Root::default();
        config.targets.insert("a".into(), target(true, Mode::Development));
        config.targets.insert("b".into(), target(true, Mode::Development));

        let (_, diags) = select(config, &SelectDefaultTarget).await;
        assert_eq!(diags[0].summary, "multiple targets are marked as default (a, b)");
    }

    #[tokio::test]
    async fn test_no_default_among_many() {
        let mut config = Root::default();
        config.targets.insert("a".into(), Target::default());
        config.targets.insert("b".into(), Target::default());

        let (_, diags) = select(config, &SelectDefaultTarget).await;
        assert_eq!(diags[0].summary, "please specify target");
    }
}
