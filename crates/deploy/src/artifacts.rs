//! Locally built artifacts: building them and uploading the outputs.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use tokio::process::Command;

use crate::{
    bundle::Bundle,
    config::Artifact,
    context::Context,
    diag::{DiagId, Diagnostics},
    mutator::Mutator,
    workspace::WorkspaceClient,
};

/// Directory under the artifact path that receives uploaded build outputs.
pub const INTERNAL_DIR: &str = ".internal";

fn resolve(base: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

async fn run_build(name: &str, dir: &Path, command: &str) -> Result<()> {
    tracing::info!(artifact = %name, command = %command, "Building artifact");
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(dir)
        .kill_on_drop(true)
        .output()
        .await
        .context(format!("Failed to run build command for {}", name))?;

    if !output.status.success() {
        anyhow::bail!(
            "exit status {}, output: {}{}",
            output.status,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

async fn build_one(root: &Path, name: &str, artifact: &mut Artifact) -> Diagnostics {
    let dir = if artifact.path.is_empty() {
        root.to_path_buf()
    } else {
        resolve(root, &artifact.path)
    };
    artifact.path = dir.display().to_string();

    if artifact.build.is_empty() && artifact.files.is_empty() {
        return Diagnostics::error(
            DiagId::BuildError,
            format!("misconfigured artifact {}: please specify 'build' or 'files' property", name),
        );
    }

    if !artifact.build.is_empty()
        && let Err(e) = run_build(name, &dir, &artifact.build).await
    {
        return Diagnostics::error(
            DiagId::BuildError,
            format!("build for {} failed, error: {:#}", name, e),
        );
    }

    for file in &mut artifact.files {
        let source = resolve(&dir, &file.source);
        if !source.is_file() {
            return Diagnostics::error(
                DiagId::BuildError,
                format!("no files found for {}", source.display()),
            );
        }
        file.source = source.display().to_string();
    }
    Diagnostics::new()
}

/// Builds every artifact and resolves its output files.
pub struct BuildAll;

#[async_trait]
impl Mutator for BuildAll {
    fn name(&self) -> &str {
        "artifacts.BuildAll"
    }

    async fn apply(&self, _ctx: &Context, b: &mut Bundle) -> Diagnostics {
        let root = b.root_path.clone();
        for (name, artifact) in b.config.artifacts.iter_mut() {
            let diags = build_one(&root, name, artifact).await;
            if diags.has_error() {
                return diags;
            }
        }
        Diagnostics::new()
    }
}

async fn upload_one(
    workspace: &dyn WorkspaceClient,
    upload_path: &str,
    artifact: &mut Artifact,
) -> Result<()> {
    for file in &mut artifact.files {
        let source = Path::new(&file.source);
        let file_name = source
            .file_name()
            .context(format!("Failed to get file name of {}", file.source))?
            .to_string_lossy();
        let remote = format!("{}/{}", upload_path, file_name);

        let content = tokio::fs::read(source)
            .await
            .context(format!("Failed to read {}", file.source))?;
        workspace
            .write_file(&remote, &content, true)
            .await
            .context(format!("Failed to upload {}", file.source))?;
        tracing::debug!(source = %file.source, remote = %remote, "Artifact file uploaded");
        file.remote_path = remote;
    }
    Ok(())
}

/// Uploads built artifact files under `<artifact_path>/.internal`.
pub struct UploadAll;

#[async_trait]
impl Mutator for UploadAll {
    fn name(&self) -> &str {
        "artifacts.UploadAll"
    }

    async fn apply(&self, ctx: &Context, b: &mut Bundle) -> Diagnostics {
        if b.config.workspace.artifact_path.is_empty() {
            return Diagnostics::error(DiagId::ArtifactError, "remote artifact path not configured");
        }
        let upload_path = format!(
            "{}/{}",
            b.config.workspace.artifact_path.trim_end_matches('/'),
            INTERNAL_DIR
        );

        for (name, artifact) in b.config.artifacts.iter_mut() {
            if artifact.files.is_empty() {
                return Diagnostics::error(
                    DiagId::ArtifactError,
                    format!("artifact source is not configured: {}", name),
                );
            }
            if let Err(e) = upload_one(ctx.workspace.as_ref(), &upload_path, artifact).await {
                return Diagnostics::error(
                    DiagId::ArtifactError,
                    format!("upload for {} failed, error: {:#}", name, e),
                );
            }
            tracing::info!(artifact = %name, "Artifact uploaded");
        }
        Diagnostics::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{ArtifactFile, Root},
        mutator::{apply, testing::*},
    };

    fn artifact(path: &str, build: &str, source: &str) -> Artifact {
        Artifact {
            kind: "whl".into(),
            path: path.into(),
            build: build.into(),
            files: vec![ArtifactFile {
                source: source.into(),
                remote_path: String::new(),
            }],
        }
    }

    #[tokio::test]
    async fn test_build_then_upload() {
        let dir = tempdir::TempDir::new("artifacts").unwrap();
        let (ctx, ws) = context(&dir, user("alice@acme.com"));
        let mut config = Root::default();
        config.workspace.artifact_path = "/Users/alice@acme.com/.bundle/etl/dev/artifacts".into();
        config.artifacts.insert(
            "lib".into(),
            artifact("lib", "mkdir -p dist && echo wheel > dist/lib.whl", "dist/lib.whl"),
        );
        let mut b = bundle(&dir, config);
        std::fs::create_dir_all(b.root_path.join("lib")).unwrap();

        assert!(apply(&ctx, &mut b, &BuildAll).await.is_empty());
        let built = &b.config.artifacts["lib"];
        assert_eq!(Path::new(&built.files[0].source), b.root_path.join("lib/dist/lib.whl"));

        assert!(apply(&ctx, &mut b, &UploadAll).await.is_empty());
        let remote = &b.config.artifacts["lib"].files[0].remote_path;
        assert_eq!(
            remote,
            "/Users/alice@acme.com/.bundle/etl/dev/artifacts/.internal/lib.whl"
        );
        assert_eq!(std::fs::read_to_string(ws.local_path(remote)).unwrap(), "wheel\n");
    }

    #[tokio::test]
    async fn test_failing_build() {
        let dir = tempdir::TempDir::new("artifacts").unwrap();
        let (ctx, _) = context(&dir, user("alice@acme.com"));
        let mut config = Root::default();
        config.artifacts.insert("lib".into(), artifact("", "echo broken >&2; exit 3", "x.whl"));
        let mut b = bundle(&dir, config);

        let diags = apply(&ctx, &mut b, &BuildAll).await;
        assert!(diags.contains_id(DiagId::BuildError));
        assert!(diags[0].summary.contains("broken"));
    }

    #[tokio::test]
    async fn test_missing_output_file() {
        let dir = tempdir::TempDir::new("artifacts").unwrap();
        let (ctx, _) = context(&dir, user("alice@acme.com"));
        let mut config = Root::default();
        config.artifacts.insert("lib".into(), artifact("", "", "missing.whl"));
        let mut b = bundle(&dir, config);

        let diags = apply(&ctx, &mut b, &BuildAll).await;
        assert!(diags[0].summary.starts_with("no files found for"));
    }

    #[tokio::test]
    async fn test_misconfigured_artifact() {
        let dir = tempdir::TempDir::new("artifacts").unwrap();
        let (ctx, _) = context(&dir, user("alice@acme.com"));
        let mut config = Root::default();
        config.artifacts.insert("lib".into(), Artifact::default());
        let mut b = bundle(&dir, config);

        let diags = apply(&ctx, &mut b, &BuildAll).await;
        assert!(diags[0].summary.contains("please specify 'build' or 'files' property"));
    }
}
