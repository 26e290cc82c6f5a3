//! Git provenance of the bundle checkout.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use async_trait::async_trait;

use crate::{
    bundle::Bundle,
    context::Context,
    diag::{DiagId, Diagnostics},
    mutator::Mutator,
};

/// What the local checkout says about itself.
#[derive(Debug, Default, PartialEq, Eq)]
struct RepositoryInfo {
    origin_url: String,
    /// Empty for a detached HEAD.
    branch: String,
    commit: String,
}

fn find_git_dir(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(".git"))
        .find(|git| git.is_dir())
}

fn read_repository(git_dir: &Path) -> Result<RepositoryInfo> {
    let head = std::fs::read_to_string(git_dir.join("HEAD"))
        .context(format!("Failed to read {}", git_dir.join("HEAD").display()))?;
    let head = head.trim();

    let (branch, commit) = match head.strip_prefix("ref: ") {
        Some(reference) => {
            let branch = reference.strip_prefix("refs/heads/").unwrap_or(reference);
            (branch.to_string(), resolve_ref(git_dir, reference)?)
        }
        None => (String::new(), head.to_string()),
    };

    let origin_url = std::fs::read_to_string(git_dir.join("config"))
        .map(|config| origin_url(&config))
        .unwrap_or_default();

    Ok(RepositoryInfo {
        origin_url,
        branch,
        commit,
    })
}

/// A loose ref, else a packed ref, else empty (fresh repository without commits).
fn resolve_ref(git_dir: &Path, reference: &str) -> Result<String> {
    let loose = git_dir.join(reference);
    if loose.is_file() {
        let commit = std::fs::read_to_string(&loose)
            .context(format!("Failed to read {}", loose.display()))?;
        return Ok(commit.trim().to_string());
    }

    let packed = std::fs::read_to_string(git_dir.join("packed-refs")).unwrap_or_default();
    Ok(packed
        .lines()
        .filter(|line| !line.starts_with('#') && !line.starts_with('^'))
        .filter_map(|line| line.split_once(' '))
        .find(|(_, name)| *name == reference)
        .map(|(commit, _)| commit.to_string())
        .unwrap_or_default())
}

fn origin_url(config: &str) -> String {
    let mut in_origin = false;
    for line in config.lines().map(str::trim) {
        if line.starts_with('[') {
            in_origin = line == r#"[remote "origin"]"#;
            continue;
        }
        if in_origin
            && let Some((key, value)) = line.split_once('=')
            && key.trim() == "url"
        {
            return value.trim().to_string();
        }
    }
    String::new()
}

/// Fills git provenance from the checkout, marking inferred values.
pub struct LoadGitDetails;

#[async_trait]
impl Mutator for LoadGitDetails {
    fn name(&self) -> &str {
        "LoadGitDetails"
    }

    async fn apply(&self, _ctx: &Context, b: &mut Bundle) -> Diagnostics {
        let Some(git_dir) = find_git_dir(&b.root_path) else {
            tracing::debug!(root = %b.root_path.display(), "Bundle is not in a git repository");
            return Diagnostics::new();
        };

        let info = match read_repository(&git_dir) {
            Ok(info) => info,
            Err(e) => return Diagnostics::from_err(DiagId::GitError, e),
        };

        let git = &mut b.config.bundle.git;
        if git.branch.is_empty() {
            git.branch = info.branch.clone();
            git.inferred = true;
        }
        git.actual_branch = info.branch;
        if git.origin_url.is_empty() {
            git.origin_url = info.origin_url;
        }
        git.commit = info.commit;
        Diagnostics::new()
    }
}

/// Refuses to deploy from a branch other than the configured one.
pub struct ValidateGitDetails;

#[async_trait]
impl Mutator for ValidateGitDetails {
    fn name(&self) -> &str {
        "ValidateGitDetails"
    }

    async fn apply(&self, _ctx: &Context, b: &mut Bundle) -> Diagnostics {
        let git = &b.config.bundle.git;
        if git.branch.is_empty() || git.actual_branch.is_empty() {
            return Diagnostics::new();
        }
        if git.branch != git.actual_branch && !b.force {
            return Diagnostics::error(
                DiagId::GitError,
                format!(
                    "not on the right Git branch:\n  expected according to configuration: {}\n  actual: {}\nuse --force to override",
                    git.branch, git.actual_branch
                ),
            );
        }
        Diagnostics::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Root,
        mutator::{apply, testing::*},
    };

    const CONFIG: &str = r#"[core]
	repositoryformatversion = 0
[remote "upstream"]
	url = https://github.com/other/repo.git
[remote "origin"]
	url = https://github.com/acme/etl.git
	fetch = +refs/heads/*:refs/remotes/origin/*
"#;

    fn init_repo(root: &Path, head: &str) {
        let git = root.join(".git");
        std::fs::create_dir_all(git.join("refs/heads")).unwrap();
        std::fs::write(git.join("HEAD"), head).unwrap();
        std::fs::write(git.join("config"), CONFIG).unwrap();
        std::fs::write(git.join("refs/heads/main"), "abc123\n").unwrap();
        std::fs::write(
            git.join("packed-refs"),
            "# pack-refs with: peeled\ndef456 refs/heads/feature\n",
        )
        .unwrap();
    }

    #[test]
    fn test_origin_url_from_config() {
        assert_eq!(origin_url(CONFIG), "https://github.com/acme/etl.git");
        assert_eq!(origin_url("[core]\n"), "");
    }

    #[tokio::test]
    async fn test_load_infers_branch() {
        let dir = tempdir::TempDir::new("git").unwrap();
        let (ctx, _) = context(&dir, user("alice@acme.com"));
        let mut b = bundle(&dir, Root::default());
        init_repo(&b.root_path, "ref: refs/heads/main\n");

        assert!(apply(&ctx, &mut b, &LoadGitDetails).await.is_empty());
        let git = &b.config.bundle.git;
        assert_eq!(git.branch, "main");
        assert_eq!(git.actual_branch, "main");
        assert_eq!(git.commit, "abc123");
        assert_eq!(git.origin_url, "https://github.com/acme/etl.git");
        assert!(git.inferred);
    }

    #[tokio::test]
    async fn test_load_keeps_configured_branch_and_resolves_packed_ref() {
        let dir = tempdir::TempDir::new("git").unwrap();
        let (ctx, _) = context(&dir, user("alice@acme.com"));
        let mut config = Root::default();
        config.bundle.git.branch = "main".into();
        let mut b = bundle(&dir, config);
        init_repo(&b.root_path, "ref: refs/heads/feature\n");

        assert!(apply(&ctx, &mut b, &LoadGitDetails).await.is_empty());
        let git = &b.config.bundle.git;
        assert_eq!(git.branch, "main");
        assert_eq!(git.actual_branch, "feature");
        assert_eq!(git.commit, "def456");
        assert!(!git.inferred);

        let diags = apply(&ctx, &mut b, &ValidateGitDetails).await;
        assert!(diags.contains_id(DiagId::GitError));

        b.force = true;
        assert!(apply(&ctx, &mut b, &ValidateGitDetails).await.is_empty());
    }

    #[tokio::test]
    async fn test_load_outside_repository_is_noop() {
        let dir = tempdir::TempDir::new("git").unwrap();
        let (ctx, _) = context(&dir, user("alice@acme.com"));
        let mut b = bundle(&dir, Root::default());

        assert!(apply(&ctx, &mut b, &LoadGitDetails).await.is_empty());
        assert_eq!(b.config.bundle.git, Default::default());
    }
}
