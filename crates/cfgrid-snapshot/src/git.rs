//! `git` command-line adapter for [`VersionSource`].
//!
//! Transport and credentials are whatever the local `git` is configured
//! with; this adapter only sequences clone, fetch and checkout and reads the
//! working tree back.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{SourceError, SourceResult};
use crate::snapshot::ConfigSnapshot;
use crate::source::{Checkout, SourceFuture, VersionSource};

/// A single working tree of a remote repository.
#[derive(Debug, Clone)]
pub struct GitSource {
    url: String,
    work_dir: PathBuf,
}

impl GitSource {
    pub fn new(url: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            work_dir: work_dir.into(),
        }
    }

    fn is_cloned(&self) -> bool {
        self.work_dir.join(".git").exists()
    }

    async fn clone_repo(&self) -> SourceResult<()> {
        if self.is_cloned() {
            return Ok(());
        }
        if let Some(parent) = self.work_dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let target = self.work_dir.to_string_lossy().into_owned();
        run_git(None, &["clone", "--no-checkout", &self.url, &target])
            .await
            .map_err(SourceError::Clone)?;
        info!(url = %self.url, work_dir = ?self.work_dir, "repository cloned");
        Ok(())
    }

    async fn checkout(&self, reference: &str) -> SourceResult<Checkout> {
        let dir = Some(self.work_dir.as_path());
        run_git(dir, &["fetch", "--tags", "--prune", "origin"])
            .await
            .map_err(SourceError::Fetch)?;

        let target = self.resolve(reference).await?;
        let head = run_git(dir, &["rev-parse", "--verify", "--quiet", "HEAD"])
            .await
            .ok();
        if head.as_deref() == Some(target.as_str()) {
            return Ok(Checkout::UpToDate(target));
        }

        run_git(dir, &["checkout", "--force", "--detach", &target])
            .await
            .map_err(SourceError::Checkout)?;
        Ok(Checkout::Updated(target))
    }

    /// Resolve a remote branch first, then any local name (tag or hash).
    async fn resolve(&self, reference: &str) -> SourceResult<String> {
        let dir = Some(self.work_dir.as_path());
        for candidate in [format!("origin/{reference}"), reference.to_string()] {
            let rev = format!("{candidate}^{{commit}}");
            if let Ok(hash) = run_git(dir, &["rev-parse", "--verify", "--quiet", &rev]).await {
                debug!(%reference, %candidate, %hash, "reference resolved");
                return Ok(hash);
            }
        }
        Err(SourceError::Checkout(format!("unknown reference '{reference}'")))
    }

    async fn discard(&self) -> SourceResult<()> {
        if tokio::fs::try_exists(&self.work_dir).await? {
            tokio::fs::remove_dir_all(&self.work_dir).await?;
            info!(work_dir = ?self.work_dir, "repository clone discarded");
        }
        Ok(())
    }
}

impl VersionSource for GitSource {
    fn ensure_cloned(&self) -> SourceFuture<'_, ()> {
        Box::pin(self.clone_repo())
    }

    fn fetch_and_checkout<'a>(&'a self, reference: &'a str) -> SourceFuture<'a, Checkout> {
        Box::pin(self.checkout(reference))
    }

    fn load_snapshot<'a>(&'a self, hash: &'a str) -> SourceFuture<'a, ConfigSnapshot> {
        let root = self.work_dir.clone();
        let hash = hash.to_string();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || read_tree(&root, hash))
                .await
                .map_err(|e| SourceError::Io(std::io::Error::other(e)))?
        })
    }

    fn discard_clone(&self) -> SourceFuture<'_, ()> {
        Box::pin(self.discard())
    }
}

/// Run `git` and return trimmed stdout, or stderr as the error.
async fn run_git(dir: Option<&Path>, args: &[&str]) -> Result<String, String> {
    let mut cmd = Command::new("git");
    if let Some(dir) = dir {
        cmd.arg("-C").arg(dir);
    }
    cmd.args(args).env("GIT_TERMINAL_PROMPT", "0");

    let output = cmd
        .output()
        .await
        .map_err(|e| format!("failed to run git: {e}"))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(?args, %stderr, "git command failed");
        Err(if stderr.is_empty() {
            format!("git {} exited with {}", args.join(" "), output.status)
        } else {
            stderr
        })
    }
}

/// Read every file under `root` except the `.git` directory.
fn read_tree(root: &Path, hash: String) -> SourceResult<ConfigSnapshot> {
    let mut snapshot = ConfigSnapshot::new(hash);
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || entry.file_name() != ".git");
    for entry in walker {
        let entry = entry.map_err(|e| SourceError::Io(std::io::Error::other(e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let Some(relative) = relative.to_str() else {
            warn!(path = ?entry.path(), "skipping non UTF-8 path");
            continue;
        };
        let content = std::fs::read(entry.path())?;
        snapshot.insert(relative, content);
    }
    debug!(root = ?root, files = snapshot.len(), "working tree read");
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_tree_skips_git_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        std::fs::create_dir_all(dir.path().join("schemas/solr")).unwrap();
        std::fs::write(dir.path().join("schemas/solr/schema.xml"), "<schema/>").unwrap();
        std::fs::write(dir.path().join("fields.json"), "{}").unwrap();

        let snapshot = read_tree(dir.path(), "abc123".to_string()).unwrap();
        assert_eq!(snapshot.hash(), "abc123");
        assert_eq!(snapshot.paths(), vec!["fields.json", "schemas/solr/schema.xml"]);
    }

    #[tokio::test]
    async fn discard_clone_removes_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let work_dir = dir.path().join("repo");
        std::fs::create_dir_all(work_dir.join(".git")).unwrap();

        let source = GitSource::new("https://example.invalid/config.git", &work_dir);
        assert!(source.is_cloned());
        source.discard_clone().await.unwrap();
        assert!(!work_dir.exists());

        // Discarding again is a no-op.
        source.discard_clone().await.unwrap();
    }

    #[tokio::test]
    async fn load_snapshot_reads_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), "{\"a\":1}").unwrap();

        let source = GitSource::new("https://example.invalid/config.git", dir.path());
        let snapshot = source.load_snapshot("h1").await.unwrap();
        assert_eq!(snapshot.file("a.json").unwrap().as_ref(), b"{\"a\":1}");
    }
}
