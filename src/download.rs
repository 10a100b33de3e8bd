//! Repository snapshots through the `git` command line client.
//!
//! [`GitCli`] shallow-clones a repository, resolves its head commit and
//! enumerates the files of the head tree with `git ls-tree`, which returns
//! them in the tree's own order. [`Workdir`] owns the directory a clone
//! lands in and removes it when dropped unless it was asked to preserve it.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;

use crate::contract::{CloneOptions, Snapshot, Snapshotter};
use crate::error::{IterateError, Result};

/// Snapshotter backed by the `git` executable on `PATH`.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }
}

impl GitCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn git(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd
    }

    async fn run(&self, uri: &str, mut cmd: Command) -> Result<Vec<u8>> {
        let output = cmd.output().await.map_err(|e| {
            tracing::error!(error = ?e, uri, "Failed to launch git process");
            IterateError::transport(uri, format!("failed to launch git: {e}"))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!(
                uri,
                status = %output.status,
                stderr = %stderr.trim(),
                "Git exited with non-zero code"
            );
            return Err(IterateError::transport(
                uri,
                format!("git exited with {}: {}", output.status, stderr.trim()),
            ));
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl Snapshotter for GitCli {
    async fn snapshot(
        &self,
        uri: &str,
        dest: &Path,
        opts: &CloneOptions,
    ) -> Result<Snapshot, IterateError> {
        let started = Instant::now();

        let mut clone = self.git();
        clone
            .arg("clone")
            .arg("--quiet")
            .args(["--config", "core.autocrlf=false"]);
        if opts.depth > 0 {
            clone.arg("--depth").arg(opts.depth.to_string());
        }
        if let Some(branch) = &opts.branch {
            clone.arg("--branch").arg(branch);
        }
        clone.arg(uri).arg(dest);

        self.run(uri, clone).await?;
        tracing::info!(
            uri,
            branch = opts.branch.as_deref().unwrap_or("<default>"),
            depth = opts.depth,
            path = %dest.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cloned git repository"
        );

        let mut rev_parse = self.git();
        rev_parse.arg("-C").arg(dest).args(["rev-parse", "HEAD"]);
        let head = self.run(uri, rev_parse).await?;
        let head = String::from_utf8_lossy(&head).trim().to_string();

        let mut ls_tree = self.git();
        ls_tree
            .arg("-C")
            .arg(dest)
            .args(["ls-tree", "-r", "-z", "HEAD"]);
        let files = parse_ls_tree(&self.run(uri, ls_tree).await?);
        tracing::debug!(uri, head = %head, files = files.len(), "Resolved head tree");

        Ok(Snapshot { head, files })
    }
}

/// Paths of the regular files in NUL-terminated `ls-tree -r -z` output.
/// Symlinks (`120000`) and submodules (`160000`) are left out so nothing
/// outside the repository's own blobs is ever read.
fn parse_ls_tree(raw: &[u8]) -> Vec<String> {
    raw.split(|b| *b == 0)
        .filter_map(|entry| {
            let tab = entry.iter().position(|b| *b == b'\t')?;
            let (meta, path) = (&entry[..tab], &entry[tab + 1..]);
            let mode = meta.split(|b| *b == b' ').next()?;
            matches!(mode, b"100644" | b"100755").then(|| String::from_utf8_lossy(path).into_owned())
        })
        .collect()
}

/// The directory one clone is written to.
#[derive(Debug)]
pub enum Workdir {
    /// Private scratch space standing in for an in-memory clone. Always removed.
    Scratch(TempDir),
    /// A clone under the configured target directory.
    Target { path: PathBuf, preserve: bool },
}

impl Workdir {
    /// Scratch directory when `target` is `None`, otherwise
    /// `{target}/{basename(uri)}`. An existing directory at that location
    /// belongs to someone else and is left untouched.
    pub fn for_source(target: Option<&Path>, uri: &str, preserve: bool) -> Result<Self> {
        let Some(target) = target else {
            let scratch = tempfile::Builder::new()
                .prefix("wof-iterate-")
                .tempdir()
                .map_err(|e| IterateError::transport(uri, format!("failed to create scratch dir: {e}")))?;
            return Ok(Self::Scratch(scratch));
        };

        let name = clone_dir_name(uri);
        let path = target.join(name);

        if path.exists() {
            tracing::error!(path = %path.display(), uri, "Clone dir already exists");
            return Err(IterateError::transport(
                uri,
                format!("clone dir {} already exists", path.display()),
            ));
        }
        if !target.exists() {
            fs::create_dir_all(target).map_err(|e| {
                tracing::error!(error = ?e, path = %target.display(), "Failed to create target dir");
                IterateError::transport(uri, format!("failed to create {}: {e}", target.display()))
            })?;
        }

        Ok(Self::Target { path, preserve })
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Scratch(dir) => dir.path(),
            Self::Target { path, .. } => path,
        }
    }
}

impl Drop for Workdir {
    fn drop(&mut self) {
        let Self::Target { path, preserve } = self else {
            return;
        };
        if *preserve {
            tracing::debug!(path = %path.display(), "Preserving clone dir");
            return;
        }
        if !path.exists() {
            return;
        }
        match fs::remove_dir_all(&*path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed clone dir"),
            Err(e) => tracing::warn!(error = ?e, path = %path.display(), "Failed to remove clone dir"),
        }
    }
}

/// Last path segment of a clone uri, e.g. `whosonfirst-data-admin-ca.git`.
fn clone_dir_name(uri: &str) -> String {
    let name = uri
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .unwrap_or_default();
    if name.is_empty() {
        "repository".to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ls_tree_keeps_regular_files_only() {
        let raw = b"100644 blob 8ab686eafeb1f44702738c8b0f24f2567c36da6d\tdata/1/1.geojson\0\
100755 blob 1f7391f92b6a3792204e07e99f71f643cc35e7e1\tbin/build\0\
120000 blob 2e65efe2a145dda7ee51d1741299f848e5bf752e\tlinked.geojson\0\
160000 commit 3c4e9cd789d88d8d89c1073707c3585e41b0e614\tvendor/wof\0\
100644 blob 3c4e9cd789d88d8d89c1073707c3585e41b0e614\tdir with space/2.geojson\0";
        assert_eq!(
            parse_ls_tree(raw),
            vec!["data/1/1.geojson", "bin/build", "dir with space/2.geojson"]
        );
        assert!(parse_ls_tree(b"").is_empty());
    }

    #[test]
    fn clone_dir_names() {
        assert_eq!(
            clone_dir_name("https://github.com/whosonfirst-data/whosonfirst-data-admin-ca.git"),
            "whosonfirst-data-admin-ca.git"
        );
        assert_eq!(clone_dir_name("git@github.com:sfomuseum-data/sfomuseum-data-maps"), "sfomuseum-data-maps");
        assert_eq!(clone_dir_name("file:///tmp/repo/"), "repo");
        assert_eq!(clone_dir_name(""), "repository");
    }

    #[test]
    fn target_workdir_is_removed_unless_preserved() {
        let target = tempfile::tempdir().unwrap();

        let dir = Workdir::for_source(Some(target.path()), "https://example.com/a.git", false).unwrap();
        let path = dir.path().to_path_buf();
        fs::create_dir_all(path.join("data")).unwrap();
        drop(dir);
        assert!(!path.exists());

        let dir = Workdir::for_source(Some(target.path()), "https://example.com/b.git", true).unwrap();
        let path = dir.path().to_path_buf();
        fs::create_dir_all(&path).unwrap();
        drop(dir);
        assert!(path.exists());
    }

    #[test]
    fn existing_clone_dir_is_left_alone() {
        let target = tempfile::tempdir().unwrap();
        let existing = target.path().join("a.git");
        fs::create_dir_all(&existing).unwrap();
        fs::write(existing.join("notes.txt"), "keep").unwrap();

        let err = Workdir::for_source(Some(target.path()), "https://example.com/a.git", false).unwrap_err();
        assert!(matches!(err, IterateError::Transport { .. }));
        assert_eq!(err.scope(), Some("https://example.com/a.git"));
        assert!(existing.join("notes.txt").exists());
    }

    #[test]
    fn scratch_workdir_is_always_removed() {
        let dir = Workdir::for_source(None, "https://example.com/a.git", true).unwrap();
        let path = dir.path().to_path_buf();
        assert!(path.exists());
        drop(dir);
        assert!(!path.exists());
    }
}
