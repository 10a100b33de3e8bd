//! End-to-end `git://` crawls of a repository created on the fly with the
//! `git` command line client. Skipped when `git` is not installed.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;
use wof_iterate::contract::{CloneOptions, Snapshotter};
use wof_iterate::download::GitCli;
use wof_iterate::git::GitIterator;
use wof_iterate::{IterateError, RecordIterator};

fn git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok_and(|o| o.status.success())
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["-c", "user.name=wof", "-c", "user.email=wof@example.com"])
        .args(args)
        .status()
        .unwrap();
    assert!(status.success(), "git {args:?} failed");
}

/// A repository with two documents and a readme on its default branch and
/// one more document on `develop`.
fn fixture_repo() -> TempDir {
    let repo = tempfile::tempdir().unwrap();
    let root = repo.path();
    git(root, &["init", "--quiet"]);

    fs::write(root.join("a.geojson"), r#"{"id": 1, "properties": {"wof:placetype": "region"}}"#).unwrap();
    fs::write(root.join("b.geojson"), r#"{"id": 2, "properties": {"wof:placetype": "locality"}}"#).unwrap();
    fs::write(root.join("readme.md"), "# fixture\n").unwrap();
    git(root, &["add", "."]);
    git(root, &["commit", "--quiet", "-m", "initial"]);

    git(root, &["checkout", "--quiet", "-b", "develop"]);
    fs::create_dir_all(root.join("data")).unwrap();
    fs::write(root.join("data/c.geojson"), r#"{"id": 3, "properties": {"wof:placetype": "county"}}"#).unwrap();
    git(root, &["add", "."]);
    git(root, &["commit", "--quiet", "-m", "develop"]);
    git(root, &["checkout", "--quiet", "-"]);
    repo
}

fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

fn paths(records: &[wof_iterate::Record]) -> BTreeSet<String> {
    records.iter().map(|r| r.path.clone()).collect()
}

#[tokio::test]
async fn snapshot_lists_the_head_tree() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let repo = fixture_repo();
    let dest = tempfile::tempdir().unwrap();
    let clone = dest.path().join("clone");

    let snapshot = GitCli::default()
        .snapshot(&file_url(repo.path()), &clone, &CloneOptions::default())
        .await
        .unwrap();

    assert_eq!(snapshot.head.len(), 40);
    assert_eq!(
        snapshot.files.iter().cloned().collect::<BTreeSet<_>>(),
        BTreeSet::from(["a.geojson".into(), "b.geojson".into(), "readme.md".into()])
    );
}

#[tokio::test]
async fn crawls_a_local_repository() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let repo = fixture_repo();
    let it = Arc::new(GitIterator::from_uri("git://").unwrap());

    let (records, errors) = it.clone().iterate(vec![file_url(repo.path())]).collect_all().await;
    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(
        paths(&records),
        BTreeSet::from(["a.geojson".to_string(), "b.geojson".to_string()])
    );
    assert_eq!(it.seen(), 2);

    // same remote, same paths
    let (again, _) = it.iterate(vec![file_url(repo.path())]).collect_all().await;
    assert_eq!(paths(&again), paths(&records));
}

#[tokio::test]
async fn branch_and_filters_from_the_uri() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let repo = fixture_repo();
    let target = tempfile::tempdir().unwrap();
    let uri = format!(
        "git://{}?branch=develop&preserve=1&exclude=properties.wof:placetype=locality",
        target.path().display()
    );
    let it = Arc::new(GitIterator::from_uri(&uri).unwrap());

    let (records, errors) = it.iterate(vec![file_url(repo.path())]).collect_all().await;
    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(
        paths(&records),
        BTreeSet::from(["a.geojson".to_string(), "data/c.geojson".to_string()])
    );

    let clone_dir = target.path().join(repo.path().file_name().unwrap());
    assert!(clone_dir.join("data/c.geojson").exists());
}

#[tokio::test]
async fn missing_repository_is_a_transport_error() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let missing = tempfile::tempdir().unwrap();
    let it = Arc::new(GitIterator::from_uri("git://").unwrap());

    let (records, errors) = it
        .iterate(vec![file_url(&missing.path().join("nope"))])
        .collect_all()
        .await;
    assert!(records.is_empty());
    assert!(matches!(errors.as_slice(), [IterateError::Transport { .. }]));
}

#[cfg(unix)]
#[tokio::test]
async fn committed_symlinks_are_not_records() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let outside = tempfile::tempdir().unwrap();
    let host_file = outside.path().join("host.geojson");
    fs::write(&host_file, "host file").unwrap();

    let repo = tempfile::tempdir().unwrap();
    let root = repo.path();
    git(root, &["init", "--quiet"]);
    fs::write(root.join("a.geojson"), r#"{"id": 1}"#).unwrap();
    std::os::unix::fs::symlink(&host_file, root.join("linked.geojson")).unwrap();
    git(root, &["add", "."]);
    git(root, &["commit", "--quiet", "-m", "symlink"]);

    let it = Arc::new(GitIterator::from_uri("git://").unwrap());
    let (mut records, errors) = it.iterate(vec![file_url(root)]).collect_all().await;

    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(paths(&records), BTreeSet::from(["a.geojson".to_string()]));
    assert_eq!(records[0].read_to_vec().unwrap(), br#"{"id": 1}"#);
}
