//! # contract: the seams between iterators and the outside world
//!
//! This module defines the traits every backend is written against, plus
//! the plain data types that cross them.
//!
//! - [`RecordIterator`]: the surface a consumer sees (pull a stream, read
//!   the seen count and liveness flag, close).
//! - [`Snapshotter`]: produces a shallow checkout of one repository on disk.
//! - [`ContentsClient`]: lists or fetches one path through a hosted
//!   repository API.
//! - [`RepositoryLister`]: pages through an organization's repositories and
//!   inspects recent commit activity.
//!
//! The collaborator traits are annotated for `mockall` so tests can drive
//! the iterators without network access or a `git` binary.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::error::{IterateError, Result};
use crate::stream::RecordStream;

/// A configured crawler. Constructed once from a URI, it can be asked to
/// crawl any number of source uris.
pub trait RecordIterator: Send + Sync {
    /// Starts crawling `uris` and returns the lazily produced records.
    /// Must be called from within a tokio runtime.
    fn iterate(self: Arc<Self>, uris: Vec<String>) -> RecordStream;

    /// Total number of records seen so far, across all crawls.
    fn seen(&self) -> i64;

    /// Whether a crawl is currently running.
    fn is_iterating(&self) -> bool;

    /// Releases standing resources. Later crawls yield [`IterateError::Closed`].
    fn close(&self) -> Result<()>;
}

/// How a repository snapshot is fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloneOptions {
    /// `None` clones the remote's default branch.
    pub branch: Option<String>,
    /// Number of commits to fetch. `0` fetches full history.
    pub depth: u32,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            branch: None,
            depth: 1,
        }
    }
}

/// A checked-out repository: the head commit and the files of its tree in
/// the tree's own enumeration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub head: String,
    pub files: Vec<String>,
}

/// Clones one repository into `dest` and describes its head tree.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Snapshotter: Send + Sync {
    async fn snapshot(
        &self,
        uri: &str,
        dest: &Path,
        opts: &CloneOptions,
    ) -> Result<Snapshot, IterateError>;
}

/// A file returned by a contents listing. `content` is encoded as named by
/// `encoding` (normally base64).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContentFile {
    pub path: String,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContentEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Contents {
    File(ContentFile),
    Directory(Vec<ContentEntry>),
}

/// Read access to a hosted repository's contents.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ContentsClient: Send + Sync {
    /// Fetches `path` of `owner/repo` at `reference`. An empty path is the
    /// repository root.
    async fn get_contents(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        reference: &str,
    ) -> Result<Contents, IterateError>;
}

/// Repository metadata as returned by an organization listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Repository {
    pub name: String,
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub pushed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub default_branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RepositoryPage {
    pub repositories: Vec<Repository>,
    /// Page number to request next, if any.
    pub next_page: Option<u32>,
}

/// Paginated access to an organization's repositories.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RepositoryLister: Send + Sync {
    /// Fetches one page (1-based) of repositories belonging to `org`.
    async fn list_page(
        &self,
        org: &str,
        page: u32,
        per_page: u32,
    ) -> Result<RepositoryPage, IterateError>;

    /// Number of files touched by the most recent commit on `reference`.
    async fn latest_commit_file_count(
        &self,
        org: &str,
        repo: &str,
        reference: &str,
    ) -> Result<usize, IterateError>;
}
