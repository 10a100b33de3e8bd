//! `git://` iterator: crawls the head tree of shallow repository clones.
//!
//! ```text
//! git://{path}?branch=&depth=&preserve=&extension=&include=&exclude=&include_mode=&exclude_mode=
//! ```
//!
//! `{path}` is an optional directory clones are written to; without it each
//! clone goes to a private scratch directory. A source whose clone
//! directory already exists is reported and skipped. Clones on disk are
//! removed after their repository has been walked unless `preserve` is set.
//! Sources are crawled one after the other.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{parse_uri, uri_path, QueryParams, RetryPolicy};
use crate::contract::{CloneOptions, RecordIterator, Snapshotter};
use crate::download::{GitCli, Workdir};
use crate::error::{IterateError, Result};
use crate::filters::{Filters, QueryFilters};
use crate::record::{Record, RecordContent};
use crate::stream::{Emitter, RecordStream};

pub const DEFAULT_EXTENSION: &str = ".geojson";

/// Effective configuration of a [`GitIterator`].
#[derive(Debug, Clone, Serialize)]
pub struct GitOptions {
    /// `None` clones into scratch space.
    pub target: Option<PathBuf>,
    pub preserve: bool,
    pub clone: CloneOptions,
    /// File extensions (with leading dot) considered documents.
    pub extensions: Vec<String>,
    /// Advisory only.
    pub retry: RetryPolicy,
}

impl Default for GitOptions {
    fn default() -> Self {
        Self {
            target: None,
            preserve: false,
            clone: CloneOptions::default(),
            extensions: vec![DEFAULT_EXTENSION.to_string()],
            retry: RetryPolicy::default(),
        }
    }
}

impl GitOptions {
    pub fn from_query(path: &str, q: &QueryParams) -> Result<Self> {
        let mut opts = Self {
            target: (!path.is_empty()).then(|| PathBuf::from(path)),
            ..Self::default()
        };

        if let Some(preserve) = q.get_bool("preserve")? {
            opts.preserve = preserve;
        }
        opts.clone.branch = q.get_non_empty("branch").map(str::to_string);
        if let Some(depth) = q.get_int("depth")? {
            opts.clone.depth = u32::try_from(depth)
                .map_err(|_| IterateError::parse("depth", format!("'{depth}' is out of range")))?;
        }

        let extensions = q.get_all("extension");
        if !extensions.is_empty() {
            opts.extensions = extensions
                .into_iter()
                .filter(|e| !e.is_empty())
                .map(|e| if e.starts_with('.') { e } else { format!(".{e}") })
                .collect();
        }

        opts.retry = RetryPolicy::from_forwarded(q)?;
        Ok(opts)
    }

    pub fn is_document(&self, path: &str) -> bool {
        let name = path.rsplit('/').next().unwrap_or(path);
        self.extensions
            .iter()
            .any(|ext| name.len() > ext.len() && name.ends_with(ext.as_str()))
    }

    pub fn trace_loaded(&self) {
        info!(
            target_dir = ?self.target,
            preserve = self.preserve,
            branch = self.clone.branch.as_deref().unwrap_or("<default>"),
            depth = self.clone.depth,
            extensions = ?self.extensions,
            "Loaded git iterator options"
        );
        debug!(options = ?self, "Git iterator options (full debug)");
    }
}

/// Repository-snapshot iterator.
pub struct GitIterator {
    opts: GitOptions,
    filters: Option<Arc<dyn Filters>>,
    snapshotter: Arc<dyn Snapshotter>,
    seen: AtomicI64,
    iterating: AtomicBool,
    closed: AtomicBool,
}

impl GitIterator {
    pub const SCHEME: &'static str = "git";

    pub fn new(opts: GitOptions) -> Self {
        Self {
            opts,
            filters: None,
            snapshotter: Arc::new(GitCli::default()),
            seen: AtomicI64::new(0),
            iterating: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Builds an iterator from a `git://` URI.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let url = parse_uri(uri)?;
        if url.scheme() != Self::SCHEME {
            return Err(IterateError::parse("uri", format!("expected git:// uri, got '{uri}'")));
        }
        let q = QueryParams::from_url(&url);
        let opts = GitOptions::from_query(&uri_path(&url)?, &q)?;
        opts.trace_loaded();

        let mut it = Self::new(opts);
        if let Some(filters) = QueryFilters::from_query(&q)? {
            it.filters = Some(Arc::new(filters));
        }
        Ok(it)
    }

    pub fn with_filters(mut self, filters: Arc<dyn Filters>) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn with_snapshotter(mut self, snapshotter: Arc<dyn Snapshotter>) -> Self {
        self.snapshotter = snapshotter;
        self
    }

    pub fn options(&self) -> &GitOptions {
        &self.opts
    }

    /// Retry settings forwarded by an organization crawl. Never acted on here.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.opts.retry
    }

    /// Crawls one source. Returns `false` once the consumer has stopped.
    async fn crawl_source(&self, uri: &str, out: &Emitter) -> bool {
        let workdir = match Workdir::for_source(self.opts.target.as_deref(), uri, self.opts.preserve) {
            Ok(dir) => dir,
            Err(e) => return out.error(e).await,
        };

        let snapshot = match self
            .snapshotter
            .snapshot(uri, workdir.path(), &self.opts.clone)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(uri, error = %e, "Failed to clone repository");
                return out.error(e).await;
            }
        };
        debug!(uri, head = %snapshot.head, files = snapshot.files.len(), "Walking head tree");

        for path in &snapshot.files {
            if !self.opts.is_document(path) {
                continue;
            }
            if !self.emit_file(workdir.path(), path, out).await {
                return false;
            }
        }
        // workdir drops here, removing the clone unless preserved
        true
    }

    async fn emit_file(&self, root: &Path, path: &str, out: &Emitter) -> bool {
        let full = root.join(path);
        match tokio::fs::symlink_metadata(&full).await {
            Ok(meta) if meta.file_type().is_file() => {}
            Ok(_) => {
                warn!(path, "Refusing to read non-regular file from clone");
                return out.error(IterateError::decode(path, "not a regular file")).await;
            }
            Err(e) => {
                warn!(path, error = %e, "Failed to stat file in clone");
                return out.error(IterateError::decode(path, e)).await;
            }
        }
        let body = match tokio::fs::read(&full).await {
            Ok(body) => body,
            Err(e) => {
                warn!(path, error = %e, "Failed to read file from clone");
                return out.error(IterateError::decode(path, e)).await;
            }
        };
        let mut content = RecordContent::new(body);

        if let Some(filters) = &self.filters {
            match filters.apply(&mut content) {
                Ok(true) => {}
                Ok(false) => {
                    content.close();
                    return true;
                }
                Err(source) => {
                    content.close();
                    warn!(path, error = %source, "Failed to apply filters");
                    return out
                        .error(IterateError::Filter {
                            path: path.to_string(),
                            source,
                        })
                        .await;
                }
            }
            if let Err(e) = content.rewind() {
                content.close();
                return out.error(IterateError::decode(path, e)).await;
            }
        }

        self.seen.fetch_add(1, Ordering::SeqCst);
        out.record(Record::new(path, content)).await
    }
}

impl RecordIterator for GitIterator {
    fn iterate(self: Arc<Self>, uris: Vec<String>) -> RecordStream {
        if self.closed.load(Ordering::SeqCst) {
            return RecordStream::failed(IterateError::Closed);
        }
        RecordStream::spawn(move |out| async move {
            self.iterating.store(true, Ordering::SeqCst);
            for uri in &uris {
                if out.is_closed() {
                    debug!(uri, "Consumer stopped, skipping remaining sources");
                    break;
                }
                if !self.crawl_source(uri, &out).await {
                    break;
                }
            }
            self.iterating.store(false, Ordering::SeqCst);
        })
    }

    fn seen(&self) -> i64 {
        self.seen.load(Ordering::SeqCst)
    }

    fn is_iterating(&self) -> bool {
        self.iterating.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
