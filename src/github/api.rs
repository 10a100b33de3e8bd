//! `githubapi://` iterator: crawls one repository through the contents API
//! without cloning it.
//!
//! ```text
//! githubapi://{owner}/{repo}[/{path}]?access_token=&branch=&concurrent=&workers=&include=&exclude=
//! ```
//!
//! The uris handed to `iterate` are paths inside the repository. With no
//! uris the crawl starts at `{path}`, or at the repository root.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{parse_uri, QueryParams};
use crate::contract::{ContentFile, Contents, ContentsClient, RecordIterator};
use crate::error::{IterateError, Result};
use crate::filters::{Filters, QueryFilters};
use crate::github::{
    decode_content, GitHubClient, RateGate, DEFAULT_BRANCH, DEFAULT_REQUESTS_PER_SECOND,
};
use crate::record::{Record, RecordContent};
use crate::stream::{Emitter, RecordStream};

pub const DEFAULT_WORKERS: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct ApiOptions {
    pub owner: String,
    pub repo: String,
    /// Starting path when `iterate` is given no uris.
    pub base_path: String,
    pub branch: String,
    pub concurrent: bool,
    /// Upper bound on requests in flight.
    pub workers: usize,
    pub requests_per_second: u32,
    #[serde(skip)]
    pub access_token: String,
}

impl ApiOptions {
    pub fn from_uri(uri: &str) -> Result<Self> {
        let url = parse_uri(uri)?;
        let owner = url.host_str().unwrap_or_default().to_string();
        if owner.is_empty() {
            return Err(IterateError::parse("uri", format!("missing repository owner in '{uri}'")));
        }

        let mut segments = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect::<Vec<_>>())
            .unwrap_or_default()
            .into_iter();
        let repo = segments
            .next()
            .ok_or_else(|| IterateError::parse("uri", format!("missing repository name in '{uri}'")))?
            .to_string();
        let base_path = segments.collect::<Vec<_>>().join("/");

        let q = QueryParams::from_url(&url);
        let access_token = q
            .get_non_empty("access_token")
            .ok_or_else(|| IterateError::Auth {
                uri: format!("githubapi://{owner}/{repo}"),
                reason: "missing access_token parameter".into(),
            })?
            .to_string();

        let workers = match q.get_int("workers")? {
            Some(n) if n > 0 => n as usize,
            Some(n) => return Err(IterateError::parse("workers", format!("'{n}' must be positive"))),
            None => DEFAULT_WORKERS,
        };

        Ok(Self {
            owner,
            repo,
            base_path,
            branch: q.get_non_empty("branch").unwrap_or(DEFAULT_BRANCH).to_string(),
            concurrent: q.get_bool("concurrent")?.unwrap_or(false),
            workers,
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            access_token,
        })
    }

    pub fn trace_loaded(&self) {
        info!(
            owner = %self.owner,
            repo = %self.repo,
            branch = %self.branch,
            base_path = %self.base_path,
            concurrent = self.concurrent,
            workers = self.workers,
            requests_per_second = self.requests_per_second,
            access_token = "<redacted>",
            "Loaded GitHub API iterator options"
        );
    }
}

/// Hosted-repository iterator.
pub struct GitHubApiIterator {
    opts: ApiOptions,
    filters: Option<Arc<dyn Filters>>,
    client: Arc<dyn ContentsClient>,
    gate: Arc<RateGate>,
    seen: AtomicI64,
    iterating: AtomicBool,
    closed: AtomicBool,
}

impl GitHubApiIterator {
    pub const SCHEME: &'static str = "githubapi";

    pub fn new(opts: ApiOptions, client: Arc<dyn ContentsClient>) -> Self {
        let gate = Arc::new(RateGate::per_second(opts.requests_per_second));
        Self {
            opts,
            filters: None,
            client,
            gate,
            seen: AtomicI64::new(0),
            iterating: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn from_uri(uri: &str) -> Result<Self> {
        let opts = ApiOptions::from_uri(uri)?;
        opts.trace_loaded();
        let client = GitHubClient::new(Some(opts.access_token.clone()))?;

        let q = QueryParams::from_url(&parse_uri(uri)?);
        let mut it = Self::new(opts, Arc::new(client));
        if let Some(filters) = QueryFilters::from_query(&q)? {
            it.filters = Some(Arc::new(filters));
        }
        Ok(it)
    }

    pub fn with_client(mut self, client: Arc<dyn ContentsClient>) -> Self {
        self.client = client;
        self
    }

    pub fn with_filters(mut self, filters: Arc<dyn Filters>) -> Self {
        self.filters = Some(filters);
        self
    }

    /// Replaces the request rate ceiling.
    pub fn with_rate(mut self, requests_per_second: u32) -> Self {
        self.opts.requests_per_second = requests_per_second;
        self.gate = Arc::new(RateGate::per_second(requests_per_second));
        self
    }

    pub fn with_concurrency(mut self, concurrent: bool) -> Self {
        self.opts.concurrent = concurrent;
        self
    }

    pub fn options(&self) -> &ApiOptions {
        &self.opts
    }

    /// Fetches `path` once a worker slot and a rate slot are free. Resolves
    /// to `None` without a request if the consumer stopped while waiting.
    async fn fetch(&self, path: &str, permits: &Semaphore, out: &Emitter) -> Result<Option<Contents>> {
        let _permit = permits
            .acquire()
            .await
            .map_err(|e| IterateError::transport(path, e))?;
        self.gate.wait().await;
        if out.is_closed() {
            debug!(repo = %self.opts.repo, path, "Consumer stopped, dropping queued request");
            return Ok(None);
        }
        debug!(repo = %self.opts.repo, path, "Fetching repository contents");
        self.client
            .get_contents(&self.opts.owner, &self.opts.repo, path, &self.opts.branch)
            .await
            .map(Some)
    }

    /// Crawls `path`. Resolves to `false` once the consumer has stopped.
    fn crawl(self: Arc<Self>, path: String, out: Emitter, permits: Arc<Semaphore>) -> BoxFuture<'static, bool> {
        async move {
            if out.is_closed() {
                return false;
            }
            let contents = match self.fetch(&path, &permits, &out).await {
                Ok(Some(contents)) => contents,
                Ok(None) => return false,
                Err(e) => {
                    warn!(repo = %self.opts.repo, path = %path, error = %e, "Failed to get repository contents");
                    return out.error(e).await;
                }
            };
            match contents {
                Contents::File(file) => self.emit_file(file, &out).await,
                Contents::Directory(entries) => {
                    let paths = entries.into_iter().map(|e| e.path).collect();
                    if self.opts.concurrent {
                        self.walk_concurrently(paths, out, permits).await
                    } else {
                        self.walk(paths, out, permits).await
                    }
                }
            }
        }
        .boxed()
    }

    async fn walk(self: Arc<Self>, paths: Vec<String>, out: Emitter, permits: Arc<Semaphore>) -> bool {
        for path in paths {
            if !self.clone().crawl(path, out.clone(), permits.clone()).await {
                return false;
            }
        }
        true
    }

    /// One sub-crawl per entry, fanning in through shared emitters.
    async fn walk_concurrently(self: Arc<Self>, paths: Vec<String>, out: Emitter, permits: Arc<Semaphore>) -> bool {
        let mut set = JoinSet::new();
        for path in paths {
            if out.is_closed() {
                break;
            }
            set.spawn(self.clone().crawl(path, out.clone(), permits.clone()));
        }
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                warn!(repo = %self.opts.repo, error = %e, "Directory sub-crawl failed");
            }
        }
        !out.is_closed()
    }

    async fn emit_file(&self, file: ContentFile, out: &Emitter) -> bool {
        self.seen.fetch_add(1, Ordering::SeqCst);

        let body = match decode_content(&file) {
            Ok(body) => body,
            Err(e) => {
                warn!(path = %file.path, error = %e, "Failed to decode file contents");
                return out.error(e).await;
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
                    warn!(path = %file.path, error = %source, "Failed to apply filters");
                    return out
                        .error(IterateError::Filter {
                            path: file.path,
                            source,
                        })
                        .await;
                }
            }
            if let Err(e) = content.rewind() {
                content.close();
                return out.error(IterateError::decode(file.path, e)).await;
            }
        }

        out.record(Record::new(file.path, content)).await
    }
}

impl RecordIterator for GitHubApiIterator {
    fn iterate(self: Arc<Self>, uris: Vec<String>) -> RecordStream {
        if self.closed.load(Ordering::SeqCst) {
            return RecordStream::failed(IterateError::Closed);
        }
        let uris = if uris.is_empty() {
            vec![self.opts.base_path.clone()]
        } else {
            uris
        };
        RecordStream::spawn(move |out| async move {
            self.iterating.store(true, Ordering::SeqCst);
            let permits = Arc::new(Semaphore::new(self.opts.workers));
            for uri in uris {
                if out.is_closed() {
                    debug!(uri = %uri, "Consumer stopped, skipping remaining paths");
                    break;
                }
                let path = uri.trim_matches('/').to_string();
                if !self.clone().crawl(path, out.clone(), permits.clone()).await {
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
