//! `githuborg://` iterator: crawls every matching repository of one or more
//! GitHub organizations through per-repository `git://` iterators.
//!
//! ```text
//! githuborg://{path}?dedupe=&concurrent=&workers=&{git parameters}
//! ```
//!
//! `{path}` and any parameter not consumed here are handed to the `git://`
//! iterator built for each repository. The uris handed to `iterate` name an
//! organization by scheme:
//!
//! ```text
//! {org}://?prefix=&exclude=&forked=&not_forked=&exclude_archived=&pushed_since=&ensure_commits=&access_token=&retry=&max_retries=&retry_after=
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{parse_uri, uri_path, QueryParams, RetryPolicy};
use crate::contract::{RecordIterator, RepositoryLister, Snapshotter};
use crate::download::GitCli;
use crate::error::{IterateError, Result};
use crate::filters::QueryFilters;
use crate::git::{GitIterator, GitOptions};
use crate::github::organizations::{list_repos, ListOptions};
use crate::github::GitHubClient;
use crate::record::Record;
use crate::stream::{Emitter, RecordStream};
use crate::wof_uri;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_SOURCE_BASE: &str = "https://github.com";

const OWN_PARAMS: [&str; 3] = ["dedupe", "concurrent", "workers"];

/// Builds a repository lister for an optional access token.
pub type ListerFactory = dyn Fn(Option<&str>) -> Result<Arc<dyn RepositoryLister>> + Send + Sync;

#[derive(Debug, Clone, Serialize)]
pub struct OrganizationOptions {
    /// Clone target handed to each `git://` iterator. Empty clones into scratch space.
    pub target: String,
    pub dedupe: bool,
    pub concurrent: bool,
    /// Upper bound on repositories crawled at once in concurrent mode.
    pub workers: usize,
    /// Clone urls are `{source_base}/{org}/{repo}.git`.
    pub source_base: String,
}

impl OrganizationOptions {
    pub fn trace_loaded(&self) {
        info!(
            target_dir = %self.target,
            dedupe = self.dedupe,
            concurrent = self.concurrent,
            workers = self.workers,
            source_base = %self.source_base,
            "Loaded organization iterator options"
        );
    }
}

/// Canonical paths already yielded during one crawl.
#[derive(Debug, Default)]
pub struct DedupSet {
    keys: Mutex<HashSet<String>>,
}

impl DedupSet {
    /// Records `key`. Returns `false` if it was already present.
    pub fn insert(&self, key: String) -> bool {
        self.keys.lock().unwrap_or_else(|p| p.into_inner()).insert(key)
    }

    pub fn len(&self) -> usize {
        self.keys.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Organization fan-out iterator.
pub struct OrganizationIterator {
    opts: OrganizationOptions,
    git_query: QueryParams,
    listers: Box<ListerFactory>,
    snapshotter: Arc<dyn Snapshotter>,
    seen: AtomicI64,
    iterating: AtomicBool,
    closed: AtomicBool,
}

impl OrganizationIterator {
    pub const SCHEME: &'static str = "githuborg";

    /// `git_query` is forwarded verbatim to every repository crawl.
    pub fn new(opts: OrganizationOptions, git_query: QueryParams) -> Self {
        Self {
            opts,
            git_query,
            listers: Box::new(|token: Option<&str>| -> Result<Arc<dyn RepositoryLister>> {
                let client = GitHubClient::new(token.map(str::to_string))?;
                Ok(Arc::new(client))
            }),
            snapshotter: Arc::new(GitCli::default()),
            seen: AtomicI64::new(0),
            iterating: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn from_uri(uri: &str) -> Result<Self> {
        let url = parse_uri(uri)?;
        if url.scheme() != Self::SCHEME {
            return Err(IterateError::parse(
                "uri",
                format!("expected githuborg:// uri, got '{uri}'"),
            ));
        }

        let mut q = QueryParams::from_url(&url);
        let workers = match q.get_int("workers")? {
            Some(n) if n > 0 => n as usize,
            Some(n) => return Err(IterateError::parse("workers", format!("'{n}' must be positive"))),
            None => DEFAULT_WORKERS,
        };
        let opts = OrganizationOptions {
            target: uri_path(&url)?,
            dedupe: q.get_bool("dedupe")?.unwrap_or(false),
            concurrent: q.get_bool("concurrent")?.unwrap_or(false),
            workers,
            source_base: DEFAULT_SOURCE_BASE.to_string(),
        };
        for key in OWN_PARAMS {
            q.remove(key);
        }

        // reject bad repository parameters now rather than once per repository
        GitOptions::from_query(&opts.target, &q)?;
        QueryFilters::from_query(&q)?;

        opts.trace_loaded();
        Ok(Self::new(opts, q))
    }

    /// Uses `lister` for every organization regardless of access token.
    pub fn with_lister(mut self, lister: Arc<dyn RepositoryLister>) -> Self {
        self.listers = Box::new(move |_: Option<&str>| -> Result<Arc<dyn RepositoryLister>> {
            Ok(lister.clone())
        });
        self
    }

    pub fn with_snapshotter(mut self, snapshotter: Arc<dyn Snapshotter>) -> Self {
        self.snapshotter = snapshotter;
        self
    }

    pub fn with_source_base(mut self, base: impl Into<String>) -> Self {
        self.opts.source_base = base.into();
        self
    }

    pub fn with_concurrency(mut self, concurrent: bool, workers: usize) -> Self {
        self.opts.concurrent = concurrent;
        self.opts.workers = workers.max(1);
        self
    }

    pub fn options(&self) -> &OrganizationOptions {
        &self.opts
    }

    fn source_url(&self, org: &str, repo: &str) -> String {
        format!("{}/{org}/{repo}.git", self.opts.source_base.trim_end_matches('/'))
    }

    /// The `git://` uri repository crawls are configured with.
    pub fn git_uri(&self, retry: &RetryPolicy) -> Result<String> {
        let mut url = parse_uri("git://")?;
        url.set_path(&self.opts.target);
        let mut q = self.git_query.clone();
        retry.forward_into(&mut q);
        q.apply_to(&mut url);
        Ok(url.to_string())
    }

    /// Crawls one organization uri. Returns `false` once the consumer has stopped.
    async fn crawl_organization(
        self: &Arc<Self>,
        uri: &str,
        dedup: Option<Arc<DedupSet>>,
        out: &Emitter,
    ) -> bool {
        let url = match parse_uri(uri) {
            Ok(url) => url,
            Err(e) => return out.error(e).await,
        };
        let org = url.scheme().to_string();
        let q = QueryParams::from_url(&url);

        let list_opts = match ListOptions::from_query(&q) {
            Ok(opts) => opts,
            Err(e) => return out.error(e).await,
        };
        let retry = match RetryPolicy::from_query(&q) {
            Ok(retry) => retry,
            Err(e) => return out.error(e).await,
        };
        list_opts.trace_loaded(&org);
        if retry.retry {
            retry.trace_loaded();
        }

        let lister = match (self.listers)(list_opts.access_token.as_deref()) {
            Ok(lister) => lister,
            Err(e) => return out.error(e).await,
        };
        let listing = match list_repos(lister.as_ref(), &org, &list_opts).await {
            Ok(listing) => listing,
            Err(e) => {
                error!(org = %org, error = %e, "Failed to list repositories");
                return out.error(e).await;
            }
        };
        for e in listing.errors {
            if !out.error(e).await {
                return false;
            }
        }
        let repos = listing.repositories;
        info!(org = %org, repos = repos.len(), "Crawling organization repositories");

        let git_uri = match self.git_uri(&retry) {
            Ok(uri) => uri,
            Err(e) => return out.error(e).await,
        };
        let sources: Vec<String> = repos
            .iter()
            .map(|repo| self.source_url(&org, &repo.name))
            .collect();

        if self.opts.concurrent {
            self.crawl_concurrently(git_uri, sources, dedup, out).await
        } else {
            for source in sources {
                if out.is_closed() {
                    return false;
                }
                if !self
                    .clone()
                    .crawl_repository(git_uri.clone(), source, dedup.clone(), out.clone())
                    .await
                {
                    return false;
                }
            }
            true
        }
    }

    async fn crawl_concurrently(
        self: &Arc<Self>,
        git_uri: String,
        sources: Vec<String>,
        dedup: Option<Arc<DedupSet>>,
        out: &Emitter,
    ) -> bool {
        let permits = Arc::new(Semaphore::new(self.opts.workers));
        let mut set = JoinSet::new();

        for source in sources {
            if out.is_closed() {
                break;
            }
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let this = self.clone();
            let git_uri = git_uri.clone();
            let dedup = dedup.clone();
            let out = out.clone();
            set.spawn(async move {
                let _permit = permit;
                this.crawl_repository(git_uri, source, dedup, out).await
            });
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Repository crawl failed");
            }
        }
        !out.is_closed()
    }

    async fn crawl_repository(
        self: Arc<Self>,
        git_uri: String,
        source: String,
        dedup: Option<Arc<DedupSet>>,
        out: Emitter,
    ) -> bool {
        let git = match GitIterator::from_uri(&git_uri) {
            Ok(it) => Arc::new(it.with_snapshotter(self.snapshotter.clone())),
            Err(e) => return out.error(e).await,
        };
        debug!(source = %source, "Crawling repository");

        let mut records = git.iterate(vec![source]);
        while let Some(item) = records.next().await {
            let delivered = match item {
                Ok(rec) => self.forward(rec, dedup.as_deref(), &out).await,
                Err(e) => out.error(e).await,
            };
            if !delivered {
                records.close().await;
                return false;
            }
        }
        true
    }

    async fn forward(&self, rec: Record, dedup: Option<&DedupSet>, out: &Emitter) -> bool {
        if let Some(dedup) = dedup {
            match wof_uri::canonical_path(&rec.path) {
                Ok(key) => {
                    if !dedup.insert(key) {
                        debug!(path = %rec.path, "Skip record because duplicate");
                        rec.close();
                        return true;
                    }
                }
                Err(e) => {
                    rec.close();
                    return out.error(e).await;
                }
            }
        }
        self.seen.fetch_add(1, Ordering::SeqCst);
        out.record(rec).await
    }
}

impl RecordIterator for OrganizationIterator {
    fn iterate(self: Arc<Self>, uris: Vec<String>) -> RecordStream {
        if self.closed.load(Ordering::SeqCst) {
            return RecordStream::failed(IterateError::Closed);
        }
        RecordStream::spawn(move |out| async move {
            self.iterating.store(true, Ordering::SeqCst);
            let dedup = self.opts.dedupe.then(|| Arc::new(DedupSet::default()));
            for uri in &uris {
                if out.is_closed() {
                    debug!(uri, "Consumer stopped, skipping remaining organizations");
                    break;
                }
                if !self.crawl_organization(uri, dedup.clone(), &out).await {
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
