//! Listing an organization's repositories under name, fork, archive and
//! activity filters.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::QueryParams;
use crate::contract::{Repository, RepositoryLister};
use crate::error::{IterateError, Result};

pub const DEFAULT_PER_PAGE: u32 = 100;

/// Filters applied to each listed repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListOptions {
    /// Names must start with one of these, when any are given.
    pub prefix: Vec<String>,
    /// Names starting with any of these are dropped.
    pub exclude: Vec<String>,
    pub forked: bool,
    pub not_forked: bool,
    pub exclude_archived: bool,
    pub pushed_since: Option<DateTime<Utc>>,
    /// Skip repositories whose latest commit touched no files.
    pub ensure_commits: bool,
    #[serde(skip)]
    pub access_token: Option<String>,
    pub per_page: u32,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            prefix: Vec::new(),
            exclude: Vec::new(),
            forked: false,
            not_forked: false,
            exclude_archived: false,
            pushed_since: None,
            ensure_commits: false,
            access_token: None,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl ListOptions {
    pub fn from_query(q: &QueryParams) -> Result<Self> {
        Ok(Self {
            prefix: q.get_all("prefix").into_iter().filter(|p| !p.is_empty()).collect(),
            exclude: q.get_all("exclude").into_iter().filter(|p| !p.is_empty()).collect(),
            forked: q.get_bool("forked")?.unwrap_or(false),
            not_forked: q.get_bool("not_forked")?.unwrap_or(false),
            exclude_archived: q.get_bool("exclude_archived")?.unwrap_or(false),
            pushed_since: q.get_timestamp("pushed_since")?,
            ensure_commits: q.get_bool("ensure_commits")?.unwrap_or(false),
            access_token: q.get_non_empty("access_token").map(str::to_string),
            per_page: DEFAULT_PER_PAGE,
        })
    }

    /// Whether `repo` passes every metadata filter. Commit activity is
    /// checked separately since it needs another request.
    pub fn matches(&self, repo: &Repository) -> bool {
        if !self.prefix.is_empty() && !self.prefix.iter().any(|p| repo.name.starts_with(p.as_str())) {
            return false;
        }
        if self.exclude.iter().any(|p| repo.name.starts_with(p.as_str())) {
            return false;
        }
        if self.forked && !repo.fork {
            return false;
        }
        if self.not_forked && repo.fork {
            return false;
        }
        if self.exclude_archived && repo.archived {
            return false;
        }
        if let Some(since) = self.pushed_since {
            match repo.pushed_at {
                Some(pushed) if pushed >= since => {}
                _ => return false,
            }
        }
        true
    }

    pub fn trace_loaded(&self, org: &str) {
        info!(
            org,
            prefix = ?self.prefix,
            exclude = ?self.exclude,
            forked = self.forked,
            not_forked = self.not_forked,
            exclude_archived = self.exclude_archived,
            pushed_since = ?self.pushed_since,
            ensure_commits = self.ensure_commits,
            access_token = if self.access_token.is_some() { "<redacted>" } else { "<none>" },
            "Loaded repository list options"
        );
    }
}

/// Outcome of listing one organization.
#[derive(Debug, Default)]
pub struct RepositoryListing {
    pub repositories: Vec<Repository>,
    /// Repositories whose commit activity could not be checked. They are
    /// left out of `repositories`.
    pub errors: Vec<IterateError>,
}

/// Pages through `org`'s repositories and keeps the ones matching `opts`.
/// A failed page ends the listing; a failed activity check only drops its
/// repository.
pub async fn list_repos(
    lister: &dyn RepositoryLister,
    org: &str,
    opts: &ListOptions,
) -> Result<RepositoryListing> {
    let mut listing = RepositoryListing::default();
    let mut page = 1;

    loop {
        let fetched = lister.list_page(org, page, opts.per_page).await?;
        debug!(org, page, count = fetched.repositories.len(), "Listed repositories");

        for repo in fetched.repositories {
            if !opts.matches(&repo) {
                continue;
            }
            if opts.ensure_commits {
                let reference = repo.default_branch.as_deref().unwrap_or("HEAD");
                match lister.latest_commit_file_count(org, &repo.name, reference).await {
                    Ok(0) => {
                        debug!(org, repo = %repo.name, "Skipping repository, latest commit touched no files");
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(org, repo = %repo.name, error = %e, "Failed to check latest commit");
                        listing.errors.push(e);
                        continue;
                    }
                }
            }
            listing.repositories.push(repo);
        }

        match fetched.next_page {
            Some(next) if next > page => page = next,
            _ => break,
        }
    }

    Ok(listing)
}
