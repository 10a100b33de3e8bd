//! GitHub backends and the REST client they share.
//!
//! - [`api`]: `githubapi://` crawls one repository through the contents API.
//! - [`organizations`]: paginated, filtered repository listing.
//! - [`organization`]: `githuborg://` fans out over an organization's repositories.

pub mod api;
pub mod organization;
pub mod organizations;

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::header::{ACCEPT, LINK};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::debug;

use crate::contract::{
    ContentEntry, ContentFile, Contents, ContentsClient, Repository, RepositoryLister,
    RepositoryPage,
};
use crate::error::{IterateError, Result};

pub const API_BASE: &str = "https://api.github.com";
pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 10;

/// Minimal GitHub REST client covering contents, repository listing and
/// commit lookups.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(token: Option<String>) -> Result<Self> {
        Self::with_base(API_BASE, token)
    }

    pub fn with_base(base: &str, token: Option<String>) -> Result<Self> {
        let base = Url::parse(base).map_err(|e| IterateError::parse("api base", e))?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("wof-iterate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IterateError::transport(base.as_str(), e))?;
        Ok(Self {
            http,
            base,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| IterateError::parse("api base", "cannot be a base url"))?
            .pop_if_empty()
            .extend(segments.into_iter().filter(|s| !s.is_empty()));
        Ok(url)
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response> {
        debug!(url = %url, "GitHub API request");
        let mut req = self
            .http
            .get(url.clone())
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| IterateError::transport(url.as_str(), e))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp
            .text()
            .await
            .unwrap_or_else(|_| String::from("<failed to read response body>"));
        let reason = format!("{status}: {}", body.trim());
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(IterateError::Auth {
                uri: url.to_string(),
                reason,
            })
        } else {
            Err(IterateError::transport(url.as_str(), reason))
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ContentsResponse {
    Directory(Vec<ContentEntry>),
    File(ContentFile),
}

#[derive(Deserialize)]
struct CommitDetail {
    #[serde(default)]
    files: Vec<serde_json::Value>,
}

#[async_trait]
impl ContentsClient for GitHubClient {
    async fn get_contents(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        reference: &str,
    ) -> Result<Contents, IterateError> {
        let mut url = self.endpoint(
            ["repos", owner, repo, "contents"]
                .into_iter()
                .chain(path.split('/')),
        )?;
        url.query_pairs_mut().append_pair("ref", reference);

        let resp = self.get(url).await?;
        match resp.json::<ContentsResponse>().await {
            Ok(ContentsResponse::File(file)) => Ok(Contents::File(file)),
            Ok(ContentsResponse::Directory(entries)) => Ok(Contents::Directory(entries)),
            Err(e) => Err(IterateError::decode(path, e)),
        }
    }
}

#[async_trait]
impl RepositoryLister for GitHubClient {
    async fn list_page(
        &self,
        org: &str,
        page: u32,
        per_page: u32,
    ) -> Result<RepositoryPage, IterateError> {
        let mut url = self.endpoint(["orgs", org, "repos"])?;
        url.query_pairs_mut()
            .append_pair("type", "all")
            .append_pair("per_page", &per_page.to_string())
            .append_pair("page", &page.to_string());

        let resp = self.get(url.clone()).await?;
        let next_page = next_page(
            resp.headers()
                .get(LINK)
                .and_then(|v| v.to_str().ok()),
        );
        let repositories = resp
            .json::<Vec<Repository>>()
            .await
            .map_err(|e| IterateError::decode(url.as_str(), e))?;
        Ok(RepositoryPage {
            repositories,
            next_page,
        })
    }

    async fn latest_commit_file_count(
        &self,
        org: &str,
        repo: &str,
        reference: &str,
    ) -> Result<usize, IterateError> {
        let url = self.endpoint(["repos", org, repo, "commits", reference])?;
        let resp = self.get(url.clone()).await?;
        let commit = resp
            .json::<CommitDetail>()
            .await
            .map_err(|e| IterateError::decode(url.as_str(), e))?;
        Ok(commit.files.len())
    }
}

/// Page number of the `rel="next"` entry of a `Link` header.
fn next_page(link: Option<&str>) -> Option<u32> {
    link?
        .split(',')
        .find(|part| part.contains("rel=\"next\""))
        .and_then(|part| {
            let start = part.find('<')? + 1;
            let end = part.find('>')?;
            Url::parse(part.get(start..end)?).ok()
        })
        .and_then(|url| {
            url.query_pairs()
                .find(|(k, _)| k == "page")
                .and_then(|(_, v)| v.parse().ok())
        })
}

/// Decodes the body of a contents API file result.
pub fn decode_content(file: &ContentFile) -> Result<Vec<u8>> {
    let content = file
        .content
        .as_deref()
        .ok_or_else(|| IterateError::decode(&file.path, "response has no content"))?;
    match file.encoding.as_deref() {
        Some("base64") => {
            let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
            STANDARD
                .decode(compact)
                .map_err(|e| IterateError::decode(&file.path, e))
        }
        None | Some("") => Ok(content.as_bytes().to_vec()),
        Some(other) => Err(IterateError::decode(
            &file.path,
            format!("unsupported content encoding '{other}'"),
        )),
    }
}

/// Fixed-rate gate every outbound request passes through.
#[derive(Debug)]
pub struct RateGate {
    period: Duration,
    next: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn per_second(requests: u32) -> Self {
        Self {
            period: Duration::from_secs(1) / requests.max(1),
            next: Mutex::new(None),
        }
    }

    /// Waits for the next free slot.
    pub async fn wait(&self) {
        let slot = {
            let mut next = self.next.lock().unwrap_or_else(|p| p.into_inner());
            let now = Instant::now();
            let slot = match *next {
                Some(t) if t > now => t,
                _ => now,
            };
            *next = Some(slot + self.period);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}
