//! Typed access to the query parameters of iterator URIs.
//!
//! Iterators are configured entirely through URIs such as
//! `git:///tmp/clones?depth=1&preserve=true`. [`QueryParams`] wraps the
//! decoded query so each constructor can pull booleans, integers and
//! timestamps out of it with errors that name the offending parameter.

use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use reqwest::Url;
use serde::Serialize;
use tracing::info;

use crate::error::{IterateError, Result};

/// Parses `uri` into a [`Url`], mapping failures to [`IterateError::Parse`].
pub fn parse_uri(uri: &str) -> Result<Url> {
    Url::parse(uri).map_err(|e| IterateError::parse("uri", format!("'{uri}': {e}")))
}

/// The percent-decoded path of `url`, e.g. `/tmp/my clones` for
/// `git:///tmp/my%20clones`.
pub fn uri_path(url: &Url) -> Result<String> {
    percent_decode_str(url.path())
        .decode_utf8()
        .map(|p| p.into_owned())
        .map_err(|e| IterateError::parse("path", format!("'{}': {e}", url.path())))
}

/// Decoded `key=value` pairs of a URI query, in their original order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn from_url(url: &Url) -> Self {
        Self {
            pairs: url
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    /// First value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First non-empty value for `key`.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    pub fn get_all(&self, key: &str) -> Vec<String> {
        self.pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => parse_bool(v)
                .map(Some)
                .ok_or_else(|| IterateError::parse(key, format!("'{v}' is not a boolean"))),
        }
    }

    pub fn get_int(&self, key: &str) -> Result<Option<i64>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .parse::<i64>()
                .map(Some)
                .map_err(|e| IterateError::parse(key, format!("'{v}': {e}"))),
        }
    }

    pub fn get_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        match self.get_non_empty(key) {
            None => Ok(None),
            Some(v) => DateTime::parse_from_rfc3339(v)
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(|e| IterateError::parse(key, format!("'{v}': {e}"))),
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.remove(key);
        self.pairs.push((key.to_string(), value.into()));
    }

    pub fn remove(&mut self, key: &str) {
        self.pairs.retain(|(k, _)| k != key);
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Replaces the query of `url` with these parameters.
    pub fn apply_to(&self, url: &mut Url) {
        if self.pairs.is_empty() {
            url.set_query(None);
            return;
        }
        url.query_pairs_mut().clear().extend_pairs(self.pairs.iter());
    }
}

/// Accepts `1 t T TRUE true True` and `0 f F FALSE false False`.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Retry settings parsed from an organization URI. They are carried through
/// to the snapshot iterators as metadata for an outer layer; nothing in this
/// crate retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    pub retry: bool,
    pub max_retries: i64,
    /// Seconds.
    pub retry_after: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry: false,
            max_retries: 3,
            retry_after: 10,
        }
    }
}

impl RetryPolicy {
    pub const RETRY: &'static str = "retry";
    pub const MAX_RETRIES: &'static str = "max_retries";
    pub const RETRY_AFTER: &'static str = "retry_after";

    pub const FORWARD_RETRY: &'static str = "_retry";
    pub const FORWARD_MAX_RETRIES: &'static str = "_max_retries";
    pub const FORWARD_RETRY_AFTER: &'static str = "_retry_after";

    /// Reads `retry`, `max_retries` and `retry_after` as supplied by a caller.
    pub fn from_query(q: &QueryParams) -> Result<Self> {
        Self::read(q, Self::RETRY, Self::MAX_RETRIES, Self::RETRY_AFTER)
    }

    /// Reads the underscore-prefixed form used when the policy is forwarded
    /// to a snapshot iterator.
    pub fn from_forwarded(q: &QueryParams) -> Result<Self> {
        Self::read(
            q,
            Self::FORWARD_RETRY,
            Self::FORWARD_MAX_RETRIES,
            Self::FORWARD_RETRY_AFTER,
        )
    }

    /// Writes the policy into `q` in forwarded form. A disabled policy is not
    /// written at all.
    pub fn forward_into(&self, q: &mut QueryParams) {
        if !self.retry {
            return;
        }
        q.set(Self::FORWARD_RETRY, self.retry.to_string());
        q.set(Self::FORWARD_MAX_RETRIES, self.max_retries.to_string());
        q.set(Self::FORWARD_RETRY_AFTER, self.retry_after.to_string());
    }

    fn read(q: &QueryParams, retry: &str, max_retries: &str, retry_after: &str) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            retry: q.get_bool(retry)?.unwrap_or(defaults.retry),
            max_retries: q.get_int(max_retries)?.unwrap_or(defaults.max_retries),
            retry_after: q.get_int(retry_after)?.unwrap_or(defaults.retry_after),
        })
    }

    pub fn trace_loaded(&self) {
        info!(
            retry = self.retry,
            max_retries = self.max_retries,
            retry_after = self.retry_after,
            "Loaded retry policy (advisory)"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(uri: &str) -> QueryParams {
        QueryParams::from_url(&parse_uri(uri).unwrap())
    }

    #[test]
    fn repeated_keys_are_kept_in_order() {
        let q = params("githuborg://?prefix=wof-&prefix=sfom-&exclude=wof-admin");
        assert_eq!(q.get_all("prefix"), vec!["wof-", "sfom-"]);
        assert_eq!(q.get("exclude"), Some("wof-admin"));
        assert!(q.get("access_token").is_none());
    }

    #[test]
    fn bools_accept_go_spellings_and_reject_others() {
        let q = params("git://?a=1&b=False&c=yes");
        assert_eq!(q.get_bool("a").unwrap(), Some(true));
        assert_eq!(q.get_bool("b").unwrap(), Some(false));
        assert_eq!(q.get_bool("missing").unwrap(), None);

        let err = q.get_bool("c").unwrap_err();
        assert!(matches!(err, IterateError::Parse { ref param, .. } if param == "c"));
    }

    #[test]
    fn ints_and_timestamps_name_the_bad_parameter() {
        let q = params("git://?depth=x&since=2024-01-02T03:04:05Z&bad_since=yesterday");
        assert!(matches!(
            q.get_int("depth").unwrap_err(),
            IterateError::Parse { ref param, .. } if param == "depth"
        ));
        let since = q.get_timestamp("since").unwrap().unwrap();
        assert_eq!(since.to_rfc3339(), "2024-01-02T03:04:05+00:00");
        assert!(q.get_timestamp("bad_since").is_err());
    }

    #[test]
    fn retry_policy_defaults_and_forwarding() {
        let q = params("whosonfirst-data://?retry=true&max_retries=5");
        let policy = RetryPolicy::from_query(&q).unwrap();
        assert_eq!(
            policy,
            RetryPolicy {
                retry: true,
                max_retries: 5,
                retry_after: 10
            }
        );

        let mut forwarded = QueryParams::default();
        policy.forward_into(&mut forwarded);
        assert_eq!(RetryPolicy::from_forwarded(&forwarded).unwrap(), policy);

        let mut untouched = QueryParams::default();
        RetryPolicy::default().forward_into(&mut untouched);
        assert!(untouched.is_empty());
    }

    #[test]
    fn apply_to_round_trips_through_a_url() {
        let mut q = QueryParams::default();
        q.set("include", "properties.wof:placetype=region");
        q.set("depth", "2");
        let mut url = parse_uri("git:///tmp/x?stale=1").unwrap();
        q.apply_to(&mut url);
        let reparsed = parse_uri(url.as_str()).unwrap();
        assert_eq!(QueryParams::from_url(&reparsed), q);
    }
}
