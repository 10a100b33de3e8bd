//! Content filters: predicates over a document body deciding whether a
//! record is yielded.
//!
//! Iterators only depend on the [`Filters`] contract. [`QueryFilters`] is the
//! default implementation, configured from the `include`, `exclude`,
//! `include_mode` and `exclude_mode` query parameters. Each rule has the form
//! `{dotted.path}={regex}` and is tested against the JSON value found at that
//! path, e.g. `properties.wof:placetype=^(region|country)$`.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::config::QueryParams;
use crate::error::{FilterError, IterateError, Result};

/// Evaluation contract for content filters. `apply` may consume any part of
/// `body`; callers rewind before handing the content on.
pub trait Filters: Send + Sync + fmt::Debug {
    fn apply(&self, body: &mut dyn Read) -> Result<bool, FilterError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchMode {
    All,
    Any,
}

impl FromStr for MatchMode {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ALL" => Ok(Self::All),
            "ANY" => Ok(Self::Any),
            _ => Err(FilterError::InvalidMode(s.to_string())),
        }
    }
}

/// One `{path}={regex}` rule.
#[derive(Debug, Clone)]
pub struct Rule {
    path: Vec<String>,
    pattern: Regex,
}

impl Rule {
    pub fn parse(raw: &str) -> Result<Self, FilterError> {
        let (path, pattern) = raw
            .split_once('=')
            .ok_or_else(|| FilterError::InvalidRule(raw.to_string()))?;
        if path.is_empty() {
            return Err(FilterError::InvalidRule(raw.to_string()));
        }
        let pattern = Regex::new(pattern).map_err(|_| FilterError::InvalidRule(raw.to_string()))?;
        Ok(Self {
            path: path.split('.').map(str::to_string).collect(),
            pattern,
        })
    }

    pub fn matches(&self, doc: &Value) -> bool {
        let mut current = doc;
        for key in &self.path {
            let next = match current {
                Value::Object(map) => map.get(key),
                Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            match next {
                Some(v) => current = v,
                None => return false,
            }
        }
        self.matches_value(current)
    }

    fn matches_value(&self, value: &Value) -> bool {
        match value {
            Value::Null => false,
            Value::String(s) => self.pattern.is_match(s),
            Value::Array(items) => items.iter().any(|v| self.matches_value(v)),
            other => self.pattern.is_match(&other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
struct RuleSet {
    rules: Vec<Rule>,
    mode: MatchMode,
}

impl RuleSet {
    fn matches(&self, doc: &Value) -> bool {
        match self.mode {
            MatchMode::All => self.rules.iter().all(|r| r.matches(doc)),
            MatchMode::Any => self.rules.iter().any(|r| r.matches(doc)),
        }
    }
}

/// Include/exclude rule sets evaluated against a JSON document body.
#[derive(Debug, Clone)]
pub struct QueryFilters {
    include: Option<RuleSet>,
    exclude: Option<RuleSet>,
}

impl QueryFilters {
    pub fn new(
        include: &[String],
        include_mode: MatchMode,
        exclude: &[String],
        exclude_mode: MatchMode,
    ) -> Result<Self, FilterError> {
        let build = |raw: &[String], mode| -> Result<Option<RuleSet>, FilterError> {
            if raw.is_empty() {
                return Ok(None);
            }
            let rules = raw.iter().map(|r| Rule::parse(r)).collect::<Result<_, _>>()?;
            Ok(Some(RuleSet { rules, mode }))
        };
        Ok(Self {
            include: build(include, include_mode)?,
            exclude: build(exclude, exclude_mode)?,
        })
    }

    /// Builds filters from URI query parameters. Returns `None` when no
    /// rules are configured so iterators can skip evaluation entirely.
    pub fn from_query(q: &QueryParams) -> Result<Option<Self>> {
        let include = q.get_all("include");
        let exclude = q.get_all("exclude");
        if include.is_empty() && exclude.is_empty() {
            return Ok(None);
        }
        let mode = |key: &str| -> Result<MatchMode> {
            q.get_non_empty(key)
                .map(|m| m.parse().map_err(|e| IterateError::parse(key, e)))
                .unwrap_or(Ok(MatchMode::All))
        };
        let filters = Self::new(&include, mode("include_mode")?, &exclude, mode("exclude_mode")?)
            .map_err(|e| IterateError::parse("include/exclude", e))?;
        Ok(Some(filters))
    }

    pub fn rule_count(&self) -> usize {
        [&self.include, &self.exclude]
            .iter()
            .filter_map(|s| s.as_ref())
            .map(|s| s.rules.len())
            .sum()
    }
}

impl Filters for QueryFilters {
    fn apply(&self, body: &mut dyn Read) -> Result<bool, FilterError> {
        let mut buf = Vec::new();
        body.read_to_end(&mut buf)?;
        let doc: Value = serde_json::from_slice(&buf)?;

        if let Some(include) = &self.include {
            if !include.matches(&doc) {
                return Ok(false);
            }
        }
        if let Some(exclude) = &self.exclude {
            if exclude.matches(&doc) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
