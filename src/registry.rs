//! Scheme name → iterator constructor dispatch.
//!
//! Registration is a setup step: build a [`Registry`], register what you
//! need, then share it read-only. [`default_registry`] holds the backends
//! shipped with this crate and is built on first use.

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::{debug, error};

use crate::config::parse_uri;
use crate::contract::RecordIterator;
use crate::error::{IterateError, Result};
use crate::git::GitIterator;
use crate::github::api::GitHubApiIterator;
use crate::github::organization::OrganizationIterator;

/// Builds an iterator from its configuration URI.
pub type Constructor = fn(&str) -> Result<Arc<dyn RecordIterator>>;

#[derive(Default)]
pub struct Registry {
    constructors: BTreeMap<String, Constructor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding `git`, `githubapi` and `githuborg`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let defaults: [(&str, Constructor); 3] = [
            (GitIterator::SCHEME, new_git),
            (GitHubApiIterator::SCHEME, new_github_api),
            (OrganizationIterator::SCHEME, new_organization),
        ];
        for (scheme, constructor) in defaults {
            let registered = registry.register(scheme, constructor);
            debug_assert!(registered.is_ok(), "default scheme '{scheme}' registered twice");
            if let Err(e) = registered {
                error!(scheme, error = %e, "Failed to register default iterator");
            }
        }
        registry
    }

    /// Binds `scheme` to `constructor`. Fails if the scheme is already bound.
    pub fn register(&mut self, scheme: &str, constructor: Constructor) -> Result<()> {
        if self.constructors.contains_key(scheme) {
            return Err(IterateError::AlreadyRegistered(scheme.to_string()));
        }
        debug!(scheme, "Registered iterator");
        self.constructors.insert(scheme.to_string(), constructor);
        Ok(())
    }

    /// Parses the scheme of `uri` and dispatches to its constructor.
    pub fn construct(&self, uri: &str) -> Result<Arc<dyn RecordIterator>> {
        let url = parse_uri(uri)?;
        let constructor = self
            .constructors
            .get(url.scheme())
            .ok_or_else(|| IterateError::UnknownScheme(url.scheme().to_string()))?;
        constructor(uri)
    }

    pub fn schemes(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}

fn new_git(uri: &str) -> Result<Arc<dyn RecordIterator>> {
    Ok(Arc::new(GitIterator::from_uri(uri)?))
}

fn new_github_api(uri: &str) -> Result<Arc<dyn RecordIterator>> {
    Ok(Arc::new(GitHubApiIterator::from_uri(uri)?))
}

fn new_organization(uri: &str) -> Result<Arc<dyn RecordIterator>> {
    Ok(Arc::new(OrganizationIterator::from_uri(uri)?))
}

static DEFAULT_REGISTRY: Lazy<Registry> = Lazy::new(Registry::with_defaults);

pub fn default_registry() -> &'static Registry {
    &DEFAULT_REGISTRY
}

/// Constructs an iterator for `uri` through the default registry.
pub fn new_iterator(uri: &str) -> Result<Arc<dyn RecordIterator>> {
    default_registry().construct(uri)
}
