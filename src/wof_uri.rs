//! Canonical relative paths for Who's On First documents.
//!
//! The same record can live under different prefixes in different
//! repositories (`data/101/736/545/101736545.geojson`, a bare
//! `101736545.geojson`, ...). Deduplication keys on the canonical form,
//! which is derived from the record id alone: the id split into groups of
//! three digits followed by the file name.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{IterateError, Result};

static WOF_FILENAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(-?\d+)(?:-alt-([a-zA-Z0-9_]+(?:-[a-zA-Z0-9_]+)*))?\.geojson$")
        .unwrap_or_else(|e| panic!("invalid static regex: {e}"))
});

/// The parsed pieces of a record file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WofUri {
    pub id: i64,
    /// Label of an alternate geometry, e.g. `quattroshapes` or `naturalearth-display`.
    pub alt: Option<String>,
}

impl WofUri {
    pub fn is_alternate(&self) -> bool {
        self.alt.is_some()
    }

    pub fn filename(&self) -> String {
        match &self.alt {
            Some(alt) => format!("{}-alt-{alt}.geojson", self.id),
            None => format!("{}.geojson", self.id),
        }
    }

    /// `101736545` becomes `101/736/545/101736545.geojson`. Reserved
    /// negative ids have no digit tree and map to the bare file name.
    pub fn rel_path(&self) -> String {
        if self.id < 0 {
            return self.filename();
        }
        let digits = self.id.to_string();
        let mut parts: Vec<&str> = digits
            .as_bytes()
            .chunks(3)
            .filter_map(|c| std::str::from_utf8(c).ok())
            .collect();
        let filename = self.filename();
        parts.push(&filename);
        parts.join("/")
    }
}

/// Parses the last path segment of `path` as a record file name.
pub fn parse(path: &str) -> Result<WofUri> {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let caps = WOF_FILENAME
        .captures(name)
        .ok_or_else(|| IterateError::parse("path", format!("'{path}' is not a record file name")))?;
    let id = caps[1]
        .parse::<i64>()
        .map_err(|e| IterateError::parse("path", format!("'{path}': {e}")))?;
    Ok(WofUri {
        id,
        alt: caps.get(2).map(|m| m.as_str().to_string()),
    })
}

/// Canonical relative path used as the deduplication key.
pub fn canonical_path(path: &str) -> Result<String> {
    parse(path).map(|u| u.rel_path())
}
