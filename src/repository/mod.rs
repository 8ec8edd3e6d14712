// src/repository/mod.rs

//! Repository manager abstraction
//!
//! Everything the engine needs from the external content store: repository
//! lookup, content listing with field projection, content modification as
//! async tasks, publication, and module metadata access. All calls suspend;
//! nothing here blocks a worker thread on the network.

mod client;

pub use client::{HttpRepositoryClient, RepoRecord, RepositoryApi};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of package names per content-listing request
///
/// Larger candidate sets must be chunked by the caller; a failed chunk fails
/// the whole presence check.
pub const QUERY_BATCH_LIMIT: usize = 100;

/// Identifies a logical repository within a platform
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryKey {
    pub name: String,
    pub arch: String,
    pub debug: bool,
}

impl RepositoryKey {
    pub fn new(name: &str, arch: &str, debug: bool) -> Self {
        Self {
            name: name.to_string(),
            arch: arch.to_string(),
            debug,
        }
    }
}

impl fmt::Display for RepositoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.arch)?;
        if self.debug {
            write!(f, " (debug)")?;
        }
        Ok(())
    }
}

/// A resolved repository in the repository manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoHandle {
    pub id: i64,
    pub name: String,
    pub arch: String,
    pub debug: bool,
    pub href: String,
    pub latest_version_href: String,
    /// Public base URL of the published repository
    pub url: String,
}

impl RepoHandle {
    pub fn key(&self) -> RepositoryKey {
        RepositoryKey::new(&self.name, &self.arch, self.debug)
    }
}

/// Field-projected package listing filter
///
/// All in-lists are ANDed; empty lists place no constraint on their field.
#[derive(Debug, Clone, Default)]
pub struct PackageFilter {
    pub names: Vec<String>,
    pub epochs: Vec<String>,
    pub versions: Vec<String>,
    pub releases: Vec<String>,
    pub arch: Option<String>,
    /// Response field projection; empty means all fields
    pub fields: Vec<String>,
}

impl PackageFilter {
    /// Reject filters that exceed the remote per-request name limit
    pub fn validate(&self) -> Result<()> {
        if self.names.len() > QUERY_BATCH_LIMIT {
            return Err(Error::BatchLimitExceeded(self.names.len(), QUERY_BATCH_LIMIT));
        }
        Ok(())
    }
}

/// A package content unit as reported by the repository manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRecord {
    #[serde(rename = "pulp_href")]
    pub href: String,
    pub name: String,
    #[serde(default)]
    pub epoch: String,
    pub version: String,
    pub release: String,
    pub arch: String,
}

impl PackageRecord {
    /// Canonical artifact file name for presence-index keys
    pub fn full_name(&self) -> String {
        format!(
            "{}-{}-{}.{}.rpm",
            self.name, self.version, self.release, self.arch
        )
    }
}

/// Handle to an asynchronous repository manager task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRef {
    pub href: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_batch_limit() {
        let mut filter = PackageFilter::default();
        filter.names = (0..QUERY_BATCH_LIMIT).map(|i| format!("pkg{}", i)).collect();
        assert!(filter.validate().is_ok());
        filter.names.push("one-too-many".to_string());
        assert!(matches!(
            filter.validate(),
            Err(Error::BatchLimitExceeded(101, 100))
        ));
    }

    #[test]
    fn test_repository_key_display() {
        let key = RepositoryKey::new("almalinux-8-appstream", "x86_64", true);
        assert_eq!(key.to_string(), "almalinux-8-appstream.x86_64 (debug)");
    }
}
