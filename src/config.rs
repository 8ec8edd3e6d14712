// src/config.rs

//! Configuration types for platforms, endpoints and planning policy
//!
//! Loaded from a TOML file. The platform section mirrors what the build
//! scheduler knows about a product: architectures, weak-arch pairs, the
//! production repositories a release may touch, and naming policy for the
//! devel fallback bucket.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Local bookkeeping database
    #[serde(default = "default_db_path")]
    pub database_path: String,

    pub repository_manager: RepositoryManagerConfig,

    #[serde(default)]
    pub oracle: OracleConfig,

    #[serde(default)]
    pub signer: SignerConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    pub platform: PlatformConfig,
}

fn default_db_path() -> String {
    "/var/lib/drydock/drydock.db".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<()> {
        let platform = &self.platform;
        if platform.arch_list.is_empty() {
            return Err(Error::ConfigError(format!(
                "Platform '{}' declares no architectures",
                platform.name
            )));
        }
        for (strong, weaks) in &platform.weak_arches {
            if !platform.arch_list.contains(strong) {
                return Err(Error::ConfigError(format!(
                    "Weak-arch map references unknown strong arch '{}'",
                    strong
                )));
            }
            for weak in weaks {
                if !platform.arch_list.contains(weak) {
                    return Err(Error::ConfigError(format!(
                        "Weak-arch map references unknown weak arch '{}'",
                        weak
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Repository manager (content store) endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryManagerConfig {
    pub endpoint: String,

    /// Bearer token, if the manager requires authentication
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

/// Package-affinity oracle endpoint and policy
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OracleConfig {
    /// When disabled, planning falls back to the plain devel placement policy
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub endpoint: String,
}

/// External signature verification service
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SignerConfig {
    #[serde(default)]
    pub endpoint: String,
}

/// External build scheduler (build lookup by id)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub endpoint: String,
}

/// A production repository a release may place content into
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Logical name, e.g. `almalinux-8-appstream`
    pub name: String,
    pub arch: String,

    #[serde(default)]
    pub debug: bool,

    /// Public base URL of the published repository (module metadata fetch)
    #[serde(default)]
    pub url: String,
}

impl RepositoryConfig {
    /// Name under which the repository manager knows this repository
    pub fn manager_name(&self) -> String {
        format!("{}-{}", self.name, self.arch)
    }
}

/// Product/platform description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Platform display name, e.g. `AlmaLinux-8`
    pub name: String,

    /// Distribution prefix used when rewriting oracle repository names
    pub distribution: String,

    /// Distribution major version, e.g. `8`
    pub distribution_version: String,

    /// Declared architectures (noarch and src are implicit)
    pub arch_list: Vec<String>,

    /// Strong arch → dependent weak arches, e.g. `x86_64 = ["i686"]`
    #[serde(default)]
    pub weak_arches: BTreeMap<String, Vec<String>>,

    /// Presence tie-break order when a package exists under several arches
    #[serde(default)]
    pub copy_priority_arches: Vec<String>,

    /// Artifact name prefixes hidden from module metadata artifact lists
    #[serde(default)]
    pub modularity_filter_prefixes: Vec<String>,

    /// Production repositories of this platform
    pub repositories: Vec<RepositoryConfig>,
}

impl PlatformConfig {
    /// Name of the devel fallback bucket for unmatched packages
    pub fn devel_repo_name(&self, debug: bool) -> String {
        if debug {
            format!(
                "{}-{}-devel-debuginfo",
                self.distribution, self.distribution_version
            )
        } else {
            format!("{}-{}-devel", self.distribution, self.distribution_version)
        }
    }

    /// Prefix every rewritten repository name starts with
    pub fn repo_name_prefix(&self) -> String {
        format!("{}-{}", self.distribution, self.distribution_version)
    }

    /// Weak arches that depend on the given strong arch
    pub fn weak_arches_of(&self, strong: &str) -> &[String] {
        self.weak_arches
            .get(strong)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// All arches a package of `arch` may be queried under, weak arches first
    /// folded onto their strong arch
    pub fn query_arches(&self, arch: &str) -> Vec<String> {
        let mut arches = vec![arch.to_string()];
        for (strong, weaks) in &self.weak_arches {
            if weaks.iter().any(|w| w == arch) && !arches.contains(strong) {
                arches.push(strong.clone());
            }
        }
        arches
    }
}
