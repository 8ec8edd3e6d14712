// src/affinity/cache.rs

//! Per-run cache of oracle predictions
//!
//! Built once per planning run and passed by reference through the call
//! tree; never shared across concurrent planning runs.

use super::oracle::{OracleResponse, PredictedPackage};
use std::collections::HashMap;

/// Cache key for one predicted package
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AffinityKey {
    pub name: String,
    pub version: String,
    pub arch: String,
    pub is_beta: bool,
    pub is_devel: bool,
}

/// Oracle predictions keyed for the matching engine
#[derive(Debug, Default)]
pub struct AffinityCache {
    entries: HashMap<AffinityKey, PredictedPackage>,
}

impl AffinityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index an oracle response under the given beta flag
    ///
    /// Each predicted package is split into its devel and non-devel
    /// repository groups so the matcher can resolve both variants of a
    /// candidate independently.
    pub fn insert_response(&mut self, response: &OracleResponse, is_beta: bool) {
        for package in &response.packages {
            for is_devel in [false, true] {
                let repositories: Vec<_> = package
                    .repositories
                    .iter()
                    .filter(|r| r.name.contains("devel") == is_devel)
                    .cloned()
                    .collect();
                if repositories.is_empty() {
                    continue;
                }
                let key = AffinityKey {
                    name: package.name.clone(),
                    version: package.version.clone(),
                    arch: package.arch.clone(),
                    is_beta,
                    is_devel,
                };
                let entry = self.entries.entry(key).or_insert_with(|| PredictedPackage {
                    name: package.name.clone(),
                    version: package.version.clone(),
                    arch: package.arch.clone(),
                    repositories: Vec::new(),
                });
                for repo in repositories {
                    if !entry.repositories.contains(&repo) {
                        entry.repositories.push(repo);
                    }
                }
            }
        }
    }

    pub fn get(&self, key: &AffinityKey) -> Option<&PredictedPackage> {
        self.entries.get(key)
    }

    /// All entries matching (name, arch, is_devel), any version or beta flag
    pub fn matches_any_version(
        &self,
        name: &str,
        arch: &str,
        is_devel: bool,
    ) -> Vec<(&AffinityKey, &PredictedPackage)> {
        self.entries
            .iter()
            .filter(|(k, _)| k.name == name && k.arch == arch && k.is_devel == is_devel)
            .collect()
    }

    /// Duplicate strong-arch entries under their dependent weak arches
    ///
    /// A weak-specific entry always wins; duplication never overrides.
    pub fn propagate_weak_arches(&mut self, weak_arches: &[(String, Vec<String>)]) {
        for (strong, weaks) in weak_arches {
            let strong_entries: Vec<(AffinityKey, PredictedPackage)> = self
                .entries
                .iter()
                .filter(|(k, _)| &k.arch == strong)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();

            for weak in weaks {
                for (key, package) in &strong_entries {
                    let weak_key = AffinityKey {
                        arch: weak.clone(),
                        ..key.clone()
                    };
                    self.entries.entry(weak_key).or_insert_with(|| package.clone());
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
