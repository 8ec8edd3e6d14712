// src/plan/presence.rs

//! Presence checking: which candidates already exist in production?
//!
//! Candidates are partitioned by debug flag and package architecture, then
//! every matching production repository version is queried in batches of at
//! most [`QUERY_BATCH_LIMIT`] names. All queries of one check run execute
//! concurrently; each owns a private accumulator and the results are merged
//! into one map at the end, so no shared mutable state needs locking.

use super::CandidatePackage;
use crate::error::{Error, Result};
use crate::nevra::normalize_epoch;
use crate::repository::{PackageFilter, RepoHandle, RepositoryApi, QUERY_BATCH_LIMIT};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// One sighting of a package in a production repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoHit {
    pub repo_id: i64,
    pub repo_arch: String,
    pub href: String,
}

/// Merged result of a presence check, keyed by full artifact name
#[derive(Debug, Default)]
pub struct PresenceIndex {
    hits: HashMap<String, Vec<RepoHit>>,
}

impl PresenceIndex {
    fn insert(&mut self, full_name: String, hit: RepoHit) {
        let hits = self.hits.entry(full_name).or_default();
        if !hits.contains(&hit) {
            hits.push(hit);
        }
    }

    /// Repository ids already containing the package, ascending
    pub fn repos_containing(&self, full_name: &str) -> Vec<i64> {
        let Some(hits) = self.hits.get(full_name) else {
            return Vec::new();
        };
        let ids: BTreeSet<i64> = hits.iter().map(|h| h.repo_id).collect();
        ids.into_iter().collect()
    }

    pub fn contains(&self, full_name: &str, repo_id: i64) -> bool {
        self.find(full_name, repo_id).is_some()
    }

    /// The hit for a package in one specific repository
    pub fn find(&self, full_name: &str, repo_id: i64) -> Option<&RepoHit> {
        self.hits
            .get(full_name)?
            .iter()
            .find(|h| h.repo_id == repo_id)
    }

    /// Resolve the production copy to reuse for a package
    ///
    /// When a package is found under several repository architectures the
    /// platform copy-priority list wins; remaining ties break on the lowest
    /// repository id, keeping the result reproducible across runs.
    pub fn resolve(&self, full_name: &str, copy_priority: &[String]) -> Option<&RepoHit> {
        let hits = self.hits.get(full_name)?;
        hits.iter().min_by_key(|hit| {
            let priority = copy_priority
                .iter()
                .position(|arch| arch == &hit.repo_arch)
                .unwrap_or(copy_priority.len());
            (priority, hit.repo_id)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// NEVRA fields requested from the repository manager
fn presence_fields() -> Vec<String> {
    ["pulp_href", "name", "epoch", "version", "release", "arch"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Check which candidate packages already exist in which repositories
pub async fn check_presence(
    client: &dyn RepositoryApi,
    repos: &[RepoHandle],
    candidates: &[CandidatePackage],
) -> Result<PresenceIndex> {
    // Partition by (debug, package arch); noarch packages may sit in any
    // repository, every other arch requires an exact repository arch match
    let mut buckets: HashMap<(bool, String), Vec<&CandidatePackage>> = HashMap::new();
    for candidate in candidates {
        buckets
            .entry((candidate.is_debuginfo, candidate.nevra.arch.clone()))
            .or_default()
            .push(candidate);
    }

    let mut queries = Vec::new();
    for ((is_debug, arch), members) in &buckets {
        let eligible: Vec<&RepoHandle> = repos
            .iter()
            .filter(|r| r.debug == *is_debug && (arch == "noarch" || &r.arch == arch))
            .collect();
        if eligible.is_empty() {
            continue;
        }

        for chunk in members.chunks(QUERY_BATCH_LIMIT) {
            // The in-lists over-match across the chunk's cross product, so
            // hits are filtered back to exact NEVRA matches afterwards
            let mut filter = PackageFilter {
                arch: if arch == "noarch" {
                    Some(arch.clone())
                } else {
                    None
                },
                fields: presence_fields(),
                ..Default::default()
            };
            let mut expected: HashMap<String, String> = HashMap::new();
            for candidate in chunk {
                let nevra = &candidate.nevra;
                if !filter.names.contains(&nevra.name) {
                    filter.names.push(nevra.name.clone());
                }
                if !filter.epochs.contains(&nevra.epoch) {
                    filter.epochs.push(nevra.epoch.clone());
                }
                if !filter.versions.contains(&nevra.version) {
                    filter.versions.push(nevra.version.clone());
                }
                if !filter.releases.contains(&nevra.release) {
                    filter.releases.push(nevra.release.clone());
                }
                expected.insert(candidate.full_name.clone(), nevra.epoch.clone());
            }

            for repo in &eligible {
                let filter = filter.clone();
                let expected = expected.clone();
                let repo_id = repo.id;
                let repo_arch = repo.arch.clone();
                let version_href = repo.latest_version_href.clone();
                queries.push(async move {
                    let records = client.list_packages(&version_href, &filter).await?;
                    let mut found = Vec::new();
                    for record in records {
                        let full_name = record.full_name();
                        let Some(epoch) = expected.get(&full_name) else {
                            continue;
                        };
                        if normalize_epoch(&record.epoch) != *epoch {
                            continue;
                        }
                        found.push((
                            full_name,
                            RepoHit {
                                repo_id,
                                repo_arch: repo_arch.clone(),
                                href: record.href,
                            },
                        ));
                    }
                    Ok::<_, Error>(found)
                });
            }
        }
    }

    debug!("Presence check issuing {} batched queries", queries.len());
    let results = futures::future::try_join_all(queries).await?;

    let mut index = PresenceIndex::default();
    for batch in results {
        for (full_name, hit) in batch {
            index.insert(full_name, hit);
        }
    }
    // Deterministic hit order regardless of query completion order
    for hits in index.hits.values_mut() {
        hits.sort_by(|a, b| a.repo_id.cmp(&b.repo_id).then(a.repo_arch.cmp(&b.repo_arch)));
    }
    Ok(index)
}
