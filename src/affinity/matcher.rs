// src/affinity/matcher.rs

//! Matching engine: candidate package → target repositories
//!
//! A pure function of the affinity cache and the match key. The fallback
//! chain is ordered and deterministic; each step runs only when the previous
//! produced no match:
//!
//! 1. exact (name, version, arch, is_beta, is_devel)
//! 2. same key with the beta flag flipped
//! 3. any version of (name, arch, is_devel), the highest rpm-ordered
//!    version wins
//! 4. non-devel keys fall back to the platform devel bucket
//! 5. devel keys produce no placement

use super::cache::{AffinityCache, AffinityKey};
use super::oracle::PredictedPackage;
use crate::config::PlatformConfig;
use crate::error::{Error, Result};
use crate::repository::RepositoryKey;
use crate::version::compare_versions;
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

/// Canonical suffix extraction from oracle repository names
///
/// `almalinux-8-beta-appstream` → `appstream`,
/// `centos-9-crb` → `crb`.
fn repo_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\w+-\d+-(?:beta-)?(?P<name>\w+(?:-\w+)?)").unwrap())
}

/// Identity of a candidate package for target resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchKey {
    pub name: String,
    pub version: String,
    pub arch: String,
    pub is_beta: bool,
    pub is_devel: bool,
}

/// Rewrite an oracle repository name into the target platform's namespace
///
/// Extracts the logical suffix (`appstream`, `baseos`, ...) and re-prefixes
/// it with the target distribution name and version; debug packages get the
/// `-debuginfo` suffix. A name without a recognizable suffix is a typed
/// error, never an unhandled capture miss.
pub fn rewrite_repo_name(raw: &str, prefix: &str, is_debug: bool) -> Result<String> {
    let captures = repo_name_re()
        .captures(raw)
        .ok_or_else(|| Error::RepoNameRewrite(raw.to_string()))?;
    let suffix = &captures["name"];
    let mut name = format!("{prefix}-{suffix}");
    if is_debug {
        name.push_str("-debuginfo");
    }
    Ok(name)
}

/// Resolve the target repositories for one candidate package variant
///
/// Returns an empty list only for unmatched devel variants; every unmatched
/// non-devel package still lands in the platform devel bucket.
pub fn resolve_targets(
    cache: &AffinityCache,
    key: &MatchKey,
    platform: &PlatformConfig,
    is_debug: bool,
) -> Result<Vec<RepositoryKey>> {
    let record = lookup(cache, key);

    let Some(record) = record else {
        if key.is_devel {
            debug!("No devel placement for {}", key.name);
            return Ok(Vec::new());
        }
        // Guaranteed landing spot for unmatched non-devel packages
        let devel = RepositoryKey::new(&platform.devel_repo_name(is_debug), &key.arch, is_debug);
        debug!("Falling back to {} for {}", devel, key.name);
        return Ok(vec![devel]);
    };

    let prefix = platform.repo_name_prefix();
    let mut targets = Vec::new();
    for repo in &record.repositories {
        let name = rewrite_repo_name(&repo.name, &prefix, is_debug)?;
        let target = RepositoryKey::new(&name, &repo.arch, is_debug);
        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    Ok(targets)
}

/// The ordered fallback lookup over the cache
fn lookup<'a>(cache: &'a AffinityCache, key: &MatchKey) -> Option<&'a PredictedPackage> {
    let exact = AffinityKey {
        name: key.name.clone(),
        version: key.version.clone(),
        arch: key.arch.clone(),
        is_beta: key.is_beta,
        is_devel: key.is_devel,
    };
    if let Some(record) = cache.get(&exact) {
        return Some(record);
    }

    // Packages are frequently cross-listed between beta and stable snapshots
    let flipped = AffinityKey {
        is_beta: !key.is_beta,
        ..exact.clone()
    };
    if let Some(record) = cache.get(&flipped) {
        return Some(record);
    }

    // Any version of the same name/arch/devel group; highest version wins
    cache
        .matches_any_version(&key.name, &key.arch, key.is_devel)
        .into_iter()
        .max_by(|(a, _), (b, _)| {
            compare_versions(&a.version, &b.version)
                .then_with(|| a.is_beta.cmp(&b.is_beta))
        })
        .map(|(_, record)| record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::oracle::{OracleDistribution, OracleRepository, OracleResponse};
    use std::collections::BTreeMap;

    fn platform() -> PlatformConfig {
        PlatformConfig {
            name: "AlmaLinux-8".to_string(),
            distribution: "almalinux".to_string(),
            distribution_version: "8".to_string(),
            arch_list: vec!["x86_64".to_string(), "i686".to_string()],
            weak_arches: BTreeMap::from([("x86_64".to_string(), vec!["i686".to_string()])]),
            copy_priority_arches: vec![],
            modularity_filter_prefixes: vec![],
            repositories: vec![],
        }
    }

    fn cached(
        cache: &mut AffinityCache,
        name: &str,
        version: &str,
        arch: &str,
        is_beta: bool,
        repo: &str,
    ) {
        cache.insert_response(
            &OracleResponse {
                distribution: OracleDistribution {
                    version: "8".to_string(),
                },
                packages: vec![PredictedPackage {
                    name: name.to_string(),
                    version: version.to_string(),
                    arch: arch.to_string(),
                    repositories: vec![OracleRepository {
                        name: repo.to_string(),
                        arch: arch.to_string(),
                    }],
                }],
            },
            is_beta,
        );
    }

    fn key(name: &str, version: &str, arch: &str, is_beta: bool, is_devel: bool) -> MatchKey {
        MatchKey {
            name: name.to_string(),
            version: version.to_string(),
            arch: arch.to_string(),
            is_beta,
            is_devel,
        }
    }

    #[test]
    fn test_rewrite_repo_name() {
        assert_eq!(
            rewrite_repo_name("centos-8-appstream", "almalinux-8", false).unwrap(),
            "almalinux-8-appstream"
        );
        assert_eq!(
            rewrite_repo_name("centos-8-beta-powertools", "almalinux-8", false).unwrap(),
            "almalinux-8-powertools"
        );
        assert_eq!(
            rewrite_repo_name("centos-8-baseos", "almalinux-8", true).unwrap(),
            "almalinux-8-baseos-debuginfo"
        );
        assert!(matches!(
            rewrite_repo_name("garbage", "almalinux-8", false),
            Err(Error::RepoNameRewrite(_))
        ));
    }

    #[test]
    fn test_exact_match() {
        let mut cache = AffinityCache::new();
        cached(&mut cache, "openssl", "1.1.1k", "x86_64", false, "centos-8-baseos");
        let targets = resolve_targets(
            &cache,
            &key("openssl", "1.1.1k", "x86_64", false, false),
            &platform(),
            false,
        )
        .unwrap();
        assert_eq!(
            targets,
            vec![RepositoryKey::new("almalinux-8-baseos", "x86_64", false)]
        );
    }

    #[test]
    fn test_beta_flip_fallback() {
        let mut cache = AffinityCache::new();
        cached(&mut cache, "openssl", "1.1.1k", "x86_64", true, "centos-8-baseos");
        // Candidate is stable, cache only has the beta snapshot
        let targets = resolve_targets(
            &cache,
            &key("openssl", "1.1.1k", "x86_64", false, false),
            &platform(),
            false,
        )
        .unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name, "almalinux-8-baseos");
    }

    #[test]
    fn test_any_version_picks_highest() {
        let mut cache = AffinityCache::new();
        cached(&mut cache, "kernel", "4.18.0", "x86_64", false, "centos-8-baseos");
        cached(&mut cache, "kernel", "5.14.0", "x86_64", false, "centos-8-appstream");
        let targets = resolve_targets(
            &cache,
            &key("kernel", "6.1.0", "x86_64", false, false),
            &platform(),
            false,
        )
        .unwrap();
        assert_eq!(targets[0].name, "almalinux-8-appstream");
    }

    #[test]
    fn test_unmatched_falls_back_to_devel() {
        let cache = AffinityCache::new();
        let targets = resolve_targets(
            &cache,
            &key("brand-new", "1.0", "aarch64", false, false),
            &platform(),
            false,
        )
        .unwrap();
        assert_eq!(
            targets,
            vec![RepositoryKey::new("almalinux-8-devel", "aarch64", false)]
        );

        let debug_targets = resolve_targets(
            &cache,
            &key("brand-new-debuginfo", "1.0", "aarch64", false, false),
            &platform(),
            true,
        )
        .unwrap();
        assert_eq!(debug_targets[0].name, "almalinux-8-devel-debuginfo");
        assert!(debug_targets[0].debug);
    }

    #[test]
    fn test_unmatched_devel_variant_is_dropped() {
        let cache = AffinityCache::new();
        let targets = resolve_targets(
            &cache,
            &key("brand-new", "1.0", "x86_64", false, true),
            &platform(),
            false,
        )
        .unwrap();
        assert!(targets.is_empty());
    }

    #[test]
    fn test_weak_arch_inherits_strong_placement() {
        let mut cache = AffinityCache::new();
        cached(&mut cache, "glibc", "2.28", "x86_64", false, "centos-8-baseos");
        cache.propagate_weak_arches(&[("x86_64".to_string(), vec!["i686".to_string()])]);
        let targets = resolve_targets(
            &cache,
            &key("glibc", "2.28", "i686", false, false),
            &platform(),
            false,
        )
        .unwrap();
        // The i686 package lands in the x86_64 repository
        assert_eq!(
            targets,
            vec![RepositoryKey::new("almalinux-8-baseos", "x86_64", false)]
        );
    }
}
