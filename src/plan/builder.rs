// src/plan/builder.rs

//! Release plan construction
//!
//! Collects candidate packages and module references from finished builds,
//! resolves target repositories through the affinity oracle (or the plain
//! devel placement policy when the oracle is disabled), and runs the
//! presence check. All per-run caches live on the stack of one
//! `build_plan` call; nothing is shared across concurrent planning runs.

use super::presence::{check_presence, PresenceIndex};
use super::{
    CandidatePackage, ModuleRef, PlanModule, PlanPackage, ReleasePlan, RepositoryEntry,
};
use crate::affinity::{resolve_targets, AffinityCache, AffinityOracle, MatchKey, OracleResponse};
use crate::builds::BuildRecord;
use crate::config::PlatformConfig;
use crate::error::{Error, Result};
use crate::modularity::ModuleIndex;
use crate::repository::{RepoHandle, RepositoryApi, RepositoryKey};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Builds release plans for one platform
pub struct PlanBuilder<'a> {
    client: &'a dyn RepositoryApi,
    /// Absent when the affinity oracle is disabled by configuration
    oracle: Option<&'a dyn AffinityOracle>,
    platform: &'a PlatformConfig,
}

/// A module reference paired with its placement targets
struct ModulePlacement {
    module: ModuleRef,
    targets: Vec<RepositoryKey>,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(
        client: &'a dyn RepositoryApi,
        oracle: Option<&'a dyn AffinityOracle>,
        platform: &'a PlatformConfig,
    ) -> Self {
        Self {
            client,
            oracle,
            platform,
        }
    }

    /// Build the reconciliation plan for a set of builds
    ///
    /// `task_filter` restricts planning to the listed build tasks; without
    /// it every completed task of the builds contributes. Packages matched
    /// to zero repositories stay in the plan with an empty target list so
    /// operators see them as unplaced rather than dropped.
    pub async fn build_plan(
        &self,
        builds: &[BuildRecord],
        task_filter: Option<&[i64]>,
    ) -> Result<ReleasePlan> {
        let candidates = collect_candidates(builds, task_filter);
        let modules = self.collect_modules(builds, task_filter)?;
        info!(
            "Planning release: {} candidate packages, {} modules",
            candidates.len(),
            modules.len()
        );

        let handles = self.resolve_platform_repositories().await?;
        let lookup: HashMap<RepositoryKey, RepoHandle> =
            handles.iter().map(|h| (h.key(), h.clone())).collect();

        let (package_entries, module_entries) = match self.oracle {
            Some(oracle) => {
                let (cache, placements) = self.consult_oracle(oracle, builds, modules).await?;
                let packages = self.place_with_cache(&candidates, &cache, &lookup)?;
                let modules = self.place_modules(placements, &lookup);
                (packages, modules)
            }
            None => {
                debug!("Affinity oracle disabled, using plain devel placement");
                let packages = self.place_plain(&candidates, &lookup);
                let placements = modules
                    .into_iter()
                    .map(|(module, _)| {
                        let arch = module.arch.clone();
                        ModulePlacement {
                            module,
                            targets: vec![RepositoryKey::new(
                                &self.platform.devel_repo_name(false),
                                &arch,
                                false,
                            )],
                        }
                    })
                    .collect();
                let modules = self.place_modules(placements, &lookup);
                (packages, modules)
            }
        };

        let mut plan = ReleasePlan {
            repositories: referenced_repositories(&package_entries, &module_entries),
            packages: package_entries,
            modules: module_entries,
            ..Default::default()
        };

        let index = check_presence(self.client, &handles, &candidates).await?;
        apply_presence(&mut plan, &index, &self.platform.copy_priority_arches);
        Ok(plan)
    }

    /// Re-run the presence check over an existing plan, in place
    ///
    /// Used before execution and when storing operator-edited plans, since
    /// repository content may have moved under a plan since it was built.
    pub async fn refresh_presence(&self, plan: &mut ReleasePlan) -> Result<()> {
        let handles = self.resolve_platform_repositories().await?;
        let candidates: Vec<CandidatePackage> = dedup_by_full_name(
            plan.packages.iter().map(|entry| entry.package.clone()),
        );
        let index = check_presence(self.client, &handles, &candidates).await?;
        apply_presence(plan, &index, &self.platform.copy_priority_arches);
        Ok(())
    }

    /// Resolve every declared production repository against the manager
    pub async fn resolve_platform_repositories(&self) -> Result<Vec<RepoHandle>> {
        let mut handles = Vec::with_capacity(self.platform.repositories.len());
        for (idx, repo) in self.platform.repositories.iter().enumerate() {
            let manager_name = repo.manager_name();
            let record = self
                .client
                .get_repository(&manager_name)
                .await?
                .ok_or_else(|| Error::MissingRepository(manager_name.clone()))?;
            handles.push(RepoHandle {
                id: idx as i64 + 1,
                name: repo.name.clone(),
                arch: repo.arch.clone(),
                debug: repo.debug,
                href: record.href,
                latest_version_href: record.latest_version_href,
                url: repo.url.clone(),
            });
        }
        Ok(handles)
    }

    /// Parse module templates and fold each task's RPM artifacts into them
    fn collect_modules(
        &self,
        builds: &[BuildRecord],
        task_filter: Option<&[i64]>,
    ) -> Result<Vec<(ModuleRef, bool)>> {
        let mut modules = Vec::new();
        let mut seen = HashSet::new();
        for build in builds {
            for task in &build.tasks {
                if !task.is_done() || !task_selected(task.id, task_filter) {
                    continue;
                }
                let Some(template) = &task.module_template else {
                    continue;
                };
                let mut index = ModuleIndex::parse(template)?;
                for stream in index.streams_mut() {
                    for artifact in &task.artifacts {
                        if artifact.is_debuginfo || artifact.nevra.is_source() {
                            continue;
                        }
                        stream.add_rpm_artifact(
                            &artifact.nevra,
                            &self.platform.modularity_filter_prefixes,
                        );
                    }
                    let nsvca = stream.nsvca();
                    if !seen.insert(nsvca.clone()) {
                        continue;
                    }
                    modules.push((
                        ModuleRef {
                            name: nsvca.name,
                            stream: nsvca.stream,
                            version: nsvca.version,
                            context: nsvca.context,
                            arch: nsvca.arch,
                            template: stream.render()?,
                        },
                        build.is_beta,
                    ));
                }
            }
        }
        Ok(modules)
    }

    /// Query the oracle for modules and source packages, filling the cache
    async fn consult_oracle(
        &self,
        oracle: &dyn AffinityOracle,
        builds: &[BuildRecord],
        modules: Vec<(ModuleRef, bool)>,
    ) -> Result<(AffinityCache, Vec<ModulePlacement>)> {
        let mut cache = AffinityCache::new();
        let mut placements = Vec::new();

        for (module, _) in modules {
            let mut arches = vec![module.arch.clone()];
            for weak in self.platform.weak_arches_of(&module.arch) {
                arches.push(weak.clone());
            }
            let responses = oracle
                .find_module(&module.name, &module.stream, &arches)
                .await?;

            let mut targets = Vec::new();
            let prefix = self.platform.repo_name_prefix();
            for response in &responses {
                cache.insert_response(response, response_is_beta(response));
                for package in &response.packages {
                    if package.arch != module.arch {
                        continue;
                    }
                    for repo in &package.repositories {
                        if repo.name.contains("devel") {
                            continue;
                        }
                        let name = crate::affinity::rewrite_repo_name(&repo.name, &prefix, false)?;
                        let key = RepositoryKey::new(&name, &repo.arch, false);
                        if !targets.contains(&key) {
                            targets.push(key);
                        }
                    }
                }
            }
            if targets.is_empty() {
                targets.push(RepositoryKey::new(
                    &self.platform.devel_repo_name(false),
                    &module.arch,
                    false,
                ));
            }
            placements.push(ModulePlacement { module, targets });
        }

        // One batched closest-match query covers every source package
        let mut sources = Vec::new();
        for build in builds {
            for name in build.source_package_names() {
                if !sources.contains(&name) {
                    sources.push(name);
                }
            }
        }
        if !sources.is_empty() {
            for response in oracle.find_packages(&sources).await? {
                cache.insert_response(&response, response_is_beta(&response));
            }
        }

        let weak_pairs: Vec<(String, Vec<String>)> = self
            .platform
            .weak_arches
            .iter()
            .map(|(strong, weaks)| (strong.clone(), weaks.clone()))
            .collect();
        cache.propagate_weak_arches(&weak_pairs);
        debug!("Affinity cache holds {} predictions", cache.len());

        Ok((cache, placements))
    }

    /// Matching-engine placement: union of the devel and non-devel variants
    fn place_with_cache(
        &self,
        candidates: &[CandidatePackage],
        cache: &AffinityCache,
        lookup: &HashMap<RepositoryKey, RepoHandle>,
    ) -> Result<Vec<PlanPackage>> {
        let mut entries = Vec::new();
        for candidate in candidates {
            let mut keys: Vec<RepositoryKey> = Vec::new();
            for is_devel in [false, true] {
                let match_key = MatchKey {
                    name: candidate.nevra.name.clone(),
                    version: candidate.nevra.version.clone(),
                    arch: candidate.nevra.arch.clone(),
                    is_beta: candidate.is_beta,
                    is_devel,
                };
                for key in
                    resolve_targets(cache, &match_key, self.platform, candidate.is_debuginfo)?
                {
                    for expanded in self.expand_noarch_key(key) {
                        if !keys.contains(&expanded) {
                            keys.push(expanded);
                        }
                    }
                }
            }
            entries.extend(self.make_entries(candidate, &keys, lookup));
        }
        Ok(entries)
    }

    /// Plain policy: everything goes to the devel bucket of its own arch
    fn place_plain(
        &self,
        candidates: &[CandidatePackage],
        lookup: &HashMap<RepositoryKey, RepoHandle>,
    ) -> Vec<PlanPackage> {
        let mut entries = Vec::new();
        for candidate in candidates {
            let devel = self.platform.devel_repo_name(candidate.is_debuginfo);
            let arches: Vec<String> = if candidate.nevra.arch == "noarch" {
                self.platform.arch_list.clone()
            } else {
                vec![candidate.nevra.arch.clone()]
            };
            let keys: Vec<RepositoryKey> = arches
                .iter()
                .map(|arch| RepositoryKey::new(&devel, arch, candidate.is_debuginfo))
                .collect();
            entries.extend(self.make_entries(candidate, &keys, lookup));
        }
        entries
    }

    /// The devel fallback emits a `noarch`-keyed repository for noarch
    /// packages; fan it out across the declared architectures
    fn expand_noarch_key(&self, key: RepositoryKey) -> Vec<RepositoryKey> {
        if key.arch != "noarch" {
            return vec![key];
        }
        self.platform
            .arch_list
            .iter()
            .map(|arch| RepositoryKey::new(&key.name, arch, key.debug))
            .collect()
    }

    /// One plan entry per resolved repository, arch hints per entry
    fn make_entries(
        &self,
        candidate: &CandidatePackage,
        keys: &[RepositoryKey],
        lookup: &HashMap<RepositoryKey, RepoHandle>,
    ) -> Vec<PlanPackage> {
        let noarch = candidate.nevra.arch == "noarch";
        let default_hints = if noarch {
            self.platform.arch_list.clone()
        } else {
            vec![candidate.nevra.arch.clone()]
        };

        let mut entries = Vec::new();
        for key in keys {
            let Some(handle) = lookup.get(key) else {
                warn!(
                    "No production repository for {}, leaving {} unplaced there",
                    key, candidate.full_name
                );
                continue;
            };
            let hints = if noarch {
                self.platform.arch_list.clone()
            } else {
                let mut hints = vec![handle.arch.clone()];
                // A weak-arch package riding in a strong-arch repository
                // keeps its own arch visible for display
                if candidate.nevra.arch != handle.arch {
                    hints.push(candidate.nevra.arch.clone());
                }
                hints
            };
            entries.push(PlanPackage {
                package: candidate.clone(),
                repositories: vec![RepositoryEntry::from(handle)],
                repo_arch_location: hints,
            });
        }

        if entries.is_empty() {
            entries.push(PlanPackage {
                package: candidate.clone(),
                repositories: Vec::new(),
                repo_arch_location: default_hints,
            });
        }
        entries
    }

    fn place_modules(
        &self,
        placements: Vec<ModulePlacement>,
        lookup: &HashMap<RepositoryKey, RepoHandle>,
    ) -> Vec<PlanModule> {
        placements
            .into_iter()
            .map(|placement| {
                let repositories = placement
                    .targets
                    .iter()
                    .filter_map(|key| {
                        let handle = lookup.get(key);
                        if handle.is_none() {
                            warn!("No production repository for module target {}", key);
                        }
                        handle.map(RepositoryEntry::from)
                    })
                    .collect();
                PlanModule {
                    module: placement.module,
                    repositories,
                    content_href: None,
                }
            })
            .collect()
    }
}

/// Refresh only the already-present map of a plan
///
/// Execution re-checks presence against live repository state but keeps the
/// resolved production hrefs from planning time; a package that appeared in
/// production since planning without a resolved href is surfaced as a logic
/// error by the executor instead of being silently re-resolved.
pub fn refresh_presence_map(plan: &mut ReleasePlan, index: &PresenceIndex) {
    plan.packages_in_repos.clear();
    for entry in plan.packages.iter() {
        let full_name = &entry.package.full_name;
        let containing = index.repos_containing(full_name);
        if !containing.is_empty() {
            plan.packages_in_repos.insert(full_name.clone(), containing);
        }
    }
}

/// Apply a presence index to a plan, replacing its presence maps
pub fn apply_presence(plan: &mut ReleasePlan, index: &PresenceIndex, copy_priority: &[String]) {
    plan.packages_in_repos.clear();
    plan.packages_from_repos.clear();
    for entry in plan.packages.iter_mut() {
        let full_name = entry.package.full_name.clone();
        let containing = index.repos_containing(&full_name);
        if !containing.is_empty() {
            plan.packages_in_repos.insert(full_name.clone(), containing);
        }
        match index.resolve(&full_name, copy_priority) {
            Some(hit) => {
                entry.package.resolved_repo_href = Some(hit.href.clone());
                plan.packages_from_repos.insert(full_name, hit.repo_id);
            }
            None => entry.package.resolved_repo_href = None,
        }
    }
}

/// Candidates of the builds, first occurrence of each artifact name wins
fn collect_candidates(builds: &[BuildRecord], task_filter: Option<&[i64]>) -> Vec<CandidatePackage> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for build in builds {
        for task in &build.tasks {
            if !task.is_done() || !task_selected(task.id, task_filter) {
                continue;
            }
            for artifact in &task.artifacts {
                if !seen.insert(artifact.name.clone()) {
                    continue;
                }
                candidates.push(CandidatePackage {
                    nevra: artifact.nevra.clone(),
                    full_name: artifact.name.clone(),
                    source_build_id: build.id,
                    build_task_id: task.id,
                    task_arch: task.arch.clone(),
                    is_beta: build.is_beta,
                    is_debuginfo: artifact.is_debuginfo,
                    force_release: false,
                    resolved_repo_href: None,
                    artifact_href: artifact.href.clone(),
                });
            }
        }
    }
    candidates
}

fn task_selected(task_id: i64, filter: Option<&[i64]>) -> bool {
    filter.map(|ids| ids.contains(&task_id)).unwrap_or(true)
}

/// Beta snapshots mark themselves in the oracle distribution version
fn response_is_beta(response: &OracleResponse) -> bool {
    response.distribution.version.contains("beta")
}

fn dedup_by_full_name<I: Iterator<Item = CandidatePackage>>(iter: I) -> Vec<CandidatePackage> {
    let mut seen = HashSet::new();
    iter.filter(|c| seen.insert(c.full_name.clone())).collect()
}

/// Every repository referenced by packages or modules, ascending by id
fn referenced_repositories(
    packages: &[PlanPackage],
    modules: &[PlanModule],
) -> Vec<RepositoryEntry> {
    let mut repositories: Vec<RepositoryEntry> = Vec::new();
    let entries = packages
        .iter()
        .flat_map(|p| p.repositories.iter())
        .chain(modules.iter().flat_map(|m| m.repositories.iter()));
    for entry in entries {
        if !repositories.iter().any(|r| r.id == entry.id) {
            repositories.push(entry.clone());
        }
    }
    repositories.sort_by_key(|r| r.id);
    repositories
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builds::{BuildArtifact, BuildTask, BuildTaskStatus};
    use crate::nevra::Nevra;

    fn artifact(name: &str) -> BuildArtifact {
        let nevra = Nevra::from_artifact_name(name).unwrap();
        let is_debuginfo = nevra.is_debuginfo();
        BuildArtifact {
            nevra,
            name: name.to_string(),
            href: format!("/artifacts/{name}"),
            is_debuginfo,
        }
    }

    fn task(id: i64, build_id: i64, arch: &str, artifacts: &[&str]) -> BuildTask {
        BuildTask {
            id,
            build_id,
            arch: arch.to_string(),
            status: BuildTaskStatus::Done,
            artifacts: artifacts.iter().map(|n| artifact(n)).collect(),
            module_template: None,
        }
    }

    #[test]
    fn test_collect_candidates_dedup_first_wins() {
        let builds = vec![BuildRecord {
            id: 1,
            is_beta: false,
            tasks: vec![
                task(10, 1, "x86_64", &["foo-1.0-1.el8.noarch.rpm"]),
                task(11, 1, "aarch64", &["foo-1.0-1.el8.noarch.rpm"]),
            ],
        }];
        let candidates = collect_candidates(&builds, None);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].build_task_id, 10);
        assert_eq!(candidates[0].task_arch, "x86_64");
    }

    #[test]
    fn test_collect_candidates_task_filter() {
        let builds = vec![BuildRecord {
            id: 1,
            is_beta: false,
            tasks: vec![
                task(10, 1, "x86_64", &["foo-1.0-1.el8.x86_64.rpm"]),
                task(11, 1, "aarch64", &["foo-1.0-1.el8.aarch64.rpm"]),
            ],
        }];
        let candidates = collect_candidates(&builds, Some(&[11]));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].nevra.arch, "aarch64");
    }

    #[test]
    fn test_collect_candidates_skips_unfinished_tasks() {
        let mut unfinished = task(10, 1, "x86_64", &["foo-1.0-1.el8.x86_64.rpm"]);
        unfinished.status = BuildTaskStatus::Failed;
        let builds = vec![BuildRecord {
            id: 1,
            is_beta: false,
            tasks: vec![unfinished],
        }];
        assert!(collect_candidates(&builds, None).is_empty());
    }

    #[test]
    fn test_referenced_repositories_dedup_sorted() {
        let entry = |id: i64| RepositoryEntry {
            id,
            name: format!("repo-{id}"),
            arch: "x86_64".to_string(),
            debug: false,
            url: String::new(),
        };
        let packages = vec![PlanPackage {
            package: CandidatePackage {
                nevra: Nevra::new("foo", "0", "1.0", "1.el8", "x86_64"),
                full_name: "foo-1.0-1.el8.x86_64.rpm".to_string(),
                source_build_id: 1,
                build_task_id: 1,
                task_arch: "x86_64".to_string(),
                is_beta: false,
                is_debuginfo: false,
                force_release: false,
                resolved_repo_href: None,
                artifact_href: "/a/foo".to_string(),
            },
            repositories: vec![entry(3), entry(1)],
            repo_arch_location: vec![],
        }];
        let modules = vec![PlanModule {
            module: ModuleRef {
                name: "m".to_string(),
                stream: "1".to_string(),
                version: 1,
                context: "c".to_string(),
                arch: "x86_64".to_string(),
                template: String::new(),
            },
            repositories: vec![entry(1), entry(2)],
            content_href: None,
        }];
        let repos = referenced_repositories(&packages, &modules);
        let ids: Vec<i64> = repos.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_response_is_beta() {
        let response = OracleResponse {
            distribution: crate::affinity::OracleDistribution {
                version: "8-beta".to_string(),
            },
            packages: vec![],
        };
        assert!(response_is_beta(&response));
    }
}
