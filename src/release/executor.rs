// src/release/executor.rs

//! Release execution: apply or undo a plan against the repository manager
//!
//! One execution pass re-validates presence, groups content by repository,
//! deduplicates modules against each target's current module index, then
//! runs two strictly ordered phases: every `modify` call completes before
//! the first `publish` is issued. Modifies across different repositories run
//! concurrently; the phase boundary is an explicit barrier.
//!
//! Once the modify/publish phase has started there is no rollback: a failed
//! call surfaces as a release-level failure even when other repositories
//! already landed. Re-running the execution is safe, content-set modify
//! semantics make duplicate adds a no-op.

use crate::builds::{BuildRecord, SignatureVerifier};
use crate::error::{Error, Result};
use crate::modularity::ModuleIndex;
use crate::plan::{check_presence, refresh_presence_map, ReleasePlan, RepositoryEntry};
use crate::repository::{RepoHandle, RepositoryApi};
use futures::future::try_join_all;
use std::collections::HashMap;
use tracing::{debug, info};

/// Decides whether reverted content must stay in a repository
///
/// A later release may have independently re-added a package this release
/// placed; such content is retained on revert. Ownership bookkeeping lives
/// outside this engine, the check is delegated.
pub trait ContentGuard: Send + Sync {
    fn is_retained(&self, full_name: &str, repo_id: i64) -> bool;
}

/// Default guard: nothing is shared, everything placed may be removed
pub struct RetainNothing;

impl ContentGuard for RetainNothing {
    fn is_retained(&self, _full_name: &str, _repo_id: i64) -> bool {
        false
    }
}

/// Content staged for one repository
struct RepoGroup {
    handle: RepoHandle,
    hrefs: Vec<String>,
}

/// Executes approved release plans
pub struct ReleaseExecutor<'a> {
    client: &'a dyn RepositoryApi,
    verifier: &'a dyn SignatureVerifier,
}

impl<'a> ReleaseExecutor<'a> {
    pub fn new(client: &'a dyn RepositoryApi, verifier: &'a dyn SignatureVerifier) -> Self {
        Self { client, verifier }
    }

    /// Apply the plan: copy packages and modules into their repositories
    ///
    /// Returns the informational log of the pass. The plan's presence maps
    /// and module content hrefs are refreshed in place; the caller persists
    /// the plan afterwards, success or failure.
    pub async fn execute(
        &self,
        plan: &mut ReleasePlan,
        builds: &[BuildRecord],
    ) -> Result<Vec<String>> {
        plan.validate_for_execution()?;

        // Every build must verify before any repository is touched
        for build in builds {
            self.verifier.verify_build(build).await?;
        }

        let handles = self.resolve_entries(&plan.repositories).await?;
        let by_id: HashMap<i64, &RepoHandle> = handles.iter().map(|h| (h.id, h)).collect();

        // The plan may be stale relative to repository state since creation
        let candidates: Vec<_> = {
            let mut seen = std::collections::HashSet::new();
            plan.packages
                .iter()
                .map(|e| e.package.clone())
                .filter(|c| seen.insert(c.full_name.clone()))
                .collect()
        };
        let index = check_presence(self.client, &handles, &candidates).await?;
        refresh_presence_map(plan, &index);

        let mut messages = Vec::new();
        let mut groups: HashMap<i64, RepoGroup> = HashMap::new();

        // Package grouping and validation, no remote calls yet
        for entry in &plan.packages {
            let package = &entry.package;
            for repo in &entry.repositories {
                let Some(handle) = by_id.get(&repo.id) else {
                    return Err(Error::MissingRepository(repo.name.clone()));
                };
                let present = plan
                    .packages_in_repos
                    .get(&package.full_name)
                    .map(|ids| ids.contains(&repo.id))
                    .unwrap_or(false);

                if present && !package.force_release {
                    messages.push(format!(
                        "Package {} is already in {}, skipped",
                        package.full_name, repo.name
                    ));
                    continue;
                }
                if !package.force_release
                    && package.resolved_repo_href.is_none()
                    && plan.packages_in_repos.contains_key(&package.full_name)
                {
                    // Known to exist in production yet nothing resolved to
                    // copy from: adding the build artifact would silently
                    // publish stale content
                    return Err(Error::ReleaseLogicError(format!(
                        "{} exists in production but has no resolved repository href",
                        package.full_name
                    )));
                }

                let href = package.effective_href().to_string();
                let group = groups.entry(repo.id).or_insert_with(|| RepoGroup {
                    handle: (*handle).clone(),
                    hrefs: Vec::new(),
                });
                if !group.hrefs.contains(&href) {
                    group.hrefs.push(href);
                }
            }
        }

        // Module dedup against each target's current index; the index is
        // fetched once per repository URL within this execution
        let mut index_cache: HashMap<String, Option<String>> = HashMap::new();
        for module_entry in plan.modules.iter_mut() {
            let module = &module_entry.module;
            let nsvca = module.nsvca();
            for repo in &module_entry.repositories {
                let Some(handle) = by_id.get(&repo.id) else {
                    return Err(Error::MissingRepository(repo.name.clone()));
                };

                let document = match index_cache.get(&handle.url) {
                    Some(cached) => cached.clone(),
                    None => {
                        let fetched = self.client.get_module_document(&handle.url).await?;
                        index_cache.insert(handle.url.clone(), fetched.clone());
                        fetched
                    }
                };

                if let Some(text) = &document {
                    let existing =
                        ModuleIndex::parse_with_override(text, &module.name, &module.stream)?;
                    if existing.has_module(&nsvca) {
                        messages.push(format!(
                            "Module {} is already in {}, skipped",
                            nsvca, repo.name
                        ));
                        continue;
                    }
                }

                let (content_href, checksum) = self
                    .client
                    .create_module(
                        &module.template,
                        &module.name,
                        &module.stream,
                        &module.context,
                        &module.arch,
                    )
                    .await?;
                debug!("Created module {} ({})", nsvca, checksum);
                module_entry.content_href = Some(content_href.clone());
                let group = groups.entry(repo.id).or_insert_with(|| RepoGroup {
                    handle: (*handle).clone(),
                    hrefs: Vec::new(),
                });
                if !group.hrefs.contains(&content_href) {
                    group.hrefs.push(content_href);
                }
                messages.push(format!("Module {} staged for {}", nsvca, repo.name));
            }
        }

        let mut staged: Vec<RepoGroup> =
            groups.into_values().filter(|g| !g.hrefs.is_empty()).collect();
        staged.sort_by_key(|g| g.handle.id);
        for group in &staged {
            messages.push(format!(
                "Adding {} content units to {}.{}",
                group.hrefs.len(),
                group.handle.name,
                group.handle.arch
            ));
        }

        self.modify_then_publish(&staged, false).await?;
        info!(
            "Release executed: {} repositories touched, {} messages",
            staged.len(),
            messages.len()
        );
        Ok(messages)
    }

    /// Undo the plan: remove placed content from its repositories
    ///
    /// Content independently claimed by another owner (per the guard) is
    /// retained. Packages are located by a fresh presence check so the
    /// removal targets whatever href production currently holds.
    pub async fn revert(
        &self,
        plan: &ReleasePlan,
        guard: &dyn ContentGuard,
    ) -> Result<Vec<String>> {
        plan.validate_for_execution()?;

        let handles = self.resolve_entries(&plan.repositories).await?;
        let by_id: HashMap<i64, &RepoHandle> = handles.iter().map(|h| (h.id, h)).collect();

        let candidates: Vec<_> = {
            let mut seen = std::collections::HashSet::new();
            plan.packages
                .iter()
                .map(|e| e.package.clone())
                .filter(|c| seen.insert(c.full_name.clone()))
                .collect()
        };
        let index = check_presence(self.client, &handles, &candidates).await?;

        let mut messages = Vec::new();
        let mut groups: HashMap<i64, RepoGroup> = HashMap::new();

        for entry in &plan.packages {
            let package = &entry.package;
            for repo in &entry.repositories {
                let Some(handle) = by_id.get(&repo.id) else {
                    return Err(Error::MissingRepository(repo.name.clone()));
                };
                let Some(hit) = index.find(&package.full_name, repo.id) else {
                    messages.push(format!(
                        "Package {} is not in {}, nothing to remove",
                        package.full_name, repo.name
                    ));
                    continue;
                };
                if guard.is_retained(&package.full_name, repo.id) {
                    messages.push(format!(
                        "Package {} in {} is still claimed elsewhere, retained",
                        package.full_name, repo.name
                    ));
                    continue;
                }
                let group = groups.entry(repo.id).or_insert_with(|| RepoGroup {
                    handle: (*handle).clone(),
                    hrefs: Vec::new(),
                });
                if !group.hrefs.contains(&hit.href) {
                    group.hrefs.push(hit.href.clone());
                }
            }
        }

        for module_entry in &plan.modules {
            let Some(content_href) = &module_entry.content_href else {
                continue;
            };
            for repo in &module_entry.repositories {
                let Some(handle) = by_id.get(&repo.id) else {
                    return Err(Error::MissingRepository(repo.name.clone()));
                };
                let group = groups.entry(repo.id).or_insert_with(|| RepoGroup {
                    handle: (*handle).clone(),
                    hrefs: Vec::new(),
                });
                if !group.hrefs.contains(content_href) {
                    group.hrefs.push(content_href.clone());
                }
                messages.push(format!(
                    "Module {} staged for removal from {}",
                    module_entry.module.nsvca(),
                    repo.name
                ));
            }
        }

        let mut staged: Vec<RepoGroup> =
            groups.into_values().filter(|g| !g.hrefs.is_empty()).collect();
        staged.sort_by_key(|g| g.handle.id);
        for group in &staged {
            messages.push(format!(
                "Removing {} content units from {}.{}",
                group.hrefs.len(),
                group.handle.name,
                group.handle.arch
            ));
        }

        self.modify_then_publish(&staged, true).await?;
        Ok(messages)
    }

    /// Two-phase apply: all modifies complete, then all publishes
    ///
    /// Publishing before every modify has landed would expose readers to an
    /// inconsistent intermediate state, so the phases are separated by an
    /// explicit barrier rather than left to scheduling order.
    async fn modify_then_publish(&self, groups: &[RepoGroup], remove: bool) -> Result<()> {
        let modifies = groups.iter().map(|group| async move {
            let (add, del): (&[String], &[String]) = if remove {
                (&[], &group.hrefs)
            } else {
                (&group.hrefs, &[])
            };
            let task = self
                .client
                .modify_repository(&group.handle.href, add, del)
                .await?;
            self.client.wait_task(&task).await
        });
        try_join_all(modifies).await?;

        let publishes = groups.iter().map(|group| async move {
            let task = self.client.publish(&group.handle.href).await?;
            self.client.wait_task(&task).await
        });
        try_join_all(publishes).await?;
        Ok(())
    }

    /// Resolve plan repository entries against the manager
    async fn resolve_entries(&self, entries: &[RepositoryEntry]) -> Result<Vec<RepoHandle>> {
        let mut handles = Vec::with_capacity(entries.len());
        for entry in entries {
            let manager_name = format!("{}-{}", entry.name, entry.arch);
            let record = self
                .client
                .get_repository(&manager_name)
                .await?
                .ok_or_else(|| Error::MissingRepository(manager_name.clone()))?;
            handles.push(RepoHandle {
                id: entry.id,
                name: entry.name.clone(),
                arch: entry.arch.clone(),
                debug: entry.debug,
                href: record.href,
                latest_version_href: record.latest_version_href,
                url: entry.url.clone(),
            });
        }
        Ok(handles)
    }
}
