// tests/common/mod.rs

//! Shared test utilities: in-memory mocks for the external collaborators.

use async_trait::async_trait;
use drydock::affinity::{
    AffinityOracle, OracleDistribution, OracleRepository, OracleResponse, PredictedPackage,
};
use drydock::builds::{
    BuildArtifact, BuildRecord, BuildSource, BuildTask, BuildTaskStatus, SignatureVerifier,
};
use drydock::config::{PlatformConfig, RepositoryConfig};
use drydock::nevra::Nevra;
use drydock::repository::{PackageFilter, PackageRecord, RepoRecord, RepositoryApi, TaskRef};
use drydock::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

/// One repository held by the mock manager
#[derive(Debug, Default, Clone)]
pub struct MockRepo {
    pub version: u64,
    /// Content in the working (unpublished) set
    pub content: HashSet<String>,
    /// Content visible to readers (latest published version)
    pub published: HashSet<String>,
}

#[derive(Default)]
struct MockState {
    repos: HashMap<String, MockRepo>,
    /// Content href → package record
    packages: HashMap<String, PackageRecord>,
    /// Repository URL → current module document
    module_docs: HashMap<String, String>,
    created_modules: Vec<String>,
}

/// In-memory repository manager
///
/// Modify applies to the working set; publish copies the working set into
/// the published set and bumps the version, matching the manager contract
/// that readers only observe published versions. A call log records the
/// order of modify/publish events for barrier assertions.
#[derive(Default)]
pub struct MockRepositoryClient {
    state: Mutex<MockState>,
    pub call_log: Mutex<Vec<String>>,
    /// Artificial per-repository delay applied inside modify calls
    pub modify_delays: Mutex<HashMap<String, u64>>,
    /// Repositories whose modify tasks fail
    pub failing_modifies: Mutex<HashSet<String>>,
}

impl MockRepositoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_repo(&self, manager_name: &str) {
        let mut state = self.state.lock().unwrap();
        state.repos.insert(manager_name.to_string(), MockRepo::default());
    }

    /// Register a package content unit and place it in a repository's
    /// published set
    pub fn seed_package(&self, manager_name: &str, nevra: &Nevra) -> String {
        let href = format!("/content/packages/{}/", nevra.full_name());
        let mut state = self.state.lock().unwrap();
        state.packages.insert(
            href.clone(),
            PackageRecord {
                href: href.clone(),
                name: nevra.name.clone(),
                epoch: nevra.epoch.clone(),
                version: nevra.version.clone(),
                release: nevra.release.clone(),
                arch: nevra.arch.clone(),
            },
        );
        let repo = state.repos.get_mut(manager_name).expect("unknown mock repo");
        repo.content.insert(href.clone());
        repo.published.insert(href.clone());
        href
    }

    /// Register a content unit for an artifact href so executor adds are
    /// listable after publication
    pub fn register_artifact(&self, href: &str, nevra: &Nevra) {
        let mut state = self.state.lock().unwrap();
        state.packages.insert(
            href.to_string(),
            PackageRecord {
                href: href.to_string(),
                name: nevra.name.clone(),
                epoch: nevra.epoch.clone(),
                version: nevra.version.clone(),
                release: nevra.release.clone(),
                arch: nevra.arch.clone(),
            },
        );
    }

    pub fn set_module_document(&self, repo_url: &str, document: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .module_docs
            .insert(repo_url.to_string(), document.to_string());
    }

    pub fn created_modules(&self) -> Vec<String> {
        self.state.lock().unwrap().created_modules.clone()
    }

    pub fn published_content(&self, manager_name: &str) -> HashSet<String> {
        self.state.lock().unwrap().repos[manager_name].published.clone()
    }

    pub fn log(&self) -> Vec<String> {
        self.call_log.lock().unwrap().clone()
    }

    fn version_href(name: &str, version: u64) -> String {
        format!("/repos/{name}/versions/{version}/")
    }

    fn repo_name_from_href(href: &str) -> String {
        href.trim_start_matches("/repos/")
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

#[async_trait]
impl RepositoryApi for MockRepositoryClient {
    async fn get_repository(&self, name: &str) -> Result<Option<RepoRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state.repos.get(name).map(|repo| RepoRecord {
            href: format!("/repos/{name}/"),
            name: name.to_string(),
            latest_version_href: Self::version_href(name, repo.version),
        }))
    }

    async fn get_or_create_repository(&self, name: &str) -> Result<RepoRecord> {
        if let Some(record) = self.get_repository(name).await? {
            return Ok(record);
        }
        self.add_repo(name);
        Ok(self.get_repository(name).await?.unwrap())
    }

    async fn list_packages(
        &self,
        version_href: &str,
        filter: &PackageFilter,
    ) -> Result<Vec<PackageRecord>> {
        filter.validate()?;
        let state = self.state.lock().unwrap();
        let name = Self::repo_name_from_href(version_href);
        let Some(repo) = state.repos.get(&name) else {
            return Ok(Vec::new());
        };
        // Only the published version a reader resolved is queryable
        if Self::version_href(&name, repo.version) != version_href {
            return Ok(Vec::new());
        }
        let matches = |record: &PackageRecord| {
            (filter.names.is_empty() || filter.names.contains(&record.name))
                && (filter.epochs.is_empty() || filter.epochs.contains(&record.epoch))
                && (filter.versions.is_empty() || filter.versions.contains(&record.version))
                && (filter.releases.is_empty() || filter.releases.contains(&record.release))
                && filter.arch.as_ref().map(|a| a == &record.arch).unwrap_or(true)
        };
        let mut records: Vec<PackageRecord> = repo
            .published
            .iter()
            .filter_map(|href| state.packages.get(href))
            .filter(|r| matches(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.href.cmp(&b.href));
        Ok(records)
    }

    async fn modify_repository(
        &self,
        repo_href: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<TaskRef> {
        let name = Self::repo_name_from_href(repo_href);
        self.call_log.lock().unwrap().push(format!("modify-start:{name}"));

        let delay = self.modify_delays.lock().unwrap().get(&name).copied();
        if let Some(ms) = delay {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        if self.failing_modifies.lock().unwrap().contains(&name) {
            return Ok(TaskRef {
                href: format!("/tasks/fail/{name}/"),
            });
        }

        {
            let mut state = self.state.lock().unwrap();
            let repo = state
                .repos
                .get_mut(&name)
                .ok_or_else(|| Error::MissingRepository(name.clone()))?;
            // Content-set semantics: duplicate adds and absent removes are
            // no-ops
            for href in add {
                repo.content.insert(href.clone());
            }
            for href in remove {
                repo.content.remove(href);
            }
        }
        self.call_log.lock().unwrap().push(format!("modify-done:{name}"));
        Ok(TaskRef {
            href: format!("/tasks/modify/{name}/"),
        })
    }

    async fn publish(&self, repo_href: &str) -> Result<TaskRef> {
        let name = Self::repo_name_from_href(repo_href);
        self.call_log.lock().unwrap().push(format!("publish:{name}"));
        let mut state = self.state.lock().unwrap();
        let repo = state
            .repos
            .get_mut(&name)
            .ok_or_else(|| Error::MissingRepository(name.clone()))?;
        repo.published = repo.content.clone();
        repo.version += 1;
        Ok(TaskRef {
            href: format!("/tasks/publish/{name}/"),
        })
    }

    async fn wait_task(&self, task: &TaskRef) -> Result<()> {
        if task.href.starts_with("/tasks/fail/") {
            return Err(Error::RepositoryTaskFailed(task.href.clone()));
        }
        Ok(())
    }

    async fn get_module_document(&self, repo_url: &str) -> Result<Option<String>> {
        let state = self.state.lock().unwrap();
        Ok(state.module_docs.get(repo_url).cloned())
    }

    async fn create_module(
        &self,
        document: &str,
        name: &str,
        stream: &str,
        context: &str,
        arch: &str,
    ) -> Result<(String, String)> {
        let href = format!("/content/modulemds/{name}:{stream}:{context}:{arch}/");
        let mut state = self.state.lock().unwrap();
        state.created_modules.push(format!("{name}:{stream}:{context}:{arch}"));
        let _ = document;
        Ok((href, "checksum".to_string()))
    }
}

/// Canned-response affinity oracle
#[derive(Default)]
pub struct MockOracle {
    /// source rpm name → responses
    pub package_responses: HashMap<String, Vec<OracleResponse>>,
    /// (module name, stream) → responses
    pub module_responses: HashMap<(String, String), Vec<OracleResponse>>,
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Predict one binary package into the given repositories
    pub fn predict_package(
        &mut self,
        source_name: &str,
        name: &str,
        version: &str,
        arch: &str,
        repos: &[(&str, &str)],
    ) {
        let response = OracleResponse {
            distribution: OracleDistribution {
                version: "8".to_string(),
            },
            packages: vec![PredictedPackage {
                name: name.to_string(),
                version: version.to_string(),
                arch: arch.to_string(),
                repositories: repos
                    .iter()
                    .map(|(n, a)| OracleRepository {
                        name: n.to_string(),
                        arch: a.to_string(),
                    })
                    .collect(),
            }],
        };
        self.package_responses
            .entry(source_name.to_string())
            .or_default()
            .push(response);
    }
}

#[async_trait]
impl AffinityOracle for MockOracle {
    async fn find_module(
        &self,
        name: &str,
        stream: &str,
        _arches: &[String],
    ) -> Result<Vec<OracleResponse>> {
        Ok(self
            .module_responses
            .get(&(name.to_string(), stream.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn find_packages(&self, source_rpm_names: &[String]) -> Result<Vec<OracleResponse>> {
        let mut responses = Vec::new();
        for name in source_rpm_names {
            if let Some(found) = self.package_responses.get(name) {
                responses.extend(found.clone());
            }
        }
        Ok(responses)
    }
}

/// In-memory build scheduler
#[derive(Default)]
pub struct MockBuildSource {
    pub builds: Vec<BuildRecord>,
}

#[async_trait]
impl BuildSource for MockBuildSource {
    async fn get_builds(&self, ids: &[i64]) -> Result<Vec<BuildRecord>> {
        let mut found = Vec::new();
        for id in ids {
            let build = self
                .builds
                .iter()
                .find(|b| b.id == *id)
                .ok_or(Error::BuildNotFound(*id))?;
            found.push(build.clone());
        }
        Ok(found)
    }
}

/// Signature verifier with a configurable set of failing builds
#[derive(Default)]
pub struct MockVerifier {
    pub failing_builds: HashSet<i64>,
}

#[async_trait]
impl SignatureVerifier for MockVerifier {
    async fn verify_build(&self, build: &BuildRecord) -> Result<()> {
        if self.failing_builds.contains(&build.id) {
            return Err(Error::SignatureError {
                build_id: build.id,
                reason: "unsigned artifacts".to_string(),
            });
        }
        Ok(())
    }
}

/// Platform with devel buckets for x86_64/src and one appstream repository
pub fn test_platform() -> PlatformConfig {
    PlatformConfig {
        name: "AlmaLinux-8".to_string(),
        distribution: "almalinux".to_string(),
        distribution_version: "8".to_string(),
        arch_list: vec!["x86_64".to_string()],
        weak_arches: BTreeMap::new(),
        copy_priority_arches: vec!["x86_64".to_string()],
        modularity_filter_prefixes: vec![],
        repositories: vec![
            RepositoryConfig {
                name: "almalinux-8-appstream".to_string(),
                arch: "x86_64".to_string(),
                debug: false,
                url: "http://repo.test/appstream/x86_64".to_string(),
            },
            RepositoryConfig {
                name: "almalinux-8-devel".to_string(),
                arch: "x86_64".to_string(),
                debug: false,
                url: "http://repo.test/devel/x86_64".to_string(),
            },
            RepositoryConfig {
                name: "almalinux-8-devel".to_string(),
                arch: "src".to_string(),
                debug: false,
                url: "http://repo.test/devel/src".to_string(),
            },
        ],
    }
}

/// Register every platform repository with the mock manager
pub fn seed_platform_repos(client: &MockRepositoryClient, platform: &PlatformConfig) {
    for repo in &platform.repositories {
        client.add_repo(&repo.manager_name());
    }
}

/// Register every artifact of a build as listable manager content
pub fn register_build_artifacts(client: &MockRepositoryClient, build: &BuildRecord) {
    for task in &build.tasks {
        for artifact in &task.artifacts {
            client.register_artifact(&artifact.href, &artifact.nevra);
        }
    }
}

/// One-task build producing the given RPM artifact names
pub fn build_with_artifacts(build_id: i64, task_id: i64, arch: &str, names: &[&str]) -> BuildRecord {
    let artifacts = names
        .iter()
        .map(|name| {
            let nevra = Nevra::from_artifact_name(name).unwrap();
            let is_debuginfo = nevra.is_debuginfo();
            BuildArtifact {
                nevra,
                name: name.to_string(),
                href: format!("/artifacts/{name}/"),
                is_debuginfo,
            }
        })
        .collect();
    BuildRecord {
        id: build_id,
        is_beta: false,
        tasks: vec![BuildTask {
            id: task_id,
            build_id,
            arch: arch.to_string(),
            status: BuildTaskStatus::Done,
            artifacts,
            module_template: None,
        }],
    }
}
