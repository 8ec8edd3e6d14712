// src/plan/mod.rs

//! Release plan: the reconciliation instruction set for one release
//!
//! A plan lists package→repository and module→repository placements plus the
//! presence index computed against production content. Plans are persisted
//! verbatim as a versioned JSON document and validated on deserialize.

mod builder;
mod presence;

pub use builder::{apply_presence, refresh_presence_map, PlanBuilder};
pub use presence::{check_presence, PresenceIndex, RepoHit};

use crate::error::{Error, Result};
use crate::modularity::Nsvca;
use crate::nevra::Nevra;
use crate::repository::RepoHandle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current plan document format
pub const PLAN_FORMAT_VERSION: u32 = 1;

/// A package produced by a build, as planned for release
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidatePackage {
    #[serde(flatten)]
    pub nevra: Nevra,
    pub full_name: String,
    pub source_build_id: i64,
    pub build_task_id: i64,
    /// Architecture the build task ran under
    pub task_arch: String,
    #[serde(default)]
    pub is_beta: bool,
    #[serde(default)]
    pub is_debuginfo: bool,
    /// Release even when an identical NEVRA is already in production
    #[serde(default, rename = "force")]
    pub force_release: bool,
    /// Href of an existing production copy, when presence matched one
    #[serde(default, rename = "href_from_repo")]
    pub resolved_repo_href: Option<String>,
    /// The built artifact in the store
    pub artifact_href: String,
}

impl CandidatePackage {
    /// Href to place into target repositories
    ///
    /// An existing production copy is reused unless the release is forced.
    pub fn effective_href(&self) -> &str {
        if self.force_release {
            return &self.artifact_href;
        }
        self.resolved_repo_href
            .as_deref()
            .unwrap_or(&self.artifact_href)
    }
}

/// A repository referenced by the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryEntry {
    pub id: i64,
    pub name: String,
    pub arch: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub url: String,
}

impl From<&RepoHandle> for RepositoryEntry {
    fn from(handle: &RepoHandle) -> Self {
        Self {
            id: handle.id,
            name: handle.name.clone(),
            arch: handle.arch.clone(),
            debug: handle.debug,
            url: handle.url.clone(),
        }
    }
}

/// One package placement entry
///
/// A package placed into N repositories appears as N entries sharing the
/// same NEVRA so each carries its own per-repository architecture display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPackage {
    pub package: CandidatePackage,
    /// Target repositories; empty means the package is visibly unplaced
    #[serde(default)]
    pub repositories: Vec<RepositoryEntry>,
    /// Architectures under which the placement is displayed
    #[serde(default)]
    pub repo_arch_location: Vec<String>,
}

/// A module stream placement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleRef {
    pub name: String,
    pub stream: String,
    pub version: u64,
    pub context: String,
    pub arch: String,
    /// Rendered modulemd document
    pub template: String,
}

impl ModuleRef {
    pub fn nsvca(&self) -> Nsvca {
        Nsvca {
            name: self.name.clone(),
            stream: self.stream.clone(),
            version: self.version,
            context: self.context.clone(),
            arch: self.arch.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanModule {
    pub module: ModuleRef,
    #[serde(default)]
    pub repositories: Vec<RepositoryEntry>,
    /// Content href of the module created at commit time, kept for revert
    #[serde(default)]
    pub content_href: Option<String>,
}

/// The full reconciliation instruction set for a release
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleasePlan {
    #[serde(default = "default_format_version")]
    pub plan_format_version: u32,

    #[serde(default)]
    pub packages: Vec<PlanPackage>,

    #[serde(default)]
    pub modules: Vec<PlanModule>,

    /// Flat list of every repository referenced, for display and audit
    #[serde(default)]
    pub repositories: Vec<RepositoryEntry>,

    /// full_name → repository id of the resolved existing production copy
    #[serde(default)]
    pub packages_from_repos: BTreeMap<String, i64>,

    /// full_name → repository ids already containing the package
    #[serde(default)]
    pub packages_in_repos: BTreeMap<String, Vec<i64>>,

    /// Outcome trail of commit/revert attempts
    #[serde(default)]
    pub last_log: Option<String>,
}

fn default_format_version() -> u32 {
    PLAN_FORMAT_VERSION
}

impl Default for ReleasePlan {
    fn default() -> Self {
        Self {
            plan_format_version: PLAN_FORMAT_VERSION,
            packages: Vec::new(),
            modules: Vec::new(),
            repositories: Vec::new(),
            packages_from_repos: BTreeMap::new(),
            packages_in_repos: BTreeMap::new(),
            last_log: None,
        }
    }
}

impl ReleasePlan {
    /// Executing an empty plan is always an error
    pub fn validate_for_execution(&self) -> Result<()> {
        if self.packages.is_empty() || self.repositories.is_empty() {
            return Err(Error::EmptyReleasePlan);
        }
        Ok(())
    }

    /// Deserialize a persisted plan, validating the document format
    pub fn from_json(text: &str) -> Result<Self> {
        let plan: ReleasePlan = serde_json::from_str(text)?;
        if plan.plan_format_version != PLAN_FORMAT_VERSION {
            return Err(Error::ParseError(format!(
                "Unsupported plan format version {}",
                plan.plan_format_version
            )));
        }
        Ok(plan)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Append a timestamped line to the execution log
    pub fn append_log(&mut self, message: &str) {
        let line = format!("[{}] {}", chrono::Utc::now().to_rfc3339(), message);
        match &mut self.last_log {
            Some(log) => {
                log.push('\n');
                log.push_str(&line);
            }
            None => self.last_log = Some(line),
        }
    }

    /// Counts for operator display
    pub fn summary(&self) -> PlanSummary {
        let unplaced = self
            .packages
            .iter()
            .filter(|p| p.repositories.is_empty())
            .count();
        PlanSummary {
            packages: self.packages.len(),
            unplaced_packages: unplaced,
            already_present: self.packages_in_repos.len(),
            modules: self.modules.len(),
            repositories: self.repositories.len(),
        }
    }
}

/// Summary of a release plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub packages: usize,
    pub unplaced_packages: usize,
    pub already_present: usize,
    pub modules: usize,
    pub repositories: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64) -> RepositoryEntry {
        RepositoryEntry {
            id,
            name: format!("repo-{id}"),
            arch: "x86_64".to_string(),
            debug: false,
            url: String::new(),
        }
    }

    fn package(name: &str) -> PlanPackage {
        PlanPackage {
            package: CandidatePackage {
                nevra: Nevra::new(name, "0", "1.0", "1.el8", "x86_64"),
                full_name: format!("{name}-1.0-1.el8.x86_64.rpm"),
                source_build_id: 1,
                build_task_id: 1,
                task_arch: "x86_64".to_string(),
                is_beta: false,
                is_debuginfo: false,
                force_release: false,
                resolved_repo_href: None,
                artifact_href: format!("/artifacts/{name}"),
            },
            repositories: vec![entry(1)],
            repo_arch_location: vec!["x86_64".to_string()],
        }
    }

    #[test]
    fn test_empty_plan_rejected() {
        let plan = ReleasePlan::default();
        assert!(matches!(
            plan.validate_for_execution(),
            Err(Error::EmptyReleasePlan)
        ));

        // Packages without repositories are still not executable
        let plan = ReleasePlan {
            packages: vec![package("foo")],
            ..Default::default()
        };
        assert!(plan.validate_for_execution().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let plan = ReleasePlan {
            packages: vec![package("foo")],
            repositories: vec![entry(1)],
            packages_in_repos: BTreeMap::from([(
                "foo-1.0-1.el8.x86_64.rpm".to_string(),
                vec![1],
            )]),
            ..Default::default()
        };
        let text = plan.to_json().unwrap();
        let parsed = ReleasePlan::from_json(&text).unwrap();
        assert_eq!(parsed.packages.len(), 1);
        assert_eq!(parsed.packages[0].package.nevra.name, "foo");
        assert_eq!(parsed.packages_in_repos.len(), 1);
    }

    #[test]
    fn test_wire_field_names() {
        let mut plan = ReleasePlan {
            packages: vec![package("foo")],
            repositories: vec![entry(1)],
            ..Default::default()
        };
        plan.packages[0].package.force_release = true;
        plan.packages[0].package.resolved_repo_href = Some("/prod/foo".to_string());
        let text = plan.to_json().unwrap();
        assert!(text.contains("\"force\":true"));
        assert!(text.contains("\"href_from_repo\":\"/prod/foo\""));
        assert!(text.contains("\"epoch\":\"0\""));
    }

    #[test]
    fn test_unknown_format_version_rejected() {
        let text = r#"{"plan_format_version": 99, "packages": [], "repositories": []}"#;
        assert!(ReleasePlan::from_json(text).is_err());
    }

    #[test]
    fn test_effective_href_force_override() {
        let mut candidate = package("foo").package;
        candidate.resolved_repo_href = Some("/prod/foo".to_string());
        assert_eq!(candidate.effective_href(), "/prod/foo");
        candidate.force_release = true;
        assert_eq!(candidate.effective_href(), "/artifacts/foo");
    }

    #[test]
    fn test_append_log_accumulates() {
        let mut plan = ReleasePlan::default();
        plan.append_log("first attempt failed");
        plan.append_log("second attempt succeeded");
        let log = plan.last_log.as_deref().unwrap();
        assert!(log.contains("first attempt failed"));
        assert!(log.contains("second attempt succeeded"));
        assert_eq!(log.lines().count(), 2);
    }

    #[test]
    fn test_summary_counts_unplaced() {
        let mut plan = ReleasePlan {
            packages: vec![package("foo"), package("bar")],
            repositories: vec![entry(1)],
            modules: vec![],
            ..Default::default()
        };
        plan.packages[1].repositories.clear();
        let summary = plan.summary();
        assert_eq!(summary.packages, 2);
        assert_eq!(summary.unplaced_packages, 1);
    }
}
