// src/builds/mod.rs

//! Contracts with the external build scheduler
//!
//! Builds and build tasks live in the scheduler; this engine references them
//! by id and consumes finished artifacts through `BuildDone`-style reports.
//! Package architecture and debug-ness are always derived from the artifact
//! file name, never passed explicitly.

use crate::error::{Error, Result};
use crate::nevra::Nevra;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Terminal status of a build task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildTaskStatus {
    Done,
    Failed,
    Excluded,
}

/// Kind of a reported artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Rpm,
    BuildLog,
}

/// One artifact in a BuildDone report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportedArtifact {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ArtifactType,
    pub href: String,
}

/// Completion report sent by the build scheduler for one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildDone {
    pub task_id: i64,
    pub status: BuildTaskStatus,
    pub artifacts: Vec<ReportedArtifact>,
}

/// A parsed RPM artifact of a finished task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub nevra: Nevra,
    /// Full artifact file name as reported
    pub name: String,
    pub href: String,
    pub is_debuginfo: bool,
}

/// A build task with its finished artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildTask {
    pub id: i64,
    pub build_id: i64,
    /// Architecture the task ran under; differs from package arch for
    /// noarch and src packages
    pub arch: String,
    pub status: BuildTaskStatus,
    pub artifacts: Vec<BuildArtifact>,
    /// Rendered modulemd template, when the task built a modular component
    #[serde(default)]
    pub module_template: Option<String>,
}

impl BuildTask {
    /// Build a task record from a scheduler completion report
    ///
    /// Build logs are dropped; RPM artifacts that fail NEVRA parsing fail
    /// the whole report, a malformed name points at a broken build.
    pub fn from_report(id: i64, build_id: i64, arch: &str, report: &BuildDone) -> Result<Self> {
        if report.task_id != id {
            return Err(Error::ParseError(format!(
                "Report for task {} applied to task {}",
                report.task_id, id
            )));
        }
        let mut artifacts = Vec::new();
        for artifact in &report.artifacts {
            if artifact.kind != ArtifactType::Rpm {
                continue;
            }
            let nevra = Nevra::from_artifact_name(&artifact.name)?;
            let is_debuginfo = nevra.is_debuginfo();
            artifacts.push(BuildArtifact {
                nevra,
                name: artifact.name.clone(),
                href: artifact.href.clone(),
                is_debuginfo,
            });
        }
        Ok(Self {
            id,
            build_id,
            arch: arch.to_string(),
            status: report.status,
            artifacts,
            module_template: None,
        })
    }

    pub fn is_done(&self) -> bool {
        self.status == BuildTaskStatus::Done
    }
}

/// A build referenced by a release
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRecord {
    pub id: i64,
    /// Built against the beta snapshot of the platform
    #[serde(default)]
    pub is_beta: bool,
    pub tasks: Vec<BuildTask>,
}

impl BuildRecord {
    /// Source RPM names across all finished tasks, deduplicated
    pub fn source_package_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for task in &self.tasks {
            if !task.is_done() {
                continue;
            }
            for artifact in &task.artifacts {
                if artifact.nevra.is_source() && !names.contains(&artifact.nevra.name) {
                    names.push(artifact.nevra.name.clone());
                }
            }
        }
        names
    }
}

/// Lookup of builds by id, backed by the external scheduler
#[async_trait]
pub trait BuildSource: Send + Sync {
    async fn get_builds(&self, ids: &[i64]) -> Result<Vec<BuildRecord>>;
}

/// External signature verification, delegated per build
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    /// Succeeds iff every artifact of the build carries a valid signature
    async fn verify_build(&self, build: &BuildRecord) -> Result<()>;
}

/// HTTP client for the build scheduler's lookup API
pub struct HttpBuildSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpBuildSource {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(SERVICE_TIMEOUT)
            .build()
            .map_err(|e| {
                Error::RepositoryUnavailable(format!("Failed to create HTTP client: {e}"))
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BuildSource for HttpBuildSource {
    async fn get_builds(&self, ids: &[i64]) -> Result<Vec<BuildRecord>> {
        let mut builds = Vec::with_capacity(ids.len());
        for id in ids {
            let url = format!("{}/api/v1/builds/{}", self.endpoint, id);
            let response = self.client.get(&url).send().await.map_err(|e| {
                Error::RepositoryUnavailable(format!("Build scheduler unreachable: {e}"))
            })?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(Error::BuildNotFound(*id));
            }
            if !response.status().is_success() {
                return Err(Error::RepositoryUnavailable(format!(
                    "HTTP {} from build scheduler",
                    response.status()
                )));
            }
            let build: BuildRecord = response.json().await.map_err(|e| {
                Error::ParseError(format!("Invalid build record for {id}: {e}"))
            })?;
            builds.push(build);
        }
        Ok(builds)
    }
}

/// Default timeout for scheduler and signature service calls
const SERVICE_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the signature verification service
pub struct HttpSignatureVerifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSignatureVerifier {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(SERVICE_TIMEOUT)
            .build()
            .map_err(|e| {
                Error::RepositoryUnavailable(format!("Failed to create HTTP client: {e}"))
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    verified: bool,
    #[serde(default)]
    reason: Option<String>,
}

#[async_trait]
impl SignatureVerifier for HttpSignatureVerifier {
    async fn verify_build(&self, build: &BuildRecord) -> Result<()> {
        let url = format!("{}/api/v1/builds/{}/verify", self.endpoint, build.id);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| Error::SignatureError {
                build_id: build.id,
                reason: format!("Signature service unreachable: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(Error::SignatureError {
                build_id: build.id,
                reason: format!("HTTP {} from signature service", response.status()),
            });
        }

        let body: VerifyResponse = response.json().await.map_err(|e| Error::SignatureError {
            build_id: build.id,
            reason: format!("Invalid signature service response: {e}"),
        })?;

        if !body.verified {
            return Err(Error::SignatureError {
                build_id: build.id,
                reason: body
                    .reason
                    .unwrap_or_else(|| "Unsigned artifacts present".to_string()),
            });
        }
        Ok(())
    }
}
