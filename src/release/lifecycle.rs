// src/release/lifecycle.rs

//! Release lifecycle: create, update, commit, revert
//!
//! Wraps planning and execution behind status-checked operations over the
//! persisted release. Every status transition and plan mutation runs inside
//! one exclusive database transaction per release, which serializes
//! concurrent attempts on the same row.
//!
//! Commit catches exactly the validation, signature and missing-repository
//! error categories and records them as a `Failed` release with a message;
//! anything else (transport faults, failed manager tasks) propagates and
//! leaves the release `InProgress` for operator inspection.

use super::executor::{ContentGuard, ReleaseExecutor};
use crate::affinity::AffinityOracle;
use crate::builds::{BuildRecord, BuildSource, SignatureVerifier};
use crate::config::PlatformConfig;
use crate::db;
use crate::db::models::{Release, ReleaseBuild, ReleaseStatus};
use crate::error::{Error, Result};
use crate::plan::{PlanBuilder, ReleasePlan};
use crate::repository::RepositoryApi;
use rusqlite::Connection;
use tracing::{info, warn};

/// Entry point for release operations on one platform
pub struct ReleaseManager<'a> {
    client: &'a dyn RepositoryApi,
    oracle: Option<&'a dyn AffinityOracle>,
    builds: &'a dyn BuildSource,
    verifier: &'a dyn SignatureVerifier,
    guard: &'a dyn ContentGuard,
    platform: &'a PlatformConfig,
}

impl<'a> ReleaseManager<'a> {
    pub fn new(
        client: &'a dyn RepositoryApi,
        oracle: Option<&'a dyn AffinityOracle>,
        builds: &'a dyn BuildSource,
        verifier: &'a dyn SignatureVerifier,
        guard: &'a dyn ContentGuard,
        platform: &'a PlatformConfig,
    ) -> Self {
        Self {
            client,
            oracle,
            builds,
            verifier,
            guard,
            platform,
        }
    }

    fn plan_builder(&self) -> PlanBuilder<'_> {
        PlanBuilder::new(self.client, self.oracle, self.platform)
    }

    async fn fetch_builds(&self, build_ids: &[i64]) -> Result<Vec<BuildRecord>> {
        self.builds.get_builds(build_ids).await
    }

    /// Plan a release for the given builds and persist it as `Scheduled`
    pub async fn create(
        &self,
        conn: &mut Connection,
        build_ids: Vec<i64>,
        build_task_ids: Option<Vec<i64>>,
        created_by: &str,
    ) -> Result<Release> {
        let builds = self.fetch_builds(&build_ids).await?;
        let plan = self
            .plan_builder()
            .build_plan(&builds, build_task_ids.as_deref())
            .await?;

        let mut release = Release::new(
            self.platform.name.clone(),
            created_by.to_string(),
            build_ids,
            build_task_ids,
            plan,
        );
        db::transaction(conn, |tx| {
            release.insert(tx)?;
            Ok(())
        })?;
        info!(
            "Created release {} with {} plan entries",
            release.id.unwrap_or(0),
            release.plan.packages.len()
        );
        Ok(release)
    }

    /// Replace a scheduled release's plan
    ///
    /// A fully-formed plan (operator edits) is stored as-is after a fresh
    /// presence check; changed build ids rebuild the plan from scratch.
    pub async fn update(
        &self,
        conn: &mut Connection,
        release_id: i64,
        new_build_ids: Option<Vec<i64>>,
        new_plan: Option<ReleasePlan>,
    ) -> Result<Release> {
        let mut release = load_release(conn, release_id)?;
        require_status(&release, &[ReleaseStatus::Scheduled], "update")?;

        match (new_plan, new_build_ids) {
            (Some(mut plan), build_ids) => {
                self.plan_builder().refresh_presence(&mut plan).await?;
                release.plan = plan;
                if let Some(build_ids) = build_ids {
                    release.build_ids = build_ids;
                }
            }
            (None, Some(build_ids)) => {
                let builds = self.fetch_builds(&build_ids).await?;
                release.plan = self
                    .plan_builder()
                    .build_plan(&builds, release.build_task_ids.as_deref())
                    .await?;
                release.build_ids = build_ids;
            }
            (None, None) => {
                // Nothing changed upstream; refresh the presence maps so the
                // operator sees current repository state
                let mut plan = release.plan.clone();
                self.plan_builder().refresh_presence(&mut plan).await?;
                release.plan = plan;
            }
        }

        db::transaction(conn, |tx| {
            release.update(tx)?;
            Ok(())
        })?;
        Ok(release)
    }

    /// Execute a release and record the outcome
    ///
    /// The release transitions to `InProgress` and the referenced builds are
    /// linked before execution starts. Success ends `Completed`; a caught
    /// failure ends `Failed` with the message stored. Either way the plan's
    /// audit log is persisted.
    pub async fn commit(&self, conn: &mut Connection, release_id: i64) -> Result<(Release, String)> {
        let mut release = db::transaction(conn, |tx| {
            let mut release = load_release(tx, release_id)?;
            require_status(
                &release,
                &[ReleaseStatus::Scheduled, ReleaseStatus::Failed],
                "commit",
            )?;
            release.status = ReleaseStatus::InProgress;
            release.update(tx)?;
            ReleaseBuild::link(tx, release_id, &release.build_ids)?;
            Ok(release)
        })?;

        let builds = self.fetch_builds(&release.build_ids).await?;
        let executor = ReleaseExecutor::new(self.client, self.verifier);

        let mut plan = release.plan.clone();
        let outcome = executor.execute(&mut plan, &builds).await;

        let (status, message) = match outcome {
            Ok(messages) => {
                let message = if messages.is_empty() {
                    "Release succeeded".to_string()
                } else {
                    format!("Release succeeded:\n{}", messages.join("\n"))
                };
                (ReleaseStatus::Completed, message)
            }
            Err(error) if error.is_release_failure() => {
                warn!("Release {} failed: {}", release_id, error);
                (ReleaseStatus::Failed, format!("Release failed: {error}"))
            }
            // Transport faults and failed manager tasks leave the release
            // in progress; operators inspect and re-commit manually
            Err(error) => return Err(error),
        };

        plan.append_log(&message);
        release.plan = plan;
        release.status = status;
        db::transaction(conn, |tx| {
            release.update(tx)?;
            Ok(())
        })?;
        Ok((release, message))
    }

    /// Undo a completed release and mark it `Reverted`
    pub async fn revert(&self, conn: &mut Connection, release_id: i64) -> Result<(Release, String)> {
        let mut release = db::transaction(conn, |tx| {
            let mut release = load_release(tx, release_id)?;
            require_status(&release, &[ReleaseStatus::Completed], "revert")?;
            release.status = ReleaseStatus::InProgress;
            release.update(tx)?;
            Ok(release)
        })?;

        let executor = ReleaseExecutor::new(self.client, self.verifier);
        let outcome = executor.revert(&release.plan, self.guard).await;

        let (status, message, unlink) = match outcome {
            Ok(messages) => {
                let message = if messages.is_empty() {
                    "Release reverted".to_string()
                } else {
                    format!("Release reverted:\n{}", messages.join("\n"))
                };
                (ReleaseStatus::Reverted, message, true)
            }
            Err(error) if error.is_release_failure() => {
                warn!("Revert of release {} failed: {}", release_id, error);
                (ReleaseStatus::Failed, format!("Revert failed: {error}"), false)
            }
            Err(error) => return Err(error),
        };

        release.plan.append_log(&message);
        release.status = status;
        db::transaction(conn, |tx| {
            release.update(tx)?;
            if unlink {
                ReleaseBuild::unlink_all(tx, release_id)?;
            }
            Ok(())
        })?;
        Ok((release, message))
    }
}

fn load_release(conn: &Connection, release_id: i64) -> Result<Release> {
    Release::find_by_id(conn, release_id)?.ok_or(Error::ReleaseNotFound(release_id))
}

fn require_status(release: &Release, allowed: &[ReleaseStatus], operation: &str) -> Result<()> {
    if allowed.contains(&release.status) {
        return Ok(());
    }
    Err(Error::InvalidStatusTransition {
        id: release.id.unwrap_or(0),
        status: release.status.to_string(),
        operation: operation.to_string(),
    })
}
