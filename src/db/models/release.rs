// src/db/models/release.rs

//! Release and ReleaseBuild models - persisted release state

use crate::error::{Error, Result};
use crate::plan::ReleasePlan;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::str::FromStr;
use strum_macros::{Display, EnumString};

/// Lifecycle status of a release
///
/// `Scheduled → InProgress → {Completed, Failed}`, plus
/// `Completed → Reverted` through the inverse flow. A failed release may be
/// re-committed after its inputs are fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ReleaseStatus {
    Scheduled,
    InProgress,
    Completed,
    Failed,
    Reverted,
}

/// A persisted release with its reconciliation plan
#[derive(Debug, Clone)]
pub struct Release {
    pub id: Option<i64>,
    pub status: ReleaseStatus,
    pub platform: String,
    pub created_by: String,
    pub build_ids: Vec<i64>,
    /// Optional restriction to specific build tasks
    pub build_task_ids: Option<Vec<i64>>,
    pub plan: ReleasePlan,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl Release {
    /// Create a new scheduled release
    pub fn new(
        platform: String,
        created_by: String,
        build_ids: Vec<i64>,
        build_task_ids: Option<Vec<i64>>,
        plan: ReleasePlan,
    ) -> Self {
        Self {
            id: None,
            status: ReleaseStatus::Scheduled,
            platform,
            created_by,
            build_ids,
            build_task_ids,
            plan,
            created_at: None,
            updated_at: None,
        }
    }

    /// Insert this release into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO releases (status, platform, created_by, build_ids, build_task_ids, plan)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                self.status.to_string(),
                &self.platform,
                &self.created_by,
                serde_json::to_string(&self.build_ids)?,
                self.build_task_ids
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                self.plan.to_json()?,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find a release by ID
    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, status, platform, created_by, build_ids, build_task_ids, plan,
                    created_at, updated_at
             FROM releases WHERE id = ?1",
        )?;

        let release = stmt.query_row([id], Self::from_row).optional()?;

        Ok(release)
    }

    /// List all releases, newest first
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, status, platform, created_by, build_ids, build_task_ids, plan,
                    created_at, updated_at
             FROM releases ORDER BY id DESC",
        )?;

        let releases = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(releases)
    }

    /// Persist status, plan and build lists
    pub fn update(&self, conn: &Connection) -> Result<()> {
        let id = self
            .id
            .ok_or_else(|| Error::ReleaseLogicError("Cannot update release without ID".into()))?;

        conn.execute(
            "UPDATE releases SET status = ?1, build_ids = ?2, build_task_ids = ?3, plan = ?4,
             updated_at = CURRENT_TIMESTAMP WHERE id = ?5",
            params![
                self.status.to_string(),
                serde_json::to_string(&self.build_ids)?,
                self.build_task_ids
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                self.plan.to_json()?,
                id,
            ],
        )?;

        Ok(())
    }

    /// Convert a database row to a Release
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let status_text: String = row.get(1)?;
        let status = ReleaseStatus::from_str(&status_text).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Invalid release status '{status_text}': {e}"),
                )),
            )
        })?;

        let build_ids_text: String = row.get(4)?;
        let build_task_ids_text: Option<String> = row.get(5)?;
        let plan_text: String = row.get(6)?;

        let json_error = |idx: usize, e: String| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        };

        let build_ids: Vec<i64> =
            serde_json::from_str(&build_ids_text).map_err(|e| json_error(4, e.to_string()))?;
        let build_task_ids: Option<Vec<i64>> = build_task_ids_text
            .map(|text| serde_json::from_str(&text))
            .transpose()
            .map_err(|e| json_error(5, e.to_string()))?;
        let plan =
            ReleasePlan::from_json(&plan_text).map_err(|e| json_error(6, e.to_string()))?;

        Ok(Self {
            id: Some(row.get(0)?),
            status,
            platform: row.get(2)?,
            created_by: row.get(3)?,
            build_ids,
            build_task_ids,
            plan,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

/// Ownership marker linking a build to the release that shipped it
#[derive(Debug, Clone)]
pub struct ReleaseBuild {
    pub release_id: i64,
    pub build_id: i64,
}

impl ReleaseBuild {
    /// Link builds to a release; re-linking is a no-op
    pub fn link(conn: &Connection, release_id: i64, build_ids: &[i64]) -> Result<()> {
        for build_id in build_ids {
            conn.execute(
                "INSERT OR IGNORE INTO release_builds (release_id, build_id) VALUES (?1, ?2)",
                params![release_id, build_id],
            )?;
        }
        Ok(())
    }

    /// Remove all ownership markers of a release
    pub fn unlink_all(conn: &Connection, release_id: i64) -> Result<()> {
        conn.execute(
            "DELETE FROM release_builds WHERE release_id = ?1",
            [release_id],
        )?;
        Ok(())
    }

    /// Whether any release claims this build
    pub fn is_build_linked(conn: &Connection, build_id: i64) -> Result<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM release_builds WHERE build_id = ?1",
            [build_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Builds linked to a release, ascending
    pub fn builds_of(conn: &Connection, release_id: i64) -> Result<Vec<i64>> {
        let mut stmt = conn.prepare(
            "SELECT build_id FROM release_builds WHERE release_id = ?1 ORDER BY build_id",
        )?;
        let ids = stmt
            .query_map([release_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}
