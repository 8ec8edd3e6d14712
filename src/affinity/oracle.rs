// src/affinity/oracle.rs

//! Client for the external package-affinity oracle
//!
//! The oracle answers two kinds of questions: where does a module stream
//! live, and where do the binary packages of a set of source RPMs live.
//! Batch package queries use `match=closest` so the oracle picks the nearest
//! known version per package.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Default timeout for oracle queries
const ORACLE_TIMEOUT: Duration = Duration::from_secs(30);

/// A repository entry in an oracle prediction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleRepository {
    pub name: String,
    pub arch: String,
}

/// One predicted package with its candidate repositories
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictedPackage {
    pub name: String,
    pub version: String,
    pub arch: String,
    #[serde(default)]
    pub repositories: Vec<OracleRepository>,
}

/// Distribution snapshot the prediction came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleDistribution {
    pub version: String,
}

/// Oracle response: one distribution snapshot with its predicted packages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleResponse {
    pub distribution: OracleDistribution,
    #[serde(default)]
    pub packages: Vec<PredictedPackage>,
}

/// Query surface of the package-affinity oracle
#[async_trait]
pub trait AffinityOracle: Send + Sync {
    /// Predict placements for a module stream across the given arches
    async fn find_module(
        &self,
        name: &str,
        stream: &str,
        arches: &[String],
    ) -> Result<Vec<OracleResponse>>;

    /// Predict placements for the binary packages of the given source RPMs
    ///
    /// One batched query for the whole set, `match=closest`.
    async fn find_packages(&self, source_rpm_names: &[String]) -> Result<Vec<OracleResponse>>;
}

/// HTTP implementation of [`AffinityOracle`]
pub struct HttpAffinityOracle {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpAffinityOracle {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(ORACLE_TIMEOUT)
            .build()
            .map_err(|e| Error::OracleError(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<Vec<OracleResponse>> {
        let url = format!("{}/{}", self.endpoint, path);
        debug!("Oracle query: {}", url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::OracleError(format!("POST {url}: {e}")))?;

        // An oracle that knows nothing about the query is not an error
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(Error::OracleError(format!(
                "HTTP {} from {url}",
                response.status()
            )));
        }

        response
            .json::<Vec<OracleResponse>>()
            .await
            .map_err(|e| Error::OracleError(format!("Invalid response from {url}: {e}")))
    }
}

#[async_trait]
impl AffinityOracle for HttpAffinityOracle {
    async fn find_module(
        &self,
        name: &str,
        stream: &str,
        arches: &[String],
    ) -> Result<Vec<OracleResponse>> {
        self.post(
            "api/v1/module",
            json!({
                "name": name,
                "version": stream,
                "architecture": arches,
                "is_module": true,
            }),
        )
        .await
    }

    async fn find_packages(&self, source_rpm_names: &[String]) -> Result<Vec<OracleResponse>> {
        self.post(
            "api/v1/packages",
            json!({
                "source_rpm_names": source_rpm_names,
                "match": "closest",
            }),
        )
        .await
    }
}
