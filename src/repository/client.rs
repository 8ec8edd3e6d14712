// src/repository/client.rs

//! Async HTTP client for the repository manager
//!
//! Wraps reqwest with the small capability set the engine needs: repository
//! CRUD, paginated content listing, modify/publish as polled tasks, and
//! module metadata access. Transport failures map to `RepositoryUnavailable`;
//! a task that reaches a failed terminal state maps to `RepositoryTaskFailed`.

use crate::error::{Error, Result};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::{PackageFilter, PackageRecord, TaskRef};

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay between task status polls
const TASK_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Page size for content listing requests
const PAGE_LIMIT: usize = 100;

/// A repository as known to the repository manager
#[derive(Debug, Clone, Deserialize)]
pub struct RepoRecord {
    #[serde(rename = "pulp_href")]
    pub href: String,
    pub name: String,
    #[serde(default)]
    pub latest_version_href: String,
}

/// Capability set consumed from the external repository manager
///
/// All operations suspend on network I/O. `modify_repository` has
/// content-set semantics: adding present content or removing absent content
/// is a no-op, which is what makes blind re-execution of a release safe.
#[async_trait]
pub trait RepositoryApi: Send + Sync {
    /// Look up a repository by its manager-side name
    async fn get_repository(&self, name: &str) -> Result<Option<RepoRecord>>;

    /// Look up a repository, creating it when absent
    async fn get_or_create_repository(&self, name: &str) -> Result<RepoRecord>;

    /// List packages of a repository version matching the filter
    ///
    /// Pagination is handled internally; the filter's name list must respect
    /// [`super::QUERY_BATCH_LIMIT`].
    async fn list_packages(
        &self,
        version_href: &str,
        filter: &PackageFilter,
    ) -> Result<Vec<PackageRecord>>;

    /// Add and remove content units; returns the manager task to await
    async fn modify_repository(
        &self,
        repo_href: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<TaskRef>;

    /// Materialize a new published version of the repository
    async fn publish(&self, repo_href: &str) -> Result<TaskRef>;

    /// Poll a task to its terminal state
    async fn wait_task(&self, task: &TaskRef) -> Result<()>;

    /// Fetch the current module metadata document of a published repository
    ///
    /// Resolves `repodata/repomd.xml` to the modules entry; `None` when the
    /// repository advertises no module metadata.
    async fn get_module_document(&self, repo_url: &str) -> Result<Option<String>>;

    /// Create a module content unit from a rendered document
    ///
    /// Returns the content href and the document checksum.
    async fn create_module(
        &self,
        document: &str,
        name: &str,
        stream: &str,
        context: &str,
        arch: &str,
    ) -> Result<(String, String)>;
}

/// HTTP implementation of [`RepositoryApi`]
pub struct HttpRepositoryClient {
    client: reqwest::Client,
    /// API root, e.g. `http://pulp.internal:24817/pulp/api/v3`
    endpoint: Url,
    token: Option<String>,
}

impl HttpRepositoryClient {
    /// Create a client against the given API root
    pub fn new(endpoint: &str, token: Option<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(if timeout_secs > 0 {
                Duration::from_secs(timeout_secs)
            } else {
                HTTP_TIMEOUT
            })
            .build()
            .map_err(|e| {
                Error::RepositoryUnavailable(format!("Failed to create HTTP client: {e}"))
            })?;

        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::ConfigError(format!("Invalid repository endpoint: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            token,
        })
    }

    /// Resolve a server-relative href against the endpoint origin
    fn absolute(&self, href: &str) -> Result<Url> {
        self.endpoint
            .join(href)
            .map_err(|e| Error::RepositoryUnavailable(format!("Invalid href '{href}': {e}")))
    }

    /// API route under the endpoint root
    fn api(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint.as_str().trim_end_matches('/'), path)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|e| Error::RepositoryUnavailable(format!("GET {url}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::RepositoryUnavailable(format!(
                "HTTP {} from {url}",
                response.status()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::RepositoryUnavailable(format!("Invalid response from {url}: {e}")))
    }

    async fn post_json<T: DeserializeOwned>(&self, url: &str, body: serde_json::Value) -> Result<T> {
        let response = self
            .request(reqwest::Method::POST, url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::RepositoryUnavailable(format!("POST {url}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::RepositoryUnavailable(format!(
                "HTTP {} from {url}",
                response.status()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::RepositoryUnavailable(format!("Invalid response from {url}: {e}")))
    }

    async fn get_text(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let response = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|e| Error::RepositoryUnavailable(format!("GET {url}: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::RepositoryUnavailable(format!(
                "HTTP {} from {url}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::RepositoryUnavailable(format!("Reading {url}: {e}")))?;
        Ok(Some(bytes.to_vec()))
    }
}

/// Paginated listing envelope
#[derive(Debug, Deserialize)]
struct Paginated<T> {
    #[allow(dead_code)]
    count: u64,
    next: Option<String>,
    results: Vec<T>,
}

/// Task creation response
#[derive(Debug, Deserialize)]
struct SpawnedTask {
    task: String,
}

/// Task status response
#[derive(Debug, Deserialize)]
struct TaskStatus {
    state: String,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Created content response
#[derive(Debug, Deserialize)]
struct CreatedContent {
    pulp_href: String,
}

#[async_trait]
impl RepositoryApi for HttpRepositoryClient {
    async fn get_repository(&self, name: &str) -> Result<Option<RepoRecord>> {
        let url = self.api(&format!("repositories/rpm/rpm/?name={name}"));
        let page: Paginated<RepoRecord> = self.get_json(&url).await?;
        Ok(page.results.into_iter().next())
    }

    async fn get_or_create_repository(&self, name: &str) -> Result<RepoRecord> {
        if let Some(repo) = self.get_repository(name).await? {
            return Ok(repo);
        }
        info!("Creating repository '{}'", name);
        let url = self.api("repositories/rpm/rpm/");
        let repo: RepoRecord = self.post_json(&url, json!({ "name": name })).await?;
        Ok(repo)
    }

    async fn list_packages(
        &self,
        version_href: &str,
        filter: &PackageFilter,
    ) -> Result<Vec<PackageRecord>> {
        filter.validate()?;

        let mut url = self.api(&format!("content/rpm/packages/?limit={PAGE_LIMIT}"));
        let push = |url: &mut String, key: &str, value: &str| {
            url.push('&');
            url.push_str(key);
            url.push('=');
            url.push_str(value);
        };
        push(&mut url, "repository_version", version_href);
        if !filter.names.is_empty() {
            push(&mut url, "name__in", &filter.names.join(","));
        }
        if !filter.epochs.is_empty() {
            push(&mut url, "epoch__in", &filter.epochs.join(","));
        }
        if !filter.versions.is_empty() {
            push(&mut url, "version__in", &filter.versions.join(","));
        }
        if !filter.releases.is_empty() {
            push(&mut url, "release__in", &filter.releases.join(","));
        }
        if let Some(arch) = &filter.arch {
            push(&mut url, "arch", arch);
        }
        if !filter.fields.is_empty() {
            push(&mut url, "fields", &filter.fields.join(","));
        }

        let mut records = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next {
            debug!("Listing packages: {}", url);
            let page: Paginated<PackageRecord> = self.get_json(&url).await?;
            records.extend(page.results);
            next = page.next;
        }
        Ok(records)
    }

    async fn modify_repository(
        &self,
        repo_href: &str,
        add: &[String],
        remove: &[String],
    ) -> Result<TaskRef> {
        let url = self.absolute(&format!("{}modify/", repo_href))?;
        debug!(
            "Modifying {}: +{} -{} content units",
            repo_href,
            add.len(),
            remove.len()
        );
        let spawned: SpawnedTask = self
            .post_json(
                url.as_str(),
                json!({
                    "add_content_units": add,
                    "remove_content_units": remove,
                }),
            )
            .await?;
        Ok(TaskRef { href: spawned.task })
    }

    async fn publish(&self, repo_href: &str) -> Result<TaskRef> {
        let url = self.api("publications/rpm/rpm/");
        debug!("Publishing {}", repo_href);
        let spawned: SpawnedTask = self
            .post_json(&url, json!({ "repository": repo_href }))
            .await?;
        Ok(TaskRef { href: spawned.task })
    }

    async fn wait_task(&self, task: &TaskRef) -> Result<()> {
        let url = self.absolute(&task.href)?;
        loop {
            let status: TaskStatus = self.get_json(url.as_str()).await?;
            match status.state.as_str() {
                "completed" => return Ok(()),
                "failed" | "canceled" => {
                    let details = status
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| status.state.clone());
                    warn!("Task {} reached state '{}'", task.href, status.state);
                    return Err(Error::RepositoryTaskFailed(details));
                }
                other => {
                    debug!("Task {} is '{}', polling again", task.href, other);
                    tokio::time::sleep(TASK_POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn get_module_document(&self, repo_url: &str) -> Result<Option<String>> {
        let base = repo_url.trim_end_matches('/');
        let repomd_url = format!("{base}/repodata/repomd.xml");
        let Some(repomd) = self.get_text(&repomd_url).await? else {
            return Ok(None);
        };
        let repomd = String::from_utf8_lossy(&repomd).into_owned();

        let Some(path) = modules_location(&repomd)? else {
            return Ok(None);
        };

        let Some(raw) = self.get_text(&format!("{base}/{path}")).await? else {
            return Ok(None);
        };

        let text = if path.ends_with(".gz") {
            let mut decoder = GzDecoder::new(raw.as_slice());
            let mut out = String::new();
            decoder.read_to_string(&mut out).map_err(|e| {
                Error::RepositoryUnavailable(format!("Decompressing {path}: {e}"))
            })?;
            out
        } else {
            String::from_utf8_lossy(&raw).into_owned()
        };
        Ok(Some(text))
    }

    async fn create_module(
        &self,
        document: &str,
        name: &str,
        stream: &str,
        context: &str,
        arch: &str,
    ) -> Result<(String, String)> {
        let checksum = hex::encode(Sha256::digest(document.as_bytes()));
        let url = self.api("content/rpm/modulemds/");
        let created: CreatedContent = self
            .post_json(
                &url,
                json!({
                    "snippet": document,
                    "name": name,
                    "stream": stream,
                    "context": context,
                    "arch": arch,
                }),
            )
            .await?;
        Ok((created.pulp_href, checksum))
    }
}

/// Extract the modules metadata location from a repomd.xml document
fn modules_location(repomd: &str) -> Result<Option<String>> {
    let mut reader = Reader::from_str(repomd);
    let mut in_modules = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"data" => {
                    in_modules = e
                        .try_get_attribute("type")
                        .ok()
                        .flatten()
                        .map(|a| a.value.as_ref() == b"modules")
                        .unwrap_or(false);
                }
                b"location" if in_modules => {
                    if let Ok(Some(href)) = e.try_get_attribute("href") {
                        let href = String::from_utf8_lossy(href.value.as_ref()).into_owned();
                        return Ok(Some(href));
                    }
                }
                _ => {}
            },
            Ok(Event::End(e)) if e.name().as_ref() == b"data" => in_modules = false,
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::ParseError(format!("Invalid repomd.xml: {e}")));
            }
            _ => {}
        }
    }
    Ok(None)
}
