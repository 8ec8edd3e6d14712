// src/error.rs

//! Error types for the release planning and reconciliation engine

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by planning, presence checking and release execution
#[derive(Error, Debug)]
pub enum Error {
    /// A plan with no packages and no repositories cannot be executed
    #[error("Release plan is empty: nothing to release")]
    EmptyReleasePlan,

    /// Internal inconsistency detected while resolving plan content
    #[error("Release logic error: {0}")]
    ReleaseLogicError(String),

    /// A production repository declared by the platform could not be resolved
    #[error("Repository '{0}' is not known to the repository manager")]
    MissingRepository(String),

    /// Module metadata document could not be parsed at all
    #[error("Malformed module document: {0}")]
    MalformedModuleDocument(String),

    /// Module metadata parsed but contained no usable stream
    #[error("No module stream found in document")]
    NoModuleStreamFound,

    /// Oracle repository name did not match the canonical rewrite pattern
    #[error("Cannot rewrite repository name '{0}': no canonical suffix found")]
    RepoNameRewrite(String),

    /// A content query exceeded the remote per-request name limit
    #[error("Package query batch of {0} names exceeds the limit of {1}")]
    BatchLimitExceeded(usize, usize),

    /// Transport-level failure talking to the repository manager
    #[error("Repository manager unavailable: {0}")]
    RepositoryUnavailable(String),

    /// A repository manager task polled to a failed terminal state
    #[error("Repository manager task failed: {0}")]
    RepositoryTaskFailed(String),

    /// A referenced build failed external signature verification
    #[error("Signature verification failed for build {build_id}: {reason}")]
    SignatureError { build_id: i64, reason: String },

    /// Release status does not allow the requested operation
    #[error("Release {id} is '{status}', cannot {operation}")]
    InvalidStatusTransition {
        id: i64,
        status: String,
        operation: String,
    },

    /// Release row not found
    #[error("Release {0} not found")]
    ReleaseNotFound(i64),

    /// Build unknown to the build scheduler
    #[error("Build {0} not found")]
    BuildNotFound(i64),

    /// Affinity oracle query failed
    #[error("Package affinity oracle error: {0}")]
    OracleError(String),

    /// Invalid version, artifact name or configuration value
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Configuration file error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Database error
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    /// Plan or payload (de)serialization error
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the lifecycle state machine records this error as a release
    /// failure rather than letting it propagate.
    ///
    /// Exactly the validation + signature + missing-repository categories;
    /// transport faults and failed remote tasks propagate and leave the
    /// release `InProgress` for operator inspection.
    pub fn is_release_failure(&self) -> bool {
        matches!(
            self,
            Error::EmptyReleasePlan
                | Error::ReleaseLogicError(_)
                | Error::MissingRepository(_)
                | Error::MalformedModuleDocument(_)
                | Error::NoModuleStreamFound
                | Error::SignatureError { .. }
        )
    }
}
