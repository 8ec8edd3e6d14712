// src/affinity/mod.rs

//! Package affinity: where should a built package land?
//!
//! An external oracle predicts, per package, which production repositories
//! historically carry it. Responses are cached per planning run; the matcher
//! resolves each candidate package against that cache with a deterministic
//! fallback chain.

mod cache;
mod matcher;
mod oracle;

pub use cache::{AffinityCache, AffinityKey};
pub use matcher::{resolve_targets, rewrite_repo_name, MatchKey};
pub use oracle::{
    AffinityOracle, HttpAffinityOracle, OracleDistribution, OracleRepository, OracleResponse,
    PredictedPackage,
};
