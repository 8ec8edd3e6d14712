// src/db/models/mod.rs

//! Data models for release bookkeeping entities
//!
//! Rust structs corresponding to database tables, with methods for
//! creating, reading and updating records.

mod release;

pub use release::{Release, ReleaseBuild, ReleaseStatus};
