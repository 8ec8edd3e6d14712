// src/nevra.rs

//! NEVRA package identity and artifact file name parsing
//!
//! NEVRA (name-epoch:version-release.architecture) is the canonical identity
//! tuple for an RPM package. Architecture and debug-ness are always derived
//! from the artifact file name, never passed explicitly by build reports.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Debuginfo / debugsource package name pattern
fn debug_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-debug(info|source)(-|$)").unwrap())
}

/// Canonical identity of an RPM package
///
/// Two values are equal iff all five fields match exactly; the epoch is kept
/// as a normalized string ("0" when absent) so hashing stays stable across
/// sources that report it as int, string or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nevra {
    pub name: String,
    pub epoch: String,
    pub version: String,
    pub release: String,
    pub arch: String,
}

impl Nevra {
    pub fn new(name: &str, epoch: &str, version: &str, release: &str, arch: &str) -> Self {
        Self {
            name: name.to_string(),
            epoch: normalize_epoch(epoch),
            version: version.to_string(),
            release: release.to_string(),
            arch: arch.to_string(),
        }
    }

    /// Parse a NEVRA from an RPM artifact file name
    ///
    /// `foo-1.2-3.el8.x86_64.rpm` → name=foo, version=1.2, release=3.el8,
    /// arch=x86_64. The epoch is not encoded in file names and defaults to "0".
    pub fn from_artifact_name(artifact_name: &str) -> Result<Self> {
        let stem = artifact_name.strip_suffix(".rpm").ok_or_else(|| {
            Error::ParseError(format!("'{}' is not an RPM artifact name", artifact_name))
        })?;

        let (rest, arch) = stem.rsplit_once('.').ok_or_else(|| {
            Error::ParseError(format!("No architecture token in '{}'", artifact_name))
        })?;

        let (rest, release) = rest.rsplit_once('-').ok_or_else(|| {
            Error::ParseError(format!("No release component in '{}'", artifact_name))
        })?;

        let (name, version) = rest.rsplit_once('-').ok_or_else(|| {
            Error::ParseError(format!("No version component in '{}'", artifact_name))
        })?;

        if name.is_empty() || version.is_empty() || release.is_empty() || arch.is_empty() {
            return Err(Error::ParseError(format!(
                "Malformed RPM artifact name '{}'",
                artifact_name
            )));
        }

        Ok(Self::new(name, "0", version, release, arch))
    }

    /// Full artifact file name: `name-version-release.arch.rpm`
    pub fn full_name(&self) -> String {
        format!(
            "{}-{}-{}.{}.rpm",
            self.name, self.version, self.release, self.arch
        )
    }

    /// Whether this is a debuginfo or debugsource package
    pub fn is_debuginfo(&self) -> bool {
        debug_re().is_match(&self.name)
    }

    /// Whether this is a source package
    pub fn is_source(&self) -> bool {
        self.arch == "src"
    }
}

impl fmt::Display for Nevra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}:{}-{}.{}",
            self.name, self.epoch, self.version, self.release, self.arch
        )
    }
}

/// Normalize an epoch value to its canonical string form
pub fn normalize_epoch(epoch: &str) -> String {
    let trimmed = epoch.trim();
    if trimmed.is_empty() || trimmed == "(none)" {
        return "0".to_string();
    }
    // Collapse numeric representations ("00" == "0")
    match trimmed.parse::<u64>() {
        Ok(n) => n.to_string(),
        Err(_) => trimmed.to_string(),
    }
}

/// Whether an artifact file name names a debuginfo/debugsource package
pub fn artifact_is_debuginfo(artifact_name: &str) -> bool {
    debug_re().is_match(artifact_name)
}
