// src/version.rs

//! Version handling for RPM-style package versions
//!
//! Parses `[epoch:]version[-release]` strings and orders them with the rpm
//! segment-comparison rules (numeric segments compare numerically, alphabetic
//! segments lexically, numeric beats alphabetic, `~` sorts before anything).
//! The matching engine uses this ordering for its highest-version fallback.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;

/// A parsed RPM version with epoch, version, and release components
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RpmVersion {
    pub epoch: u64,
    pub version: String,
    pub release: Option<String>,
}

impl RpmVersion {
    /// Parse an RPM version string
    ///
    /// Format: [epoch:]version[-release]
    /// Examples:
    /// - "1.2.3" → epoch=0, version="1.2.3", release=None
    /// - "2:1.2.3" → epoch=2, version="1.2.3", release=None
    /// - "1.2.3-4.el8" → epoch=0, version="1.2.3", release=Some("4.el8")
    pub fn parse(s: &str) -> Result<Self> {
        let (epoch_str, rest) = if let Some(colon_pos) = s.find(':') {
            let (e, r) = s.split_at(colon_pos);
            (e, &r[1..])
        } else {
            ("0", s)
        };

        let epoch = if epoch_str.is_empty() {
            0
        } else {
            epoch_str
                .parse::<u64>()
                .map_err(|e| Error::ParseError(format!("Invalid epoch in version '{}': {}", s, e)))?
        };

        let (version, release) = if let Some(dash_pos) = rest.find('-') {
            let (v, r) = rest.split_at(dash_pos);
            (v.to_string(), Some(r[1..].to_string()))
        } else {
            (rest.to_string(), None)
        };

        if version.is_empty() {
            return Err(Error::ParseError(format!(
                "Empty version component in '{}'",
                s
            )));
        }

        Ok(Self {
            epoch,
            version,
            release,
        })
    }
}

impl fmt::Display for RpmVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.version)?;
        if let Some(release) = &self.release {
            write!(f, "-{}", release)?;
        }
        Ok(())
    }
}

impl PartialOrd for RpmVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RpmVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| compare_segments(&self.version, &other.version))
            .then_with(|| match (&self.release, &other.release) {
                (Some(a), Some(b)) => compare_segments(a, b),
                (Some(_), None) | (None, Some(_)) | (None, None) => Ordering::Equal,
            })
    }
}

/// Compare two bare version strings with rpm segment rules
///
/// Convenience wrapper for callers holding plain version strings; strings
/// that fail to parse compare as plain text.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (RpmVersion::parse(a), RpmVersion::parse(b)) {
        (Ok(va), Ok(vb)) => va.cmp(&vb),
        _ => a.cmp(b),
    }
}

/// rpm-style segment comparison of two version fragments
fn compare_segments(a: &str, b: &str) -> Ordering {
    let mut a = a.as_bytes();
    let mut b = b.as_bytes();

    loop {
        // Tilde sorts lower than everything, including the end of string
        let a_tilde = a.first() == Some(&b'~');
        let b_tilde = b.first() == Some(&b'~');
        match (a_tilde, b_tilde) {
            (true, true) => {
                a = &a[1..];
                b = &b[1..];
                continue;
            }
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }

        // Skip separators
        while let Some(c) = a.first() {
            if c.is_ascii_alphanumeric() {
                break;
            }
            a = &a[1..];
        }
        while let Some(c) = b.first() {
            if c.is_ascii_alphanumeric() {
                break;
            }
            b = &b[1..];
        }

        if a.is_empty() || b.is_empty() {
            return a.len().cmp(&b.len());
        }

        let a_numeric = a[0].is_ascii_digit();
        let b_numeric = b[0].is_ascii_digit();

        // A numeric segment is always newer than an alphabetic one
        if a_numeric != b_numeric {
            return if a_numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let split = |s: &[u8], numeric: bool| -> usize {
            s.iter()
                .position(|c| {
                    if numeric {
                        !c.is_ascii_digit()
                    } else {
                        !c.is_ascii_alphabetic()
                    }
                })
                .unwrap_or(s.len())
        };

        let a_len = split(a, a_numeric);
        let b_len = split(b, b_numeric);
        let (a_seg, a_rest) = a.split_at(a_len);
        let (b_seg, b_rest) = b.split_at(b_len);

        let ord = if a_numeric {
            let a_trim = trim_leading_zeros(a_seg);
            let b_trim = trim_leading_zeros(b_seg);
            a_trim
                .len()
                .cmp(&b_trim.len())
                .then_with(|| a_trim.cmp(b_trim))
        } else {
            a_seg.cmp(b_seg)
        };

        if ord != Ordering::Equal {
            return ord;
        }

        a = a_rest;
        b = b_rest;
    }
}

fn trim_leading_zeros(s: &[u8]) -> &[u8] {
    let start = s.iter().position(|&c| c != b'0').unwrap_or(s.len());
    &s[start..]
}
