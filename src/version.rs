// src/version.rs

//! Debian-style package version parsing and formatting
//!
//! Versions have the shape `[epoch:]upstream[-revision]`. Only parsing and
//! rendering are implemented here; the Debian comparison algorithm is out
//! of scope, so [`Version`] deliberately implements no ordering.

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("invalid epoch in version '{0}'")]
    InvalidEpoch(String),

    #[error("invalid characters in upstream version '{0}'")]
    InvalidUpstream(String),

    #[error("invalid characters in revision '{0}'")]
    InvalidRevision(String),
}

/// A parsed package version with epoch, upstream version, and revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub epoch: u64,
    pub upstream: String,
    pub revision: String,
}

/// Characters permitted in the upstream and revision components.
fn valid_component(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '~' | '-'))
}

impl Version {
    /// Build a version from its components, checking the character class.
    pub fn new(upstream: &str, revision: &str, epoch: u64) -> Result<Self, VersionError> {
        if !valid_component(upstream) {
            return Err(VersionError::InvalidUpstream(upstream.to_string()));
        }
        if !valid_component(revision) {
            return Err(VersionError::InvalidRevision(revision.to_string()));
        }

        Ok(Self {
            epoch,
            upstream: upstream.to_string(),
            revision: revision.to_string(),
        })
    }

    /// Parse a version string.
    ///
    /// The epoch ends at the first `:` (absent means 0); the revision
    /// starts after the first `-` in the remainder (absent means `"0"`).
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let (epoch, rest) = match s.find(':') {
            Some(colon) => {
                let epoch = s[..colon]
                    .parse::<u64>()
                    .map_err(|_| VersionError::InvalidEpoch(s.to_string()))?;
                (epoch, &s[colon + 1..])
            }
            None => (0, s),
        };

        let (upstream, revision) = match rest.find('-') {
            Some(dash) => (&rest[..dash], &rest[dash + 1..]),
            None => (rest, "0"),
        };

        Version::new(upstream, revision, epoch)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.upstream)?;

        // An implicit "0" revision is omitted unless the upstream part
        // itself contains a dash, which would make reparsing ambiguous.
        if self.revision != "0" || self.upstream.contains('-') {
            write!(f, "-{}", self.revision)?;
        }

        Ok(())
    }
}
