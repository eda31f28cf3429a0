//! Patient identifiers and the pattern that validates them.
//!
//! Rejecting malformed patient ids is a core contract: every id extracted
//! from user input or analyzer output passes through [`PatientIdPattern`]
//! before it can touch the registry or a history path. Ids read back from
//! persisted documents were validated on the way in and deserialize
//! directly.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::PatientIdError;

/// Default patient id pattern, overridable via configuration.
pub const DEFAULT_PATIENT_ID_PATTERN: &str = "^patient_[0-9]+$";

// ─────────────────────────────────────────────────────────────────────────────
// PatientId
// ─────────────────────────────────────────────────────────────────────────────

/// A validated patient identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientId(String);

impl PatientId {
    /// Wrap a string that is already known to match the configured pattern
    /// (registry documents, history paths written by this process).
    #[must_use]
    pub fn from_trusted(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::ops::Deref for PatientId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for PatientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PatientIdPattern
// ─────────────────────────────────────────────────────────────────────────────

/// Compiled patient id pattern.
#[derive(Clone, Debug)]
pub struct PatientIdPattern {
    regex: Regex,
}

impl PatientIdPattern {
    /// Compile a pattern from its source string.
    pub fn new(pattern: &str) -> Result<Self, PatientIdError> {
        let regex = Regex::new(pattern).map_err(|e| PatientIdError::BadPattern {
            pattern: pattern.to_owned(),
            message: e.to_string(),
        })?;
        Ok(Self { regex })
    }

    /// The pattern source, for user-facing guidance messages.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Whether a candidate matches the pattern.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }

    /// Validate a candidate and produce a [`PatientId`].
    pub fn parse(&self, candidate: &str) -> Result<PatientId, PatientIdError> {
        if self.matches(candidate) {
            Ok(PatientId::from_trusted(candidate))
        } else {
            Err(PatientIdError::Malformed {
                candidate: candidate.to_owned(),
                pattern: self.regex.as_str().to_owned(),
            })
        }
    }
}

impl Default for PatientIdPattern {
    fn default() -> Self {
        Self::new(DEFAULT_PATIENT_ID_PATTERN).expect("default pattern must compile")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
