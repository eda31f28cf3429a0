//! Shared validation errors.
//!
//! Each crate in the workspace carries its own domain error type built on
//! [`thiserror`]; the runtime crate folds them into the turn-level error at
//! the user boundary. This module holds only the errors that belong to the
//! core data model itself.

use thiserror::Error;

/// Patient id validation failure.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PatientIdError {
    /// The candidate does not match the configured pattern.
    #[error("patient id '{candidate}' does not match pattern {pattern}")]
    Malformed {
        /// The rejected candidate.
        candidate: String,
        /// Pattern source, quoted back to the user in guidance replies.
        pattern: String,
    },

    /// The configured pattern itself failed to compile.
    #[error("invalid patient id pattern '{pattern}': {message}")]
    BadPattern {
        /// The offending pattern source.
        pattern: String,
        /// Regex compile error.
        message: String,
    },
}

/// Malformed user input or configuration, surfaced with guidance and
/// without any state mutation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A patient id failed validation.
    #[error(transparent)]
    PatientId(#[from] PatientIdError),

    /// A configuration value could not be parsed.
    #[error("invalid configuration value for {key}: {message}")]
    Config {
        /// Configuration key.
        key: String,
        /// What went wrong.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_error_mentions_candidate_and_pattern() {
        let err = PatientIdError::Malformed {
            candidate: "bob".into(),
            pattern: "^patient_[0-9]+$".into(),
        };
        let text = err.to_string();
        assert!(text.contains("bob"));
        assert!(text.contains("^patient_[0-9]+$"));
    }

    #[test]
    fn validation_error_from_patient_id_error() {
        let err: ValidationError = PatientIdError::BadPattern {
            pattern: "(".into(),
            message: "unclosed group".into(),
        }
        .into();
        assert!(err.to_string().contains("unclosed group"));
    }

    #[test]
    fn config_error_display() {
        let err = ValidationError::Config {
            key: "WARD_MAX_TURN_ITERATIONS".into(),
            message: "not a number".into(),
        };
        assert!(err.to_string().contains("WARD_MAX_TURN_ITERATIONS"));
    }
}
