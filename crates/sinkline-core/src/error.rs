//! Error types for dispatch rule configuration.
//!
//! Everything in this crate that can fail does so while turning operator
//! configuration into typed rules. These failures are configuration-fatal:
//! they surface at startup and are never retried.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while building dispatch rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Action name does not name one of the fixed actions.
    #[error("unknown action '{name}', expected one of: success, retry, drop, disconnect")]
    UnknownAction {
        /// The rejected action name
        name: String,
    },

    /// Status code outside the range a response can carry.
    #[error("invalid status code {status_code}, expected a value in 100..=599")]
    InvalidStatusCode {
        /// The rejected status code
        status_code: i64,
    },
}

impl CoreError {
    /// Creates an unknown action error.
    pub fn unknown_action(name: impl Into<String>) -> Self {
        Self::UnknownAction { name: name.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_format() {
        let error = CoreError::unknown_action("explode");
        assert_eq!(
            error.to_string(),
            "unknown action 'explode', expected one of: success, retry, drop, disconnect"
        );

        let error = CoreError::InvalidStatusCode { status_code: 42 };
        assert_eq!(error.to_string(), "invalid status code 42, expected a value in 100..=599");
    }
}
