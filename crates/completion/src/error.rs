//! Completion error types

use thiserror::Error;

use crate::classify::ErrorClass;

/// Completion call errors
#[derive(Debug, Error)]
pub enum Error {
    /// The remote answered with a non-success status.
    #[error("api error (status {status}): {message}")]
    Api {
        status: u16,
        message: String,
        class: ErrorClass,
    },

    /// The request never produced a response (connect, timeout, transport).
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A 2xx response whose body did not look like a completion.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl Error {
    /// How the retry state machine should treat this failure.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Api { class, .. } => *class,
            Error::Http(_) => ErrorClass::Transient,
            Error::Malformed(_) => ErrorClass::Unknown,
        }
    }
}

/// Result alias for completion operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_display_includes_status_and_message() {
        let err = Error::Api {
            status: 429,
            message: "Rate limit reached".into(),
            class: ErrorClass::RateLimited,
        };
        assert_eq!(
            err.to_string(),
            "api error (status 429): Rate limit reached"
        );
        assert_eq!(err.class(), ErrorClass::RateLimited);
    }

    #[test]
    fn malformed_is_classified_unknown() {
        let err = Error::Malformed("no choices in response".into());
        assert_eq!(err.class(), ErrorClass::Unknown);
        assert!(err.to_string().contains("no choices"));
    }
}
