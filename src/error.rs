use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A profile operation was attempted while nobody is signed in.
    #[error("No authenticated user")]
    NoAuthenticatedUser,
    #[error("{operation} failed: {detail}")]
    Backend {
        operation: &'static str,
        detail: String,
    },
    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("Profile unavailable")]
    ProfileUnavailable,
    #[error("Invalid nickname: {0:?}")]
    InvalidNickname(String),
    #[error("Invalid email address: {0:?}")]
    InvalidEmail(String),
    #[error("Invalid one-time code")]
    InvalidOtpCode,
    #[error("Invalid provider name: {0:?}")]
    InvalidProvider(String),
    #[error("Score rejected: {0}")]
    InvalidScore(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn backend(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Backend {
            operation,
            detail: err.to_string(),
        }
    }
}
