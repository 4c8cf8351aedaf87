//! Error types for quiver.

use thiserror::Error;

use crate::data::WireResponse;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Unified error type for request processing.
///
/// Timeouts, auth failures and redirects are transient: the network
/// dispatcher offers them to the request's retry policy before they become
/// terminal. Everything else is terminal on first occurrence.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport did not produce a response within the per-attempt
    /// timeout.
    #[error("request timed out")]
    Timeout,

    /// The server rejected the request with 401 or 403.
    #[error("authentication failure (status {})", .response.status)]
    AuthFailure { response: WireResponse },

    /// A 3xx response, carrying the new location if the server sent one.
    #[error("redirected to {location:?}")]
    Redirect { location: Option<String> },

    /// A non-2xx response with a body.
    #[error("server error (status {})", .response.status)]
    Server { response: WireResponse },

    /// The request could not be executed at all: connection refused, DNS
    /// failure, broken stream. No response body exists.
    #[error("network error: {0}")]
    Network(String),

    /// The response body could not be decoded into the requested type.
    /// Never retried.
    #[error("parse error: {0}")]
    Parse(String),
}

impl Error {
    /// Whether the retry policy should be consulted before this error
    /// becomes terminal.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Timeout | Error::AuthFailure { .. } | Error::Redirect { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::Timeout.is_transient());
        assert!(Error::Redirect { location: None }.is_transient());
        assert!(!Error::Network("refused".into()).is_transient());
        assert!(!Error::Parse("bad json".into()).is_transient());
    }
}
