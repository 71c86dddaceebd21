//! Error handling module for the proxy server

use thiserror::Error;

/// Custom error type for the proxy server
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Upstream connection to {target} failed: {source}")]
    UpstreamConnection {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Upstream connection to {0} timed out")]
    ConnectTimeout(String),

    #[error("Stream ended before {0}")]
    PrematureEof(String),

    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),
}

/// Result type for the proxy server
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Requests the proxy refuses to interpret. These are dropped without a response.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Error::MalformedRequest(_) | Error::UrlParse(_) | Error::LimitExceeded(_)
        )
    }

    /// DNS, refused and timed-out outbound connections.
    pub fn is_upstream_failure(&self) -> bool {
        matches!(
            self,
            Error::UpstreamConnection { .. } | Error::ConnectTimeout(_)
        )
    }
}
