//! Fetch error taxonomy.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while fetching upstream records.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("transport error requesting {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("upstream rejected {what}: error code {error_code} ({})", .message.as_deref().unwrap_or("no message"))]
    UpstreamRejected {
        what: String,
        error_code: i64,
        message: Option<String>,
    },

    #[error("malformed payload for {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{what} timed out after {timeout:?}")]
    Timeout { what: String, timeout: Duration },

    #[error("{what} cancelled")]
    Cancelled { what: String },
}

impl SourceError {
    /// Cancellation is expected during shutdown and is not worth an error log.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SourceError::Cancelled { .. })
    }
}
