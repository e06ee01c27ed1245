//! Network error classification.

use std::time::Duration;

/// Classified failure of a host or backend call.
///
/// Consumers branch on these variants to decide between requeue, delay,
/// terminal failure, and session suspension.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The request was aborted through its cancellation token. Not an
    /// error; callers requeue the work silently.
    #[error("request cancelled")]
    Cancelled,

    /// The host or backend could not be reached at all.
    #[error("no connectivity: {0}")]
    Connectivity(String),

    /// 429 with the host-specified delay.
    #[error("rate limited, retry in {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Server-side failure (5xx).
    #[error("server error (status {status})")]
    Server { status: u16 },

    /// The addressed resource no longer exists.
    #[error("resource gone (status {status})")]
    Gone { status: u16 },

    /// Permanent rejection; surfaced to the user, never retried silently.
    #[error("rejected (status {status}): {message}")]
    Validation { status: u16, message: String },

    /// The call succeeded but the response body was not what we expect.
    #[error("malformed response: {0}")]
    Decode(String),

    /// No upload webhook is configured for the session.
    #[error("no webhook available")]
    NoWebhook,
}

impl HostError {
    /// Maps a non-2xx status onto the error taxonomy.
    pub(crate) fn from_status(status: u16, retry_after: Option<Duration>, message: String) -> Self {
        match status {
            429 => HostError::RateLimited {
                retry_after: retry_after.unwrap_or(Duration::ZERO),
            },
            404 | 410 => HostError::Gone { status },
            s if s >= 500 => HostError::Server { status: s },
            s => HostError::Validation { status: s, message },
        }
    }
}

impl From<reqwest::Error> for HostError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            HostError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            HostError::from_status(status.as_u16(), None, err.to_string())
        } else {
            // Connect failures, timeouts, dropped sockets: the transport
            // never reached a response.
            HostError::Connectivity(err.to_string())
        }
    }
}
