use serde::Deserialize;
use thiserror::Error;

/// Structured error envelope returned by the Tably backend.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

/// Errors surfaced by the SDK's transport layers.
///
/// Auth-flow failures (bad credentials, suspended accounts) never reach
/// consumers as errors; they are recorded in the session snapshot instead.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network-level failure: connect, timeout, TLS, malformed response body.
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with its structured error envelope.
    #[error("api error ({status} {code}): {message}")]
    Api { status: u16, code: String, message: String },

    /// An inbound realtime frame that could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Durable client storage failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The realtime channel has no live connection.
    #[error("realtime channel is not connected")]
    NotConnected,

    /// The realtime channel did not come up within the configured wait.
    #[error("timed out waiting for the realtime channel to connect")]
    ConnectTimeout,
}

impl ClientError {
    /// A definitive rejection by the backend (4xx). Terminal for the attempted
    /// operation; never retried.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, ClientError::Api { status, .. } if (400..500).contains(status))
    }

    /// A backend-side fault (5xx). Surfaced as a generic server error,
    /// distinct from a credential failure.
    pub fn is_server_error(&self) -> bool {
        matches!(self, ClientError::Api { status, .. } if *status >= 500)
    }
}
