use thiserror::Error;

pub type Result<T, E = BrokerError> = std::result::Result<T, E>;

/// Failures surfaced by the API-client runtime and the operation catalog.
///
/// Only a single 401/403 on a resource call is recovered locally (by the
/// executor refreshing its token); everything else reaches the caller with
/// enough context to diagnose it.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("token request rejected with status {status}: {body}")]
    Auth { status: u16, body: String },

    #[error("{method} {url} failed with {status} {status_text}: {body}")]
    Api {
        method: String,
        url: String,
        status: u16,
        status_text: String,
        body: String,
    },

    #[error("polling {url} failed with status {status}: {body}")]
    Poll { url: String, status: u16, body: String },

    #[error("polling {url} gave up after {attempts} attempts")]
    PollTimeout { url: String, attempts: u32 },

    #[error("polling {url} was cancelled")]
    PollCancelled { url: String },

    #[error("no population flagged as default in environment {environment_id}")]
    PopulationNotFound { environment_id: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl BrokerError {
    /// HTTP status carried by the error, when it came from a remote call.
    pub fn status(&self) -> Option<u16> {
        match self {
            BrokerError::Auth { status, .. }
            | BrokerError::Api { status, .. }
            | BrokerError::Poll { status, .. } => Some(*status),
            _ => None,
        }
    }
}
