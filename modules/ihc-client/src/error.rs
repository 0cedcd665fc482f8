use thiserror::Error;

pub type Result<T> = std::result::Result<T, IhcError>;

/// Why a `compute_ihc` call produced no usable answer.
#[derive(Debug, Error)]
pub enum IhcError {
    #[error("Scorer did not answer within the request timeout")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Scorer returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Could not decode scorer response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unexpected response shape: {0}")]
    Protocol(String),
}

impl IhcError {
    /// HTTP status of the failed call, when the scorer answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            IhcError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for IhcError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            IhcError::Timeout
        } else {
            IhcError::Network(err.to_string())
        }
    }
}
