//! Client-side error type.

use common::protocol::ErrorResponse;
use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server could not be reached or the response could not be read.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with an error envelope.
    #[error("{} ({status} {})", body.message, body.code)]
    Api { status: u16, body: ErrorResponse },

    /// No usable session: the caller must sign in again.
    #[error("login required")]
    LoginRequired,

    /// Local state could not be read or written.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("serialisation error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Rejected locally before any request was made.
    #[error("{0}")]
    Invalid(String),
}

impl ClientError {
    /// Machine-readable code of an API error, if this is one.
    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Api { body, .. } => Some(body.code.as_str()),
            _ => None,
        }
    }
}
