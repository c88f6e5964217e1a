use thiserror::Error;

use haruki_shared::CodecError;

/// Failures of outbound game / sekai-API calls.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("sekai API error: {method} {endpoint} returned status {status}")]
    Api {
        endpoint: String,
        method: String,
        status: u16,
    },

    #[error("sekai auth error at {step}: {message}")]
    Auth { step: &'static str, message: String },

    /// The mysekai module is under maintenance. Not a user-facing failure.
    #[error("feature is under maintenance")]
    Maintenance,

    #[error("client in error state: {0}")]
    ErrorState(String),

    #[error("data retrieval failed: {0}")]
    DataRetrieval(String),

    #[error("unsupported server: {0}")]
    UnsupportedServer(String),

    #[error("invalid client configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
