use shared::error::ApiRejection;
use thiserror::Error;

/// Failure delivering one command to the backend command API.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Rejected(#[from] ApiRejection),
    #[error("request transport failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Failure establishing the server-push event stream.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("server url must start with http:// or https://")]
    UnsupportedScheme,
    #[error("invalid stream url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("websocket connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
}
