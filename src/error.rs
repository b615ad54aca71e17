use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::protocol::MessageType;

/// A frame that could not be turned into a message this client understands.
///
/// Always contained to the frame: it is logged and the frame is dropped.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown message type")]
    UnknownType,

    #[error("unsupported {kind:?} message version {version}")]
    UnsupportedVersion { kind: MessageType, version: u32 },
}

/// Failure to replay one event against the local target.
///
/// Contained to the event: no response is sent for it.
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("invalid base64 body: {0}")]
    Body(#[from] base64::DecodeError),

    #[error("invalid HTTP method: {0}")]
    Method(#[from] http::method::InvalidMethod),

    #[error("local request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unsupported local URL scheme '{0}' (expected http or https)")]
    UnsupportedScheme(String),
}

/// A listener that can't be built from the given options.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("invalid local URL: {0}")]
    LocalUrl(#[from] ForwardError),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// Errors that end a relay connection.
///
/// Only [`RelayError::TokenRejected`] is fatal; everything else is retried
/// by the reconnect loop.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("invalid token or already listening")]
    TokenRejected,

    #[error("failed to connect to relay: {0}")]
    Dial(#[source] tungstenite::Error),

    #[error("timed out connecting to relay")]
    DialTimeout,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("no pong from relay within {0:?}")]
    KeepaliveTimeout(std::time::Duration),

    #[error("write to relay timed out")]
    WriteTimeout,

    #[error("connection closed by relay")]
    Closed,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RelayError {
    /// Whether retrying is known to be futile
    pub fn is_fatal(&self) -> bool {
        matches!(self, RelayError::TokenRejected)
    }
}
