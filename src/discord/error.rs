use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::http::StatusCode;

use super::payload::Opcode;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("bootstrap request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid gateway url: {0}")]
    Url(#[from] url::ParseError),

    #[error("websocket connect failed: {0}")]
    Connect(#[source] tungstenite::Error),

    #[error("websocket upgrade rejected with status {0}")]
    UpgradeRejected(StatusCode),

    #[error("handshake violation: expected {expected}, received {received}")]
    HandshakeViolation {
        expected: &'static str,
        received: String,
    },

    #[error("timed out waiting for {0}")]
    HandshakeTimeout(&'static str),

    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("malformed frame: {0}")]
    Decode(#[from] DecodeError),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("connection closed (code {code:?}): {reason}")]
    Closed { code: Option<u16>, reason: Box<str> },

    #[error("no heartbeat acknowledgement within {0:?}")]
    LivenessTimeout(Duration),

    #[error("gave up after {0} reconnect attempts")]
    RetriesExhausted(u32),

    #[error("no session to resume")]
    NotResumable,

    #[error("connection writer has shut down")]
    SendClosed,

    #[error("gateway client is already connected")]
    AlreadyConnected,

    #[error("gateway client was stopped")]
    Stopped,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("dispatch frame has no event name")]
    MissingEventName,

    #[error("{0} frame carries an event name")]
    UnexpectedEventName(Opcode),

    #[error("malformed {kind} body: {source}")]
    Body {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("binary frames are not supported")]
    Binary,
}
