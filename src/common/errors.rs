use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Every failure the voice transport can surface.
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("frame time {0:?} must be 2.5ms, 5ms, 10ms, or 20ms")]
    InvalidFrameDuration(Duration),

    #[error("invalid opus parameters: {0}")]
    InvalidParams(String),

    #[error("no supported encryption mode")]
    NoSupportedMode,

    #[error("timed out discovering address")]
    DiscoveryTimeout,

    #[error("malformed discovery response: {0}")]
    MalformedDiscovery(String),

    #[error("voice gateway: {0}")]
    Gateway(String),

    #[error("voice websocket: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("voice gateway payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("packet encryption failed")]
    Encryption,

    #[error("opus: {0}")]
    Opus(String),

    #[error("decoder: {0}")]
    Decoder(String),

    #[error("secret key was not received within {0:?}")]
    MissingKey(Duration),

    #[error("voice connection is closed")]
    Closed,

    #[error("cancelled")]
    Cancelled,

    #[error("session layer: {0}")]
    SessionLayer(String),

    #[error("play queue overflowed")]
    QueueFull,
}

impl VoiceError {
    /// Caller-initiated cancellation is never reported as a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Errors caused by a malformed inbound message rather than a broken session.
    pub fn is_payload_error(&self) -> bool {
        matches!(self, Self::Json(_))
    }
}

pub type VoiceResult<T> = Result<T, VoiceError>;
