use reqwest::StatusCode;
use thiserror::Error;

/// Failures talking to the upstream chat-completion API.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Request to chat provider failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Chat provider returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Malformed chunk in completion stream: {0}")]
    MalformedChunk(#[from] serde_json::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    LineTooLong(#[from] LineTooLong),
}

/// Failures from a single image generation or edit call.
///
/// By the time one of these is returned the matching error chunk has already
/// been written to the session, except for `Disconnected`.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Request to image provider failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Image provider returned {status}")]
    Status { status: StatusCode },

    #[error("Malformed image stream event: {0}")]
    MalformedEvent(#[from] serde_json::Error),

    #[error("Image provider reported an error: {0}")]
    Upstream(String),

    #[error(transparent)]
    LineTooLong(#[from] LineTooLong),

    #[error("Image stream ended without image data")]
    MissingImage,

    #[error("Client disconnected")]
    Disconnected,
}

/// An event stream line outgrew the buffer limit without a newline.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Event stream line exceeded {limit} bytes")]
pub struct LineTooLong {
    pub limit: usize,
}

/// The caller dropped the outgoing stream.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Outgoing stream is closed")]
pub struct SinkClosed;

impl From<SinkClosed> for MediaError {
    fn from(_: SinkClosed) -> Self {
        MediaError::Disconnected
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
