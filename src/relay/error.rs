//! Error taxonomy of the relay core

use thiserror::Error;

/// Errors surfaced by the relay core.
///
/// None of these are fatal to the process: callers log them and recover locally
/// (retry activation, queue, or drop the offending message).
#[derive(Debug, Error)]
pub enum RelayError {
    /// The permission/availability gate has not been granted yet
    #[error("bluetooth permission not granted")]
    PermissionDenied,

    /// A send was attempted while no session is connected
    #[error("no connected session")]
    NotConnected,

    /// I/O failure on the channel; the session has been closed
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Inbound bytes could not be framed
    #[error("decode error: {0}")]
    Decode(String),

    /// Outbound payload could not be serialized
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Outbound payload does not fit in one frame
    #[error("payload of {len} bytes exceeds frame limit of {limit} bytes")]
    FrameTooLarge { len: usize, limit: usize },

    /// A reply could not be delivered to its notification action
    #[error("reply action for {key} could not be resolved: {reason}")]
    ActionResolution { key: String, reason: String },
}

impl RelayError {
    /// Whether the session that produced this error is gone
    pub fn closes_session(&self) -> bool {
        matches!(self, RelayError::Transport(_) | RelayError::Decode(_))
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
