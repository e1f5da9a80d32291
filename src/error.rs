//! Error taxonomy for the live session.
//!
//! Every failure that can reach the session controller is a `SessionError`.
//! The controller converts them into the `Error` connection state plus one
//! user-facing message; nothing propagates past it.

use thiserror::Error;

/// Failures of the pure PCM codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("cannot encode an empty audio frame")]
    EmptyFrame,

    #[error("invalid base64 audio payload: {0}")]
    Base64(String),

    #[error("PCM payload of {len} bytes is not a multiple of {frame_bytes} ({channels} channel(s) x 2 bytes)")]
    Misaligned {
        len: usize,
        channels: u16,
        frame_bytes: usize,
    },

    #[error("channel count must be at least 1")]
    NoChannels,
}

/// Everything that can go wrong while running a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Microphone access denied, or no capture device present at all.
    #[error("microphone access denied: {0}")]
    Permission(String),

    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("failed to open remote session: {0}")]
    TransportOpen(String),

    #[error("malformed audio payload: {0}")]
    Decode(#[from] CodecError),

    /// Mid-session failure reported by the remote channel.
    #[error("remote session failed: {0}")]
    Transport(String),
}

impl SessionError {
    /// The single message shown to the user for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Permission(_) | Self::DeviceUnavailable(_) => "Audio Interface Error.",
            Self::TransportOpen(_) => "Connection failed.",
            Self::Transport(_) => "Sync Interrupted.",
            Self::Decode(_) => "Received unreadable audio.",
        }
    }

    /// Short machine-friendly tag, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Permission(_) => "permission",
            Self::DeviceUnavailable(_) => "device_unavailable",
            Self::TransportOpen(_) => "transport_open",
            Self::Decode(_) => "decode",
            Self::Transport(_) => "transport",
        }
    }
}
