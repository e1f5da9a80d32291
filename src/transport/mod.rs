//! The bidirectional channel to the remote conversational endpoint.
//!
//! The controller only sees the domain types here: [`ClientMessage`] going
//! out, [`ServerContent`] (wrapped in a `SessionEvent`) coming in, and a
//! [`TransportLink`] handle for the open channel.

pub mod gemini;
pub mod protocol;

use crate::codec::MediaBlob;
use crate::error::SessionError;

pub use gemini::{GeminiConnector, GeminiLink};

/// Outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// One encoded capture frame.
    Media(MediaBlob),
    /// A text directive, e.g. the opening greeting instruction.
    Text(String),
}

/// The parts of one inbound server message the session acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerContent {
    pub input_transcription: Option<String>,
    pub output_transcription: Option<String>,
    pub turn_complete: bool,
    /// Base64 PCM response audio.
    pub audio: Option<String>,
    pub interrupted: bool,
}

/// What the remote session is opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetup {
    pub model: String,
    pub voice_name: String,
    pub system_instruction: String,
    pub transcribe_input: bool,
    pub transcribe_output: bool,
}

/// An open (or opening) channel owned by one session.
pub trait TransportLink {
    /// Queue a message. Never waits for the remote side.
    fn send(&mut self, message: ClientMessage) -> Result<(), SessionError>;

    /// Close the channel. Idempotent.
    fn close(&mut self);
}
