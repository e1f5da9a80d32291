//! Live session: lifecycle state, event plumbing, and the components the
//! controller coordinates.
//!
//! Everything that happens asynchronously (transport traffic, capture frames,
//! playback completions) arrives as a [`SessionEvent`] on one channel and is
//! handled by the controller one event at a time.

pub mod backend;
pub mod capture;
pub mod controller;
pub mod playback;
pub mod transcript;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::transport::ServerContent;

pub use backend::{Backend, DeviceBackend, SessionSettings};
pub use capture::{CaptureDevice, CapturePipeline};
pub use controller::SessionController;
pub use playback::{ActivePlaybackUnit, PlaybackOutput, PlaybackScheduler};
pub use transcript::{Role, TranscriptBuffer, TranscriptLog, TranscriptionEntry, TurnTranscripts};

/// Identifies one connect attempt. Increases with every connect.
pub type SessionId = u64;

/// Identifies one scheduled playback unit within a session.
pub type UnitId = u64;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    /// A session is live (or being established) in these states.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Something that happened on behalf of a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The remote channel accepted the session setup.
    TransportOpened,
    /// One inbound server message.
    ServerMessage(ServerContent),
    TransportError(String),
    /// The remote side closed the channel.
    TransportClosed(Option<String>),
    /// One fixed-size frame of mono capture samples.
    CaptureFrame(Vec<f32>),
    /// A playback unit played to its end.
    PlaybackEnded(UnitId),
}

/// A [`SessionEvent`] tagged with the session that produced it.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub session: SessionId,
    pub event: SessionEvent,
}

/// Handle given to devices and the transport so they can post events for
/// their session. Cheap to clone; safe to use from audio callback threads.
#[derive(Debug, Clone)]
pub struct EventSender {
    session: SessionId,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EventSender {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Post an event. Returns `false` once the controller is gone.
    pub fn send(&self, event: SessionEvent) -> bool {
        self.tx
            .send(Envelope {
                session: self.session,
                event,
            })
            .is_ok()
    }
}
