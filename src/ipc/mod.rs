//! IPC protocol types for the presentation layer.
//!
//! Events use `{"event": "<name>", "data": {...}}` format (core -> UI).
//! Commands use `{"command": "<name>", ...}` format (UI -> core).

pub mod bridge;

use serde::{Deserialize, Serialize};

use crate::session::{ConnectionStatus, TranscriptionEntry};

// ---------------------------------------------------------------------------
// Events: core -> UI (stdout)
// ---------------------------------------------------------------------------

/// All events emitted to the UI via stdout as JSON lines.
///
/// Serialized as `{"event": "<variant>", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum LiveEvent {
    Starting {},
    Ready {},
    Status {
        status: ConnectionStatus,
    },
    Thinking {
        active: bool,
    },
    Speaking {
        active: bool,
    },
    Transcript {
        entry: TranscriptionEntry,
    },
    TranscriptCleared {},
    State {
        status: ConnectionStatus,
        thinking: bool,
        speaking: bool,
        error: Option<String>,
        entries: Vec<TranscriptionEntry>,
    },
    Spectrum {
        bins: Vec<u8>,
        intensity: f32,
    },
    AudioDevices {
        input: Vec<AudioDeviceInfo>,
        output: Vec<AudioDeviceInfo>,
    },
    Error {
        message: String,
    },
    Pong {},
    Stopping {},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDeviceInfo {
    pub id: i32,
    pub name: String,
}

impl AudioDeviceInfo {
    pub fn from_names(names: Vec<String>) -> Vec<Self> {
        names
            .into_iter()
            .enumerate()
            .map(|(i, name)| Self { id: i as i32, name })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Commands: UI -> core (stdin)
// ---------------------------------------------------------------------------

/// All commands received from the UI via stdin as JSON lines.
///
/// Deserialized from `{"command": "<variant>", ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command")]
#[serde(rename_all = "snake_case")]
pub enum LiveCommand {
    /// Connect when idle, disconnect when connecting or connected.
    Toggle {},
    Connect {},
    Disconnect {},
    ClearTranscript {},
    GetState {},
    GetSpectrum {},
    ListAudioDevices {},
    Ping {},
    Stop {},
}
