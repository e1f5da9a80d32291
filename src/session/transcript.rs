//! Turn transcripts.
//!
//! Transcription fragments for the current turn accumulate in two buffers,
//! one per direction. When the turn completes they become immutable
//! [`TranscriptionEntry`] values, user first, and the buffers reset.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One finished utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptionEntry {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptionEntry {
    fn new(role: Role, text: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            text,
            timestamp: Utc::now(),
        }
    }
}

/// Append-only text for one direction of the current turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptBuffer {
    text: String,
}

impl TranscriptBuffer {
    pub fn append(&mut self, fragment: &str) {
        self.text.push_str(fragment);
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Trimmed contents, leaving the buffer empty.
    pub fn take_trimmed(&mut self) -> String {
        let text = std::mem::take(&mut self.text);
        text.trim().to_string()
    }
}

/// Both transcript buffers of a session.
#[derive(Debug, Clone, Default)]
pub struct TurnTranscripts {
    input: TranscriptBuffer,
    output: TranscriptBuffer,
}

impl TurnTranscripts {
    pub fn push_input(&mut self, fragment: &str) {
        self.input.append(fragment);
    }

    pub fn push_output(&mut self, fragment: &str) {
        self.output.append(fragment);
    }

    pub fn input(&self) -> &TranscriptBuffer {
        &self.input
    }

    pub fn output(&self) -> &TranscriptBuffer {
        &self.output
    }

    /// Flush the turn: one entry per non-empty side, user before assistant.
    pub fn complete_turn(&mut self) -> Vec<TranscriptionEntry> {
        let input = self.input.take_trimmed();
        let output = self.output.take_trimmed();

        let mut entries = Vec::with_capacity(2);
        if !input.is_empty() {
            entries.push(TranscriptionEntry::new(Role::User, input));
        }
        if !output.is_empty() {
            entries.push(TranscriptionEntry::new(Role::Assistant, output));
        }
        entries
    }
}

/// The conversation so far. Outlives individual sessions.
#[derive(Debug, Clone, Default)]
pub struct TranscriptLog {
    entries: Vec<TranscriptionEntry>,
}

impl TranscriptLog {
    pub fn push(&mut self, entry: TranscriptionEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TranscriptionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
