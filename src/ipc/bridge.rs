//! IPC bridge: stdin reader and stdout event emitter.
//!
//! A blocking stdin reader thread sends deserialized commands through an mpsc
//! channel; events go out as one JSON object per line on stdout.

use std::io::{self, BufRead, Write};

use tokio::sync::mpsc;
use tracing::{debug, error};

use super::{LiveCommand, LiveEvent};

/// Emit a `LiveEvent` as a JSON line on stdout and flush.
pub fn emit_event(event: &LiveEvent) {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            error!("Failed to serialize event: {}", e);
            return;
        }
    };
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    // Pipe may be closed.
    let _ = writeln!(handle, "{}", json);
    let _ = handle.flush();
}

pub fn emit_error(message: &str) {
    emit_event(&LiveEvent::Error {
        message: message.to_string(),
    });
}

/// Parse one input line. `Ok(None)` for blank lines.
fn parse_command_line(line: &str) -> Result<Option<LiveCommand>, serde_json::Error> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed).map(Some)
}

/// Spawn a blocking thread that reads JSON lines from stdin and forwards the
/// parsed commands through the returned channel.
///
/// The thread exits when stdin is closed (parent process gone) or on an
/// unrecoverable read error; the channel then closes.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<LiveCommand> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        let stdin = io::stdin();
        let reader = stdin.lock();
        for line in reader.lines() {
            match line {
                Ok(text) => match parse_command_line(&text) {
                    Ok(Some(cmd)) => {
                        debug!(?cmd, "Received command");
                        if tx.send(cmd).is_err() {
                            break; // Main task is gone.
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!("Invalid JSON command: {} (input: {})", e, text.trim());
                        emit_error(&format!("Invalid JSON command: {}", e));
                    }
                },
                Err(e) => {
                    error!("stdin read error: {}", e);
                    break;
                }
            }
        }
        debug!("stdin reader thread exiting");
    });

    rx
}
