//! Full-duplex voice sessions with a realtime conversational endpoint.
//!
//! Microphone audio is framed, encoded and streamed out while response audio
//! streams back and is scheduled for gapless playback. [`SessionController`]
//! owns the lifecycle; the device layer and the websocket transport sit behind
//! the [`session::Backend`] trait.

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod ipc;
pub mod session;
pub mod transport;

pub use error::{CodecError, SessionError};
pub use session::{ConnectionStatus, DeviceBackend, SessionController};
