//! Capture pipeline: microphone frames -> codec -> transport.
//!
//! Frames are produced at device cadence and forwarded one by one in arrival
//! order without waiting for the remote side. Nothing is queued here beyond
//! the frame being handled.

use tracing::{debug, info};

use crate::audio::{Analyser, SpectrumSnapshot};
use crate::codec::encode_frame;
use crate::error::SessionError;
use crate::transport::{ClientMessage, TransportLink};

/// An acquired microphone as seen by the pipeline.
pub trait CaptureDevice {
    /// Begin delivering `SessionEvent::CaptureFrame`s.
    fn start(&mut self) -> Result<(), SessionError>;

    /// Stop delivering frames and release the device. Idempotent.
    fn stop(&mut self);
}

pub struct CapturePipeline<D: CaptureDevice> {
    device: Option<D>,
    analyser: Analyser,
    sample_rate: u32,
    active: bool,
    frames_sent: u64,
}

impl<D: CaptureDevice> CapturePipeline<D> {
    pub fn new(device: D, analyser: Analyser, sample_rate: u32) -> Self {
        Self {
            device: Some(device),
            analyser,
            sample_rate,
            active: false,
            frames_sent: 0,
        }
    }

    /// Start the device. Calling it on a running pipeline does nothing.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.active {
            return Ok(());
        }
        let device = self.device.as_mut().ok_or_else(|| {
            SessionError::DeviceUnavailable("capture pipeline already stopped".into())
        })?;
        device.start()?;
        self.active = true;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the device handle is still held.
    pub fn holds_device(&self) -> bool {
        self.device.is_some()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Encode one frame and hand it to the transport. Frames arriving while
    /// the pipeline is not running are dropped.
    pub fn forward_frame<L: TransportLink>(
        &mut self,
        samples: &[f32],
        link: &mut L,
    ) -> Result<(), SessionError> {
        self.analyser.absorb_pending();
        if !self.active {
            return Ok(());
        }
        let blob = encode_frame(samples, self.sample_rate)?;
        link.send(ClientMessage::Media(blob))?;
        self.frames_sent += 1;
        Ok(())
    }

    /// Latest frequency reading from the analysis tap.
    pub fn spectrum(&mut self) -> SpectrumSnapshot {
        self.analyser.snapshot()
    }

    /// Stop capture and release the device. Safe to call repeatedly and on a
    /// pipeline that never started.
    pub fn stop(&mut self) {
        let was_active = std::mem::replace(&mut self.active, false);
        if let Some(mut device) = self.device.take() {
            device.stop();
            if was_active {
                info!(frames_sent = self.frames_sent, "Capture pipeline stopped");
            } else {
                debug!("Capture device released before it started");
            }
        }
    }
}

impl<D: CaptureDevice> Drop for CapturePipeline<D> {
    fn drop(&mut self) {
        self.stop();
    }
}
