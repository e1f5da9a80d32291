//! Microphone capture via cpal.
//!
//! Opens the default (or named) input device at its native config, down-mixes
//! to mono, resamples to the session capture rate, and posts fixed-size frames
//! to the session event queue. Every sample is also offered to the analysis
//! tap's ring buffer.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, DefaultStreamConfigError, Stream, StreamConfig};
use tracing::{debug, error, info, warn};

use super::convert::{to_mono, LinearResampler};
use super::ring_buffer::AudioProducer;
use crate::error::SessionError;
use crate::session::{CaptureDevice, EventSender, SessionEvent};

/// Capture rate expected by the remote endpoint.
pub const DEFAULT_CAPTURE_RATE: u32 = 16_000;

/// Samples per outbound frame (256 ms at 16 kHz).
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// What the capture side of a session needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSettings {
    /// Input device name; `None` uses the system default.
    pub device: Option<String>,
    pub sample_rate: u32,
    pub frame_size: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: DEFAULT_CAPTURE_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
        }
    }
}

/// List available input device names.
pub fn list_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    if let Ok(devices) = host.input_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                names.push(name);
            }
        }
    }
    names
}

/// Resolved info about the audio input we will use.
struct ResolvedInput {
    device: cpal::Device,
    name: String,
    stream_config: StreamConfig,
    native_rate: u32,
}

/// Find and configure the input device.
fn resolve_device(device_name: Option<&str>) -> Result<ResolvedInput, SessionError> {
    let host = cpal::default_host();

    let device = if let Some(name) = device_name {
        host.input_devices()
            .map_err(|e| SessionError::DeviceUnavailable(format!("cannot enumerate inputs: {e}")))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| SessionError::DeviceUnavailable(format!("input device not found: {name}")))?
    } else {
        host.default_input_device()
            .ok_or_else(|| SessionError::Permission("no default input device available".into()))?
    };

    let name = device.name().unwrap_or_else(|_| "unknown".into());

    let default_config = device.default_input_config().map_err(|e| match e {
        DefaultStreamConfigError::DeviceNotAvailable => {
            SessionError::DeviceUnavailable(format!("{name} is not available"))
        }
        other => SessionError::DeviceUnavailable(format!("{name}: {other}")),
    })?;

    let native_rate = default_config.sample_rate().0;
    let channels = default_config.channels();

    let stream_config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(native_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    info!(device = %name, native_rate, channels, "Selected input device");

    Ok(ResolvedInput {
        device,
        name,
        stream_config,
        native_rate,
    })
}

fn map_build_error(device: &str, err: BuildStreamError) -> SessionError {
    match err {
        BuildStreamError::DeviceNotAvailable => {
            SessionError::DeviceUnavailable(format!("{device} is not available"))
        }
        other => SessionError::DeviceUnavailable(format!("failed to open {device}: {other}")),
    }
}

/// An opened microphone. Frames flow only between `start` and `stop`.
pub struct CpalCapture {
    stream: Option<Stream>,
    device_name: String,
}

impl CpalCapture {
    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

/// Acquire the microphone and build its stream without starting it.
pub fn open_capture(
    settings: &CaptureSettings,
    events: EventSender,
    mut tap: AudioProducer,
) -> Result<CpalCapture, SessionError> {
    let input = resolve_device(settings.device.as_deref())?;
    let native_rate = input.native_rate;
    let target_rate = settings.sample_rate;
    let channels = input.stream_config.channels;
    let frame_size = settings.frame_size.max(1);
    let session = events.session();

    let mut frame_buf: Vec<f32> = Vec::with_capacity(frame_size * 2);
    let mut resampler = LinearResampler::new(native_rate, target_rate);

    let stream = input
        .device
        .build_input_stream(
            &input.stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = to_mono(data, channels);
                let resampled = resampler.process(&mono);

                // Tap first; a full tap buffer just drops samples.
                tap.push_slice(&resampled);

                frame_buf.extend_from_slice(&resampled);
                while frame_buf.len() >= frame_size {
                    let frame: Vec<f32> = frame_buf.drain(..frame_size).collect();
                    if !events.send(SessionEvent::CaptureFrame(frame)) {
                        frame_buf.clear();
                        return;
                    }
                }
            },
            move |err| {
                error!(session, "Audio input stream error: {}", err);
            },
            None,
        )
        .map_err(|e| map_build_error(&input.name, e))?;

    // Some hosts start streams on creation; frames must wait for `start`.
    if let Err(e) = stream.pause() {
        debug!("Input stream could not be paused after creation: {}", e);
    }

    Ok(CpalCapture {
        stream: Some(stream),
        device_name: input.name,
    })
}

impl CaptureDevice for CpalCapture {
    fn start(&mut self) -> Result<(), SessionError> {
        let Some(stream) = self.stream.as_ref() else {
            return Err(SessionError::DeviceUnavailable(
                "capture device already released".into(),
            ));
        };
        stream.play().map_err(|e| {
            SessionError::DeviceUnavailable(format!("failed to start {}: {e}", self.device_name))
        })?;
        info!(device = %self.device_name, "Audio capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                warn!("Failed to pause input stream: {}", e);
            }
            drop(stream);
            info!(device = %self.device_name, "Audio capture released");
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
