//! Where a session gets its devices and its remote channel from.

use std::time::Duration;

use super::capture::CaptureDevice;
use super::playback::PlaybackOutput;
use super::EventSender;
use crate::audio::{self, AudioProducer, CaptureSettings, CpalCapture, TimelineOutput};
use crate::error::SessionError;
use crate::transport::{GeminiConnector, GeminiLink, SessionSetup, TransportLink};

/// Everything the controller needs to open a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub setup: SessionSetup,
    /// First outbound message, sent as text once the channel opens.
    pub greeting: String,
    pub capture: CaptureSettings,
    pub output_sample_rate: u32,
    pub analyser_fft_size: usize,
}

/// Factory for the resources one session owns. Each call opens a fresh
/// resource; the session drops it on teardown.
pub trait Backend {
    type Output: PlaybackOutput;
    type Capture: CaptureDevice;
    type Link: TransportLink;

    /// Open the playback context. Its clock starts at zero.
    fn open_output(
        &mut self,
        sample_rate: u32,
        events: EventSender,
    ) -> Result<Self::Output, SessionError>;

    /// Acquire the microphone without starting it.
    fn open_capture(
        &mut self,
        settings: &CaptureSettings,
        events: EventSender,
        tap: AudioProducer,
    ) -> Result<Self::Capture, SessionError>;

    /// Begin opening the remote channel.
    fn open_transport(
        &mut self,
        setup: &SessionSetup,
        events: EventSender,
    ) -> Result<Self::Link, SessionError>;
}

/// Real hardware plus the Gemini Live websocket.
pub struct DeviceBackend {
    output_device: Option<String>,
    connector: GeminiConnector,
}

impl DeviceBackend {
    pub fn new(output_device: Option<String>, connector: GeminiConnector) -> Self {
        Self {
            output_device,
            connector,
        }
    }

    pub fn with_endpoint(
        output_device: Option<String>,
        endpoint: &str,
        api_key: Option<String>,
        connect_timeout: Duration,
    ) -> Self {
        Self::new(
            output_device,
            GeminiConnector::new(endpoint, api_key, connect_timeout),
        )
    }
}

impl Backend for DeviceBackend {
    type Output = TimelineOutput;
    type Capture = CpalCapture;
    type Link = GeminiLink;

    fn open_output(
        &mut self,
        sample_rate: u32,
        events: EventSender,
    ) -> Result<TimelineOutput, SessionError> {
        TimelineOutput::open(self.output_device.as_deref(), sample_rate, events)
    }

    fn open_capture(
        &mut self,
        settings: &CaptureSettings,
        events: EventSender,
        tap: AudioProducer,
    ) -> Result<CpalCapture, SessionError> {
        audio::open_capture(settings, events, tap)
    }

    fn open_transport(
        &mut self,
        setup: &SessionSetup,
        events: EventSender,
    ) -> Result<GeminiLink, SessionError> {
        self.connector.open(setup, events)
    }
}
