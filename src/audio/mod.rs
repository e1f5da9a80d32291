//! Audio device layer: microphone capture, timeline playback, and the
//! analysis tap.

pub mod analyser;
pub mod capture;
pub mod convert;
pub mod output;
pub mod ring_buffer;

pub use analyser::{Analyser, SpectrumSnapshot, DEFAULT_FFT_SIZE};
pub use capture::{
    list_devices, open_capture, CaptureSettings, CpalCapture, DEFAULT_CAPTURE_RATE,
    DEFAULT_FRAME_SIZE,
};
pub use output::{list_output_devices, TimelineOutput, DEFAULT_PLAYBACK_RATE};
pub use ring_buffer::{audio_ring_buffer, AudioConsumer, AudioProducer};
