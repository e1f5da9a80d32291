//! PCM codec between device float samples and the wire format.
//!
//! Outbound: f32 in [-1, 1] -> 16-bit little-endian PCM -> base64, tagged
//! with the capture rate. Inbound: base64 -> raw bytes -> per-channel f32
//! buffer timed at the source rate.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Bytes per 16-bit PCM sample.
const SAMPLE_WIDTH: usize = 2;

/// Base64-wrapped PCM ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub data: String,
    pub mime_type: String,
}

/// Decoded, playable audio. One sample vector per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> u16 {
        self.channels.len() as u16
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Samples interleaved frame by frame, the layout output devices expect.
    pub fn interleaved(&self) -> Vec<f32> {
        let ch = self.channels.len();
        if ch == 1 {
            return self.channels[0].clone();
        }
        let mut out = Vec::with_capacity(self.frames() * ch);
        for i in 0..self.frames() {
            for channel in &self.channels {
                out.push(channel[i]);
            }
        }
        out
    }
}

/// MIME tag for raw PCM at `sample_rate`.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// Encode one capture frame for sending.
pub fn encode_frame(samples: &[f32], sample_rate: u32) -> Result<MediaBlob, CodecError> {
    if samples.is_empty() {
        return Err(CodecError::EmptyFrame);
    }

    let mut bytes = Vec::with_capacity(samples.len() * SAMPLE_WIDTH);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let pcm = (clamped * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        bytes.extend_from_slice(&pcm.to_le_bytes());
    }

    Ok(MediaBlob {
        data: BASE64.encode(&bytes),
        mime_type: pcm_mime_type(sample_rate),
    })
}

/// Undo the base64 wrapping of an inbound audio payload.
pub fn decode_chunk(payload: &str) -> Result<Vec<u8>, CodecError> {
    BASE64
        .decode(payload.trim())
        .map_err(|e| CodecError::Base64(e.to_string()))
}

/// Interpret raw bytes as interleaved i16 LE PCM and build a float buffer.
pub fn render_to_audio_buffer(
    raw: &[u8],
    sample_rate: u32,
    channel_count: u16,
) -> Result<AudioBuffer, CodecError> {
    if channel_count == 0 {
        return Err(CodecError::NoChannels);
    }
    let ch = channel_count as usize;
    let frame_bytes = SAMPLE_WIDTH * ch;
    if raw.len() % frame_bytes != 0 {
        return Err(CodecError::Misaligned {
            len: raw.len(),
            channels: channel_count,
            frame_bytes,
        });
    }

    let frames = raw.len() / frame_bytes;
    let mut channels = vec![Vec::with_capacity(frames); ch];
    for (i, pair) in raw.chunks_exact(SAMPLE_WIDTH).enumerate() {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        channels[i % ch].push(sample as f32 / 32768.0);
    }

    Ok(AudioBuffer {
        sample_rate,
        channels,
    })
}
