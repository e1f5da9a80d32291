//! Timeline playback via rodio.
//!
//! A single never-ending rodio `Source` mixes every scheduled voice into the
//! output stream. The number of frames it has rendered is the playback clock:
//! a voice scheduled at time `t` starts at frame `t * rate`. When the render
//! position passes the end of a voice it is dropped and a
//! `SessionEvent::PlaybackEnded` is posted for it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait};
use rodio::{OutputStream, OutputStreamHandle, Source};
use tracing::info;

use super::convert::to_mono;
use crate::codec::AudioBuffer;
use crate::error::SessionError;
use crate::session::{EventSender, PlaybackOutput, SessionEvent, UnitId};

/// Playback rate of the remote endpoint's audio.
pub const DEFAULT_PLAYBACK_RATE: u32 = 24_000;

/// Frames mixed per lock of the voice list (10 ms at 24 kHz).
const BLOCK_FRAMES: usize = 240;

/// List available output device names.
pub fn list_output_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    if let Ok(devices) = host.output_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                names.push(name);
            }
        }
    }
    names
}

struct Voice {
    unit: UnitId,
    start_frame: u64,
    samples: Arc<[f32]>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// State shared between the session thread and the audio thread.
struct Timeline {
    sample_rate: u32,
    rendered: AtomicU64,
    voices: Mutex<Vec<Voice>>,
    events: EventSender,
}

impl Timeline {
    fn voices(&self) -> MutexGuard<'_, Vec<Voice>> {
        match self.voices.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn frames_at(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.sample_rate as f64).round() as u64
    }

    /// Mix `out.len()` frames starting at the current render position.
    fn render(&self, out: &mut [f32]) {
        out.fill(0.0);
        let block_start = self.rendered.load(Ordering::Acquire);
        let block_end = block_start + out.len() as u64;

        let mut finished = Vec::new();
        {
            let mut voices = self.voices();
            voices.retain(|voice| {
                let from = block_start.max(voice.start_frame);
                let to = block_end.min(voice.end_frame());
                for frame in from..to {
                    out[(frame - block_start) as usize] +=
                        voice.samples[(frame - voice.start_frame) as usize];
                }
                if voice.end_frame() <= block_end {
                    finished.push(voice.unit);
                    false
                } else {
                    true
                }
            });
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
        self.rendered.store(block_end, Ordering::Release);

        for unit in finished {
            self.events.send(SessionEvent::PlaybackEnded(unit));
        }
    }
}

/// The rodio source that drives the timeline.
struct MixerSource {
    timeline: Arc<Timeline>,
    block: Vec<f32>,
    pos: usize,
}

impl Iterator for MixerSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.pos >= self.block.len() {
            self.timeline.render(&mut self.block);
            self.pos = 0;
        }
        let sample = self.block[self.pos];
        self.pos += 1;
        Some(sample)
    }
}

impl Source for MixerSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        self.timeline.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// One session's playback context. Dropping it closes the output stream.
pub struct TimelineOutput {
    _stream: OutputStream,
    _handle: OutputStreamHandle,
    timeline: Arc<Timeline>,
}

impl TimelineOutput {
    /// Open the default (or named) output device and start the mixer at
    /// `sample_rate`. The clock starts at zero.
    pub fn open(
        device_name: Option<&str>,
        sample_rate: u32,
        events: EventSender,
    ) -> Result<Self, SessionError> {
        let (stream, handle) = match device_name {
            Some(name) => {
                let device = cpal::default_host()
                    .output_devices()
                    .map_err(|e| {
                        SessionError::DeviceUnavailable(format!("cannot enumerate outputs: {e}"))
                    })?
                    .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                    .ok_or_else(|| {
                        SessionError::DeviceUnavailable(format!("output device not found: {name}"))
                    })?;
                OutputStream::try_from_device(&device)
            }
            None => OutputStream::try_default(),
        }
        .map_err(|e| SessionError::DeviceUnavailable(format!("failed to open audio output: {e}")))?;

        let timeline = Arc::new(Timeline {
            sample_rate,
            rendered: AtomicU64::new(0),
            voices: Mutex::new(Vec::new()),
            events,
        });

        let source = MixerSource {
            timeline: Arc::clone(&timeline),
            block: vec![0.0; BLOCK_FRAMES],
            pos: BLOCK_FRAMES,
        };
        handle
            .play_raw(source)
            .map_err(|e| SessionError::DeviceUnavailable(format!("failed to start playback: {e}")))?;

        info!(sample_rate, "Playback context opened");

        Ok(Self {
            _stream: stream,
            _handle: handle,
            timeline,
        })
    }
}

impl PlaybackOutput for TimelineOutput {
    fn current_time(&self) -> f64 {
        self.timeline.rendered.load(Ordering::Acquire) as f64 / self.timeline.sample_rate as f64
    }

    fn schedule(&mut self, unit: UnitId, buffer: &AudioBuffer, start_at: f64) {
        let samples = to_mono(&buffer.interleaved(), buffer.channel_count());

        let voice = Voice {
            unit,
            start_frame: self.timeline.frames_at(start_at),
            samples: samples.into(),
        };
        self.timeline.voices().push(voice);
    }

    fn stop(&mut self, unit: UnitId) {
        self.timeline.voices().retain(|voice| voice.unit != unit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn timeline(rate: u32) -> (Arc<Timeline>, mpsc::UnboundedReceiver<crate::session::Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let timeline = Arc::new(Timeline {
            sample_rate: rate,
            rendered: AtomicU64::new(0),
            voices: Mutex::new(Vec::new()),
            events: EventSender::new(1, tx),
        });
        (timeline, rx)
    }

    fn voice(unit: UnitId, start_frame: u64, len: usize, value: f32) -> Voice {
        Voice {
            unit,
            start_frame,
            samples: vec![value; len].into(),
        }
    }

    #[test]
    fn voices_start_at_their_frame() {
        let (tl, _rx) = timeline(100);
        tl.voices().push(voice(1, 3, 2, 0.5));
        let mut out = vec![0.0; 8];
        tl.render(&mut out);
        assert_eq!(out, vec![0.0, 0.0, 0.0, 0.5, 0.5, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn back_to_back_voices_leave_no_gap() {
        let (tl, _rx) = timeline(100);
        tl.voices().push(voice(1, 0, 4, 0.25));
        tl.voices().push(voice(2, 4, 4, 0.75));
        let mut out = vec![0.0; 8];
        tl.render(&mut out);
        assert!(out[..4].iter().all(|&s| s == 0.25));
        assert!(out[4..].iter().all(|&s| s == 0.75));
    }

    #[test]
    fn finished_voices_post_completion() {
        let (tl, mut rx) = timeline(100);
        tl.voices().push(voice(9, 0, 5, 0.1));
        let mut out = vec![0.0; 4];
        tl.render(&mut out);
        assert!(rx.try_recv().is_err());
        tl.render(&mut out);
        let env = rx.try_recv().unwrap();
        assert!(matches!(env.event, SessionEvent::PlaybackEnded(9)));
        assert!(tl.voices().is_empty());
        assert_eq!(tl.rendered.load(Ordering::Acquire), 8);
    }

    #[test]
    fn mix_is_clamped() {
        let (tl, _rx) = timeline(100);
        tl.voices().push(voice(1, 0, 2, 0.8));
        tl.voices().push(voice(2, 0, 2, 0.8));
        let mut out = vec![0.0; 2];
        tl.render(&mut out);
        assert_eq!(out, vec![1.0, 1.0]);
    }

    #[test]
    fn seconds_map_to_frames() {
        let (tl, _rx) = timeline(24_000);
        assert_eq!(tl.frames_at(0.5), 12_000);
        assert_eq!(tl.frames_at(-1.0), 0);
    }
}
