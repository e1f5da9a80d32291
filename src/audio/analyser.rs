//! Frequency-analysis tap on the capture stream.
//!
//! Mirrors a browser `AnalyserNode`: the most recent `fft_size` samples are
//! Blackman-windowed, transformed, smoothed over time, and mapped to bytes
//! across a fixed decibel range. Reading a snapshot only drains the tap's
//! own ring buffer, so it never holds up the capture-to-transport path.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::Serialize;

use super::ring_buffer::AudioConsumer;

/// Default analysis window.
pub const DEFAULT_FFT_SIZE: usize = 512;

const SMOOTHING: f32 = 0.8;
const MIN_DB: f32 = -100.0;
const MAX_DB: f32 = -30.0;

/// One frequency-magnitude reading.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpectrumSnapshot {
    /// `fft_size / 2` byte magnitudes, low to high frequency.
    pub bins: Vec<u8>,
    /// Loudness in [0, 1]; see [`intensity`].
    pub intensity: f32,
}

pub struct Analyser {
    consumer: AudioConsumer,
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    history: Vec<f32>,
    smoothed: Vec<f32>,
}

impl Analyser {
    /// `fft_size` is rounded up to a power of two, minimum 32.
    pub fn new(consumer: AudioConsumer, fft_size: usize) -> Self {
        let fft_size = fft_size.max(32).next_power_of_two();
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);
        Self {
            consumer,
            fft_size,
            fft,
            window: blackman(fft_size),
            history: vec![0.0; fft_size],
            smoothed: vec![0.0; fft_size / 2],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Pull in everything captured since the last call and analyse the
    /// latest window.
    pub fn snapshot(&mut self) -> SpectrumSnapshot {
        self.absorb_pending();

        let mut buf: Vec<Complex<f32>> = self
            .history
            .iter()
            .zip(&self.window)
            .map(|(s, w)| Complex::new(s * w, 0.0))
            .collect();
        self.fft.process(&mut buf);

        let scale = 1.0 / self.fft_size as f32;
        let mut bins = Vec::with_capacity(self.smoothed.len());
        for (k, prev) in self.smoothed.iter_mut().enumerate() {
            let magnitude = buf[k].norm() * scale;
            *prev = SMOOTHING * *prev + (1.0 - SMOOTHING) * magnitude;
            bins.push(to_byte(*prev));
        }

        let intensity = intensity(&bins);
        SpectrumSnapshot { bins, intensity }
    }

    /// Move queued tap samples into the analysis window so the ring never
    /// fills up with stale audio between snapshots.
    pub fn absorb_pending(&mut self) {
        let fresh = self.consumer.drain_all();
        self.absorb(&fresh);
    }

    /// Keep only the newest `fft_size` samples.
    fn absorb(&mut self, fresh: &[f32]) {
        if fresh.is_empty() {
            return;
        }
        if fresh.len() >= self.fft_size {
            self.history
                .copy_from_slice(&fresh[fresh.len() - self.fft_size..]);
        } else {
            self.history.rotate_left(fresh.len());
            let start = self.fft_size - fresh.len();
            self.history[start..].copy_from_slice(fresh);
        }
    }
}

/// Overall loudness for the visualizer: byte sum over `1.5 * bins`, capped
/// at 1. Saturates once the average bin reaches 1.5.
fn intensity(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    let sum: f32 = bins.iter().map(|&b| b as f32).sum();
    (sum / (bins.len() as f32 * 1.5)).min(1.0)
}

fn to_byte(magnitude: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = 255.0 * (db - MIN_DB) / (MAX_DB - MIN_DB);
    scaled.clamp(0.0, 255.0) as u8
}

fn blackman(n: usize) -> Vec<f32> {
    let (a0, a1, a2) = (0.42f32, 0.5f32, 0.08f32);
    (0..n)
        .map(|i| {
            let x = 2.0 * std::f32::consts::PI * i as f32 / n as f32;
            a0 - a1 * x.cos() + a2 * (2.0 * x).cos()
        })
        .collect()
}
