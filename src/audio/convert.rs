//! Sample-format helpers shared by capture and playback.

/// Streaming linear resampler for mono f32 audio.
///
/// Keeps its source position and the previous buffer's last sample between
/// calls, so feeding a signal in arbitrary chunks yields the same samples as
/// feeding it in one piece.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    from_rate: u32,
    to_rate: u32,
    ratio: f64,
    produced: u64,
    consumed: u64,
    last: Option<f32>,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        let ratio = if to_rate == 0 {
            1.0
        } else {
            from_rate as f64 / to_rate as f64
        };
        Self {
            from_rate,
            to_rate,
            ratio,
            produced: 0,
            consumed: 0,
            last: None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate || self.from_rate == 0 || self.to_rate == 0
    }

    /// Resample the next chunk of the stream.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.is_passthrough() {
            return input.to_vec();
        }
        if input.is_empty() {
            return Vec::new();
        }

        let len = input.len() as i64;
        // Index -1 is the last sample of the previous chunk.
        let last = self.last.unwrap_or(input[0]);
        let sample = |k: i64| if k < 0 { last } else { input[k as usize] };

        let mut output = Vec::with_capacity((input.len() as f64 / self.ratio).ceil() as usize + 1);
        loop {
            let src = self.produced as f64 * self.ratio - self.consumed as f64;
            let idx0 = src.floor() as i64;
            let frac = (src - idx0 as f64) as f32;
            if idx0 + 1 < len {
                let s0 = sample(idx0);
                let s1 = sample(idx0 + 1);
                output.push(s0 + frac * (s1 - s0));
            } else if idx0 == len - 1 && frac == 0.0 {
                output.push(input[idx0 as usize]);
            } else {
                // Needs the next chunk.
                break;
            }
            self.produced += 1;
        }

        self.consumed += input.len() as u64;
        self.last = input.last().copied();
        output
    }
}

/// Down-mix interleaved multi-channel audio to mono by averaging channels.
pub fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}
