//! Lock-free SPSC ring buffer for the analysis tap.
//!
//! The capture callback pushes every mono sample it produces; the analyser
//! drains whatever is there when a snapshot is requested. A full buffer
//! drops new samples instead of blocking the audio thread.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};

/// Default capacity: ~0.5 seconds of 16 kHz mono audio.
const DEFAULT_CAPACITY: usize = 8_192;

/// Producer half: lives in the cpal audio callback thread.
pub struct AudioProducer {
    inner: ringbuf::HeapProd<f32>,
}

/// Consumer half: owned by the analyser.
pub struct AudioConsumer {
    inner: ringbuf::HeapCons<f32>,
}

/// Create a matched producer/consumer pair backed by a lock-free ring buffer.
pub fn audio_ring_buffer(capacity: Option<usize>) -> (AudioProducer, AudioConsumer) {
    let cap = capacity.unwrap_or(DEFAULT_CAPACITY).max(1);
    let rb = HeapRb::<f32>::new(cap);
    let (prod, cons) = rb.split();
    (AudioProducer { inner: prod }, AudioConsumer { inner: cons })
}

impl AudioProducer {
    /// Push as many samples as fit. Returns the number written.
    pub fn push_slice(&mut self, samples: &[f32]) -> usize {
        self.inner.push_slice(samples)
    }
}

impl AudioConsumer {
    /// Number of samples currently available for reading.
    pub fn available(&self) -> usize {
        self.inner.occupied_len()
    }

    /// Drain all available samples into a Vec.
    pub fn drain_all(&mut self) -> Vec<f32> {
        let n = self.available();
        if n == 0 {
            return Vec::new();
        }
        let mut buf = vec![0.0f32; n];
        let read = self.inner.pop_slice(&mut buf);
        buf.truncate(read);
        buf
    }
}
