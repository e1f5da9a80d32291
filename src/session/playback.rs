//! Gapless playback scheduling.
//!
//! Response audio arrives as independent chunks. Each one is scheduled to
//! start exactly where the previous one ends, or "now" if playback has gone
//! idle, so consecutive chunks concatenate into continuous speech.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use super::UnitId;
use crate::codec::AudioBuffer;

/// The playback device as seen by the scheduler.
///
/// `current_time` is the device clock in seconds. Buffers handed to
/// `schedule` are already at the rate the output was opened with. Units
/// started with `schedule` must post `SessionEvent::PlaybackEnded` when they
/// finish on their own; `stop` silences a unit immediately and posts nothing.
pub trait PlaybackOutput {
    fn current_time(&self) -> f64;
    fn schedule(&mut self, unit: UnitId, buffer: &AudioBuffer, start_at: f64);
    fn stop(&mut self, unit: UnitId);
}

/// One decoded chunk that is playing or about to play.
#[derive(Debug, Clone)]
pub struct ActivePlaybackUnit {
    pub id: UnitId,
    pub buffer: AudioBuffer,
    pub start_at: f64,
    pub duration: f64,
}

impl ActivePlaybackUnit {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

/// Owns the playback cursor and the set of live units for one session.
pub struct PlaybackScheduler<O> {
    output: O,
    next_playback_time: f64,
    active: BTreeMap<UnitId, ActivePlaybackUnit>,
    next_unit: UnitId,
}

impl<O: PlaybackOutput> PlaybackScheduler<O> {
    pub fn new(output: O) -> Self {
        Self {
            output,
            next_playback_time: 0.0,
            active: BTreeMap::new(),
            next_unit: 1,
        }
    }

    /// Schedule a chunk right after everything already queued.
    /// Returns the new unit's id and start time.
    pub fn enqueue(&mut self, buffer: AudioBuffer) -> (UnitId, f64) {
        let now = self.output.current_time();
        self.prune_finished(now);

        let start_at = self.next_playback_time.max(now);
        let duration = buffer.duration();
        let id = self.next_unit;
        self.next_unit += 1;

        self.output.schedule(id, &buffer, start_at);
        self.next_playback_time = start_at + duration;

        trace!(unit = id, start_at, duration, now, "Scheduled playback unit");
        self.active.insert(
            id,
            ActivePlaybackUnit {
                id,
                buffer,
                start_at,
                duration,
            },
        );
        (id, start_at)
    }

    /// Record the natural end of a unit. Returns `true` when nothing is left
    /// playing, i.e. playback just went idle.
    pub fn on_unit_ended(&mut self, unit: UnitId) -> bool {
        if self.active.remove(&unit).is_none() {
            trace!(unit, "End of unit that is no longer tracked");
        }
        self.active.is_empty()
    }

    /// Silence everything immediately and rewind the cursor so the next chunk
    /// is timed from "now". Returns how many units were stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.active.len();
        for id in self.active.keys() {
            self.output.stop(*id);
        }
        self.active.clear();
        self.next_playback_time = 0.0;
        if stopped > 0 {
            debug!(stopped, "Stopped all playback units");
        }
        stopped
    }

    /// Forced stop on disconnect, error or remote close.
    pub fn teardown(&mut self) {
        self.interrupt();
    }

    pub fn next_playback_time(&self) -> f64 {
        self.next_playback_time
    }

    pub fn current_time(&self) -> f64 {
        self.output.current_time()
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Units in scheduling order.
    pub fn active_units(&self) -> impl Iterator<Item = &ActivePlaybackUnit> {
        self.active.values()
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    /// Drop units whose end is already behind the clock but whose completion
    /// has not been delivered yet.
    fn prune_finished(&mut self, now: f64) {
        self.active.retain(|_, unit| unit.end_at() > now);
    }
}
