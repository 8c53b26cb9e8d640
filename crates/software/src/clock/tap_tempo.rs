//! Provides [`TapTempo`], which estimates a tempo from the spacing of manual taps.

use super::TEMPO_RANGE;
use embassy_time::{Duration, Instant};
use tinyvec::ArrayVec;

/// A tap arriving this long or longer after the previous one starts a new sequence.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Number of most recent intervals the estimate is averaged over.
pub const TAP_WINDOW: usize = 8;

/// Derives a tempo from the average interval between recent taps.
#[derive(Clone, Copy, Debug, Default)]
pub struct TapTempo {
    /// Intervals between consecutive taps of the current sequence, oldest first.
    intervals: ArrayVec<[Duration; TAP_WINDOW]>,
    /// Taps in the current sequence; saturates.
    taps: u8,
    last_tap: Option<Instant>,
}

impl TapTempo {
    /// Constructs a [`TapTempo`] with no taps recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets the current sequence.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Records a tap at `now` and returns the resulting estimate, if one is available.
    pub fn tap(&mut self, now: Instant) -> Option<u8> {
        match self.last_tap.and_then(|last| now.checked_duration_since(last)) {
            Some(interval) if interval < IDLE_TIMEOUT => {
                if self.intervals.len() == TAP_WINDOW {
                    self.intervals.remove(0);
                }
                self.intervals.push(interval);
                self.taps = self.taps.saturating_add(1);
            }
            _ => {
                self.intervals.clear();
                self.taps = 1;
            }
        }
        self.last_tap = Some(now);
        self.estimate()
    }

    /// Number of taps in the current sequence.
    pub fn taps(&self) -> u8 {
        self.taps
    }

    /// Returns the tempo in beats per minute implied by the most recent taps, clamped to [`TEMPO_RANGE`]. At least two
    /// taps are needed.
    pub fn estimate(&self) -> Option<u8> {
        if self.intervals.is_empty() {
            return None;
        }
        let total: u64 = self.intervals.iter().map(Duration::as_micros).sum();
        let interval = (total / self.intervals.len() as u64).max(1);
        let bpm = (60_000_000 + interval / 2) / interval;
        Some(bpm.clamp(u64::from(*TEMPO_RANGE.start()), u64::from(*TEMPO_RANGE.end())) as u8)
    }
}
