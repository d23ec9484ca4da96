//! Wall-clock anchoring of buffered samples.
//!
//! The producer records the wall-clock time of the newest sample it has written
//! after every batch. The consumer derives the time of any buffered position by
//! walking back `samples_behind / rate` seconds from that anchor. Both sides
//! touch the anchor without a lock: a read that races with an in-flight batch is
//! off by at most one callback's worth of samples.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current UNIX time in seconds.
pub fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Wall-clock time of the most recently written sample, plus the sample rate.
#[derive(Debug)]
pub struct TimeAnchor {
    /// `f64` bits; NaN until the first batch arrives
    last_write: AtomicU64,
    rate: f64,
}

impl TimeAnchor {
    pub fn new(rate: f64) -> Self {
        assert!(rate > 0.0, "Sample rate must be positive");
        Self {
            last_write: AtomicU64::new(f64::NAN.to_bits()),
            rate,
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Record the wall-clock time of the newest written sample.
    pub fn mark(&self, wall_time: f64) {
        self.last_write.store(wall_time.to_bits(), Ordering::Release);
    }

    /// Wall-clock time of the newest written sample, `None` before the first batch.
    pub fn last_write(&self) -> Option<f64> {
        let t = f64::from_bits(self.last_write.load(Ordering::Acquire));
        if t.is_nan() { None } else { Some(t) }
    }

    /// Wall-clock time of the position `samples_behind` samples before the newest write.
    pub fn time_of(&self, samples_behind: u64) -> Option<f64> {
        self.last_write()
            .map(|t| t - samples_behind as f64 / self.rate)
    }
}

/// Maps a card's hardware stream clock onto wall-clock time.
///
/// The offset between the two clocks is captured once, from the first block
/// the stream delivers, and then held fixed so that timestamps follow the
/// hardware's sample clock rather than scheduling jitter.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamClock {
    offset: Option<f64>,
}

impl StreamClock {
    pub fn new() -> Self {
        Self { offset: None }
    }

    pub fn offset(&self) -> Option<f64> {
        self.offset
    }

    /// Wall-clock time of the end of a block whose first frame was captured at
    /// `hw_time` (stream clock seconds) and which spans `frames / rate` seconds.
    pub fn block_end(&mut self, hw_time: f64, frames: usize, rate: f64, wall_now: f64) -> f64 {
        let hw_end = hw_time + frames as f64 / rate;
        let offset = *self.offset.get_or_insert(wall_now - hw_end);
        hw_end + offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_anchor_unset() {
        let anchor = TimeAnchor::new(12_000.0);
        assert!(anchor.last_write().is_none());
        assert!(anchor.time_of(10).is_none());
    }

    #[test]
    fn test_anchor_time_of() {
        let anchor = TimeAnchor::new(10.0);
        anchor.mark(1_000.0);
        assert_relative_eq!(anchor.time_of(0).unwrap(), 1_000.0);
        assert_relative_eq!(anchor.time_of(50).unwrap(), 995.0);
    }

    #[test]
    #[should_panic(expected = "Sample rate must be positive")]
    fn test_anchor_zero_rate() {
        let _ = TimeAnchor::new(0.0);
    }

    #[test]
    fn test_stream_clock_captures_offset_once() {
        let mut clock = StreamClock::new();
        // first block: 480 frames at 48 kHz captured at hw time 2.0, arriving at wall 1000.01
        let t1 = clock.block_end(2.0, 480, 48_000.0, 1_000.01);
        assert_relative_eq!(t1, 1_000.01, epsilon = 1e-9);
        assert_relative_eq!(clock.offset().unwrap(), 998.0, epsilon = 1e-9);

        // late delivery of the next block does not move its timestamp
        let t2 = clock.block_end(2.01, 480, 48_000.0, 1_000.5);
        assert_relative_eq!(t2, 1_000.02, epsilon = 1e-9);
    }

    #[test]
    fn test_now_is_unix_time() {
        // 2020-01-01
        assert!(now() > 1_577_836_800.0);
    }
}
