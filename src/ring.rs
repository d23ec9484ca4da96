//! Single-producer / single-consumer sample window.
//!
//! [`RingBuffer`] is a fixed-capacity circular store split into a [`Producer`]
//! half, driven from a device callback, and a [`Consumer`] half, polled by the
//! application. Neither side ever blocks:
//!
//! - [`Producer::push`] is O(1) and never allocates. When the buffer already
//!   holds `capacity - 1` samples the oldest one is given up and the push is
//!   counted as an overflow.
//! - [`Consumer::pop_window`] returns up to `n` samples, either the oldest
//!   buffered ones or, in `latest` mode, the newest ones with older backlog
//!   discarded. Each window carries the wall-clock time of its first sample.
//!
//! Positions are kept as monotonically increasing sample counts and reduced
//! modulo the capacity only to address a cell. The producer is the only writer
//! of the write position and of the cells, the consumer the only writer of the
//! read position. Cells are atomics, so a consumer that falls a full lap behind
//! can detect the samples that were overwritten while it was copying and drop
//! them instead of returning torn data.
//!
//! # Example
//!
//! ```
//! use soundin::ring::RingBuffer;
//!
//! let (mut tx, mut rx) = RingBuffer::<f64>::new(1_000, 10.0).split();
//! for i in 1..=50 {
//!     tx.push(i as f64 / 10.0);
//! }
//! tx.commit(1_005.0);
//!
//! let window = rx.pop_window(5, true);
//! assert_eq!(window.samples, vec![4.6, 4.7, 4.8, 4.9, 5.0]);
//! assert_eq!(window.start_time, Some(1_004.5));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering, fence};

use num_complex::Complex;

use crate::anchor::TimeAnchor;

/// Element types a [`RingBuffer`] can hold.
///
/// Each sample is stored in an atomic cell so that a lapped read observes
/// either the old or the new bits, never undefined memory.
pub trait Sample: Copy + Default + Send + Sync + 'static {
    type Cell: Default + Send + Sync;

    fn store(cell: &Self::Cell, value: Self);
    fn load(cell: &Self::Cell) -> Self;
}

impl Sample for f64 {
    type Cell = AtomicU64;

    fn store(cell: &Self::Cell, value: Self) {
        cell.store(value.to_bits(), Ordering::Relaxed);
    }

    fn load(cell: &Self::Cell) -> Self {
        f64::from_bits(cell.load(Ordering::Relaxed))
    }
}

impl Sample for Complex<f64> {
    type Cell = [AtomicU64; 2];

    fn store(cell: &Self::Cell, value: Self) {
        cell[0].store(value.re.to_bits(), Ordering::Relaxed);
        cell[1].store(value.im.to_bits(), Ordering::Relaxed);
    }

    fn load(cell: &Self::Cell) -> Self {
        Complex::new(
            f64::from_bits(cell[0].load(Ordering::Relaxed)),
            f64::from_bits(cell[1].load(Ordering::Relaxed)),
        )
    }
}

/// A run of samples popped from the buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Window<T> {
    pub samples: Vec<T>,
    /// UNIX time of the first sample; `None` if the source never produced.
    pub start_time: Option<f64>,
}

impl<T> Window<T> {
    pub fn empty() -> Self {
        Self {
            samples: Vec::new(),
            start_time: None,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// UNIX time just past the last sample.
    pub fn end_time(&self, rate: f64) -> Option<f64> {
        self.start_time
            .map(|t| t + self.samples.len() as f64 / rate)
    }

    /// Apply `f` to the samples, keeping the timestamp.
    pub fn map<U>(self, f: impl FnOnce(Vec<T>) -> Vec<U>) -> Window<U> {
        Window {
            samples: f(self.samples),
            start_time: self.start_time,
        }
    }
}

/// Fixed-capacity circular sample store with its wall-clock anchor.
pub struct RingBuffer<T: Sample> {
    cells: Box<[T::Cell]>,
    /// Samples ever written.
    head: AtomicU64,
    /// Samples consumed or discarded by the consumer.
    tail: AtomicU64,
    overflows: AtomicU64,
    anchor: TimeAnchor,
}

impl<T: Sample> RingBuffer<T> {
    /// Create a buffer of `capacity` cells for a source producing `rate` samples/s.
    ///
    /// One cell is kept free, so at most `capacity - 1` samples are held.
    ///
    /// # Panics
    ///
    /// Panics if `capacity < 2` or `rate <= 0`.
    pub fn new(capacity: usize, rate: f64) -> Self {
        assert!(capacity >= 2, "Ring buffer capacity must be at least 2");
        let cells: Box<[T::Cell]> = (0..capacity).map(|_| T::Cell::default()).collect();
        Self {
            cells,
            head: AtomicU64::new(0),
            tail: AtomicU64::new(0),
            overflows: AtomicU64::new(0),
            anchor: TimeAnchor::new(rate),
        }
    }

    /// Buffer sized to hold `seconds` of samples at `rate`.
    pub fn with_duration(seconds: usize, rate: u32) -> Self {
        Self::new((rate as usize * seconds).max(2), rate as f64)
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// Split into the producer and consumer halves.
    pub fn split(self) -> (Producer<T>, Consumer<T>) {
        let shared = Arc::new(self);
        (
            Producer {
                shared: shared.clone(),
                head: 0,
            },
            Consumer { shared, tail: 0 },
        )
    }

    fn cell(&self, pos: u64) -> &T::Cell {
        &self.cells[(pos % self.cells.len() as u64) as usize]
    }

    fn limit(&self) -> u64 {
        self.cells.len() as u64 - 1
    }
}

/// Writing half, owned by the device callback.
pub struct Producer<T: Sample> {
    shared: Arc<RingBuffer<T>>,
    head: u64,
}

impl<T: Sample> Producer<T> {
    /// Append one sample. Returns `false` when the buffer was full and the
    /// oldest buffered sample had to be given up.
    pub fn push(&mut self, sample: T) -> bool {
        let shared = &*self.shared;
        let tail = shared.tail.load(Ordering::Relaxed);
        let room = self.head - tail.min(self.head) < shared.limit();
        if !room {
            shared.overflows.fetch_add(1, Ordering::Relaxed);
        }

        // A consumer that reads the new bits must also see the head that
        // preceded them, so it can tell the cell was reused.
        fence(Ordering::Release);
        T::store(shared.cell(self.head), sample);
        self.head += 1;
        shared.head.store(self.head, Ordering::Release);
        room
    }

    /// Append all of `samples`; returns how many landed on a full buffer.
    pub fn push_slice(&mut self, samples: &[T]) -> usize {
        samples.iter().filter(|&&s| !self.push(s)).count()
    }

    /// Record the wall-clock time of the newest pushed sample.
    pub fn commit(&self, wall_time: f64) {
        self.shared.anchor.mark(wall_time);
    }

    pub fn anchor(&self) -> &TimeAnchor {
        &self.shared.anchor
    }

    pub fn overflow_count(&self) -> u64 {
        self.shared.overflows.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }
}

/// Reading half, owned by the application.
pub struct Consumer<T: Sample> {
    shared: Arc<RingBuffer<T>>,
    tail: u64,
}

impl<T: Sample> Consumer<T> {
    /// Pop up to `n` samples without blocking.
    ///
    /// In normal mode the oldest buffered samples are returned. With `latest`
    /// the read position first skips ahead so that only the newest `n`
    /// samples remain, and those are returned.
    ///
    /// If the source has never produced, the window is empty and carries no
    /// timestamp.
    pub fn pop_window(&mut self, n: usize, latest: bool) -> Window<T> {
        let shared = &*self.shared;
        let head = shared.head.load(Ordering::Acquire);
        if shared.anchor.last_write().is_none() {
            return Window::empty();
        }

        let mut start = self.tail.max(head.saturating_sub(shared.limit()));
        if latest {
            start = start.max(head.saturating_sub(n as u64));
        }
        let end = head.min(start.saturating_add(n as u64));
        debug_assert!(end >= start);

        let mut samples: Vec<T> = (start..end).map(|pos| T::load(shared.cell(pos))).collect();

        // Positions the producer may have started overwriting during the copy.
        fence(Ordering::Acquire);
        let head_now = shared.head.load(Ordering::Relaxed);
        let reused = (head_now + 1).saturating_sub(shared.capacity() as u64);
        let mut first = start;
        if reused > start {
            let lost = (reused.min(end) - start) as usize;
            samples.drain(..lost);
            first += lost as u64;
        }

        self.tail = end;
        shared.tail.store(end, Ordering::Release);

        // Tolerated race: the anchor may already describe a batch that is
        // still being written, which skews the timestamp by at most one batch.
        Window {
            samples,
            start_time: shared.anchor.time_of(head - first),
        }
    }

    /// Samples currently buffered, as last seen.
    pub fn len(&self) -> usize {
        let head = self.shared.head.load(Ordering::Acquire);
        (head - self.tail.min(head)).min(self.shared.limit()) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the producer has ever committed a batch.
    pub fn has_produced(&self) -> bool {
        self.shared.anchor.last_write().is_some()
    }

    pub fn rate(&self) -> f64 {
        self.shared.anchor.rate()
    }

    pub fn overflow_count(&self) -> u64 {
        self.shared.overflows.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn filled(capacity: usize, values: impl IntoIterator<Item = f64>) -> (Producer<f64>, Consumer<f64>) {
        let (mut tx, rx) = RingBuffer::<f64>::new(capacity, 10.0).split();
        for v in values {
            tx.push(v);
        }
        tx.commit(100.0);
        (tx, rx)
    }

    #[test]
    fn test_never_produced() {
        let (_tx, mut rx) = RingBuffer::<f64>::new(16, 10.0).split();
        let window = rx.pop_window(8, false);
        assert!(window.is_empty());
        assert!(window.start_time.is_none());
        assert!(!rx.has_produced());
    }

    #[test]
    fn test_fifo_order() {
        let (_tx, mut rx) = filled(100, (0..20).map(f64::from));
        let first = rx.pop_window(7, false);
        let second = rx.pop_window(100, false);
        assert_eq!(first.samples, (0..7).map(f64::from).collect::<Vec<_>>());
        assert_eq!(second.samples, (7..20).map(f64::from).collect::<Vec<_>>());
        assert!(rx.pop_window(10, false).is_empty());
    }

    #[test]
    fn test_window_bounded_by_request_and_occupancy() {
        let (_tx, mut rx) = filled(100, (0..10).map(f64::from));
        assert_eq!(rx.len(), 10);
        assert_eq!(rx.pop_window(4, false).len(), 4);
        assert_eq!(rx.pop_window(100, false).len(), 6);
        assert_eq!(rx.pop_window(0, false).len(), 0);
    }

    #[test]
    fn test_latest_discards_backlog() {
        let (_tx, mut rx) = filled(1_000, (1..=100).map(f64::from));
        let window = rx.pop_window(5, true);
        assert_eq!(window.samples, vec![96.0, 97.0, 98.0, 99.0, 100.0]);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_latest_with_short_backlog() {
        let (_tx, mut rx) = filled(1_000, (1..=3).map(f64::from));
        assert_eq!(rx.pop_window(5, true).samples, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_unbounded_request_after_partial_read() {
        let (_tx, mut rx) = filled(16, (0..5).map(f64::from));
        assert_eq!(rx.pop_window(1, false).samples, vec![0.0]);
        assert_eq!(rx.pop_window(usize::MAX, false).samples, vec![1.0, 2.0, 3.0, 4.0]);
        assert!(rx.pop_window(usize::MAX, false).is_empty());
    }

    #[test]
    fn test_unbounded_latest_request_after_partial_read() {
        let (_tx, mut rx) = filled(16, (0..5).map(f64::from));
        assert_eq!(rx.pop_window(2, false).samples, vec![0.0, 1.0]);
        let window = rx.pop_window(usize::MAX, true);
        assert_eq!(window.samples, vec![2.0, 3.0, 4.0]);
        assert_relative_eq!(window.start_time.unwrap(), 100.0 - 3.0 / 10.0);
        assert!(rx.pop_window(usize::MAX, true).is_empty());
    }

    #[test]
    fn test_overflow_keeps_newest() {
        let (tx, mut rx) = filled(10, (1..=15).map(f64::from));
        assert_eq!(tx.overflow_count(), 6);
        assert_eq!(rx.len(), 9);
        let window = rx.pop_window(100, false);
        assert_eq!(window.samples, (7..=15).map(f64::from).collect::<Vec<_>>());
        assert_eq!(rx.overflow_count(), 6);
    }

    #[test]
    fn test_push_reports_room() {
        let (mut tx, mut rx) = RingBuffer::<f64>::new(3, 10.0).split();
        assert!(tx.push(1.0));
        assert!(tx.push(2.0));
        assert!(!tx.push(3.0));
        tx.commit(0.0);
        rx.pop_window(10, false);
        assert!(tx.push(4.0));
    }

    #[test]
    fn test_timestamp_of_first_sample() {
        let (mut tx, mut rx) = RingBuffer::<f64>::new(1_000, 10.0).split();
        let t0 = 1_700_000_000.0;
        for i in 1..=50 {
            tx.push(i as f64 / 10.0);
        }
        tx.commit(t0 + 5.0);
        let window = rx.pop_window(20, false);
        assert_relative_eq!(window.start_time.unwrap(), t0, epsilon = 1e-6);
        assert_relative_eq!(window.end_time(10.0).unwrap(), t0 + 2.0, epsilon = 1e-6);
        let rest = rx.pop_window(100, false);
        assert_relative_eq!(rest.start_time.unwrap(), t0 + 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_complex_samples() {
        let (mut tx, mut rx) = RingBuffer::<Complex<f64>>::new(8, 1.0).split();
        tx.push_slice(&[Complex::new(1.0, -1.0), Complex::new(0.5, 0.25)]);
        tx.commit(0.0);
        let window = rx.pop_window(8, false);
        assert_eq!(window.samples, vec![Complex::new(1.0, -1.0), Complex::new(0.5, 0.25)]);
    }

    #[test]
    fn test_with_duration() {
        let ring = RingBuffer::<f64>::with_duration(30, 12_000);
        assert_eq!(ring.capacity(), 360_000);
    }

    #[test]
    #[should_panic(expected = "capacity must be at least 2")]
    fn test_capacity_too_small() {
        let _ = RingBuffer::<f64>::new(1, 1.0);
    }

    #[test]
    fn test_concurrent_windows_are_contiguous() {
        const TOTAL: u64 = 200_000;
        let (mut tx, mut rx) = RingBuffer::<f64>::new(64, 1_000.0).split();

        let producer = std::thread::spawn(move || {
            for i in 0..TOTAL {
                tx.push(i as f64);
                if i % 16 == 15 {
                    tx.commit(i as f64);
                }
            }
            tx.commit(TOTAL as f64);
        });

        let mut last = -1.0;
        loop {
            let window = rx.pop_window(17, false);
            for pair in window.samples.windows(2) {
                assert_eq!(pair[1], pair[0] + 1.0);
            }
            if let Some(&first) = window.samples.first() {
                assert!(first > last);
                last = *window.samples.last().unwrap();
            }
            if last == (TOTAL - 1) as f64 {
                break;
            }
            if producer.is_finished() && rx.is_empty() {
                break;
            }
        }
        producer.join().unwrap();
    }
}
