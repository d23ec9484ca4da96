//! Sample sources.
//!
//! A [`SoundIn`] is chosen from a textual [`SourceSpec`] and is one of:
//!
//! - a sound-card input ([`card::CardSource`]), `"<card-index>,<channel>"`
//! - an Airspy HF+ receiver ([`airspy::AirspySource`]), `"airspy,<serial-or-dash>[,<MHz>]"`
//! - a WAV recording replayed in real time ([`file::FileSource`]), `"file,<path>"`
//!
//! Every source goes through the same states: constructed (unopened), then
//! [`SoundIn::start`] allocates its ring buffer and registers the producer with
//! the device (started), and once the first batch arrives it is producing.
//! There is no stop state; dropping the source releases the device.
//!
//! Reads never block. A consumer that wants to wait for data polls, for
//! example through [`windows`], which sleeps between empty reads.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::Stream;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::ring::{Consumer, Sample, Window};

pub mod airspy;
pub mod card;
pub mod file;

pub use airspy::{AirspyConfig, AirspySource, SdrProducer};
pub use card::{CardConfig, CardProducer, CardSource, StreamErrors};
pub use file::{FileConfig, FileSource};

/// Parsed form of a source specification string.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSpec {
    /// `"<card-index>,<channel>"`
    Card { card: usize, channel: usize },
    /// `"file,<path>"`
    File { path: String },
    /// `"airspy,<serial-or-dash>[,<MHz>]"`; the serial is hexadecimal
    Airspy { serial: Option<u64>, mhz: Option<f64> },
}

impl FromStr for SourceSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, rest) = match s.split_once(',') {
            Some((kind, rest)) => (kind.trim(), Some(rest.trim())),
            None => (s.trim(), None),
        };

        if kind.starts_with(|c: char| c.is_ascii_digit()) {
            let card = kind
                .parse()
                .map_err(|_| Error::config(format!("bad card index in {:?}", s)))?;
            let channel = match rest {
                Some(ch) if !ch.is_empty() => ch
                    .parse()
                    .map_err(|_| Error::config(format!("bad channel in {:?}", s)))?,
                _ => 0,
            };
            return Ok(SourceSpec::Card { card, channel });
        }

        match kind {
            "file" => match rest {
                Some(path) if !path.is_empty() => Ok(SourceSpec::File {
                    path: path.to_string(),
                }),
                _ => Err(Error::config(format!("missing file path in {:?}", s))),
            },
            "airspy" => {
                let (serial, mhz) = match rest {
                    Some(rest) => match rest.split_once(',') {
                        Some((serial, mhz)) => (serial.trim(), Some(mhz.trim())),
                        None => (rest, None),
                    },
                    None => ("", None),
                };
                let serial = match serial {
                    "" | "-" => None,
                    hex => Some(
                        u64::from_str_radix(hex, 16)
                            .map_err(|_| Error::config(format!("bad airspy serial {:?}", hex)))?,
                    ),
                };
                let mhz = mhz
                    .map(|m| {
                        m.parse::<f64>()
                            .map_err(|_| Error::config(format!("bad frequency {:?} MHz", m)))
                    })
                    .transpose()?;
                Ok(SourceSpec::Airspy { serial, mhz })
            }
            _ => Err(Error::config(format!("source type not recognized: {:?}", s))),
        }
    }
}

/// Lifecycle of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Constructed, nothing allocated, no device engaged.
    Unopened,
    /// Ring buffer allocated and producer registered; no batch seen yet.
    Started,
    /// At least one batch has been written.
    Producing,
}

/// Counters bumped by a producer context in place of reporting errors.
#[derive(Debug, Default)]
pub struct Stats {
    device_overruns: AtomicU64,
    dropped_samples: AtomicU64,
}

impl Stats {
    /// Hardware reported an input overflow or a similar glitch.
    pub fn record_overrun(&self) {
        self.device_overruns.fetch_add(1, Ordering::Relaxed);
    }

    /// Hardware reported `n` samples lost before the current transfer.
    pub fn record_dropped(&self, n: u64) {
        self.dropped_samples.fetch_add(n, Ordering::Relaxed);
    }
}

/// Point-in-time copy of a source's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Samples given up because the ring buffer was full.
    pub overflows: u64,
    /// Overrun/underrun flags reported by the device.
    pub device_overruns: u64,
    /// Samples the device reported as dropped (replaced by zeros).
    pub dropped_samples: u64,
}

/// Consumer side of a started source: its ring buffer reader plus the
/// counters shared with the producer.
pub(crate) struct Capture<T: Sample> {
    consumer: Consumer<T>,
    stats: Arc<Stats>,
    reported: StatsSnapshot,
    label: String,
}

impl<T: Sample> Capture<T> {
    pub(crate) fn new(consumer: Consumer<T>, stats: Arc<Stats>, label: String) -> Self {
        Self {
            consumer,
            stats,
            reported: StatsSnapshot::default(),
            label,
        }
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            overflows: self.consumer.overflow_count(),
            device_overruns: self.stats.device_overruns.load(Ordering::Relaxed),
            dropped_samples: self.stats.dropped_samples.load(Ordering::Relaxed),
        }
    }

    /// Pop a window, logging whatever the producer recorded since the last poll.
    pub(crate) fn poll(&mut self, n: usize, latest: bool) -> Window<T> {
        let now = self.snapshot();
        if now.overflows > self.reported.overflows {
            warn!(
                "{}: ring buffer overflow, {} oldest samples lost",
                self.label,
                now.overflows - self.reported.overflows
            );
        }
        if now.device_overruns > self.reported.device_overruns {
            warn!(
                "{}: device reported {} overrun(s)",
                self.label,
                now.device_overruns - self.reported.device_overruns
            );
        }
        if now.dropped_samples > self.reported.dropped_samples {
            warn!(
                "{}: device dropped {} samples",
                self.label,
                now.dropped_samples - self.reported.dropped_samples
            );
        }
        self.reported = now;
        self.consumer.pop_window(n, latest)
    }

    pub(crate) fn has_produced(&self) -> bool {
        self.consumer.has_produced()
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.consumer.is_empty()
    }
}

/// Audio backends compiled into this build, probed once per process.
#[derive(Debug)]
pub struct Backends {
    #[cfg(feature = "card")]
    pub host: cpal::HostId,
    pub card: bool,
    pub airspy: bool,
}

static BACKENDS: OnceLock<Backends> = OnceLock::new();

/// Process-wide backend setup. Idempotent; called by every source's `start`.
pub fn ensure_initialized() -> &'static Backends {
    BACKENDS.get_or_init(|| {
        let backends = Backends {
            #[cfg(feature = "card")]
            host: cpal::default_host().id(),
            card: cfg!(feature = "card"),
            airspy: cfg!(feature = "airspy"),
        };
        info!(
            "soundin initialized (card: {}, airspy: {})",
            backends.card, backends.airspy
        );
        backends
    })
}

/// One read through the boundary API.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub samples: Vec<f64>,
    /// UNIX time just past the last returned sample; `None` if the source
    /// has never produced.
    pub time: Option<f64>,
}

impl Reading {
    fn from_window(window: Window<f64>, rate: u32) -> Self {
        Self {
            time: window.end_time(rate as f64),
            samples: window.samples,
        }
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }
}

/// A source of real samples, selected from a [`SourceSpec`].
pub enum SoundIn {
    Card(CardSource),
    Airspy(AirspySource),
    File(FileSource),
}

impl SoundIn {
    /// Build an unopened source. `wanted_rate` of `None` picks the source's default.
    pub fn new(spec: SourceSpec, wanted_rate: Option<u32>) -> Result<Self> {
        match spec {
            SourceSpec::Card { card, channel } => Ok(SoundIn::Card(CardSource::new(
                CardConfig::new(card, channel, wanted_rate),
            )?)),
            SourceSpec::Airspy { serial, mhz } => {
                let mut config = AirspyConfig::new(serial, wanted_rate);
                if let Some(mhz) = mhz {
                    config.center_hz = mhz * 1_000_000.0;
                }
                Ok(SoundIn::Airspy(AirspySource::new(config)?))
            }
            SourceSpec::File { path } => Ok(SoundIn::File(FileSource::new(FileConfig::new(
                path,
                wanted_rate,
            ))?)),
        }
    }

    /// Parse `spec` and build an unopened source.
    pub fn from_spec(spec: &str, wanted_rate: Option<u32>) -> Result<Self> {
        Self::new(spec.parse()?, wanted_rate)
    }

    /// Samples per second delivered by [`SoundIn::get`].
    pub fn rate(&self) -> u32 {
        match self {
            SoundIn::Card(source) => source.rate(),
            SoundIn::Airspy(source) => source.rate(),
            SoundIn::File(source) => source.rate(),
        }
    }

    /// Engage the device and begin capturing.
    pub fn start(&mut self) -> Result<()> {
        ensure_initialized();
        match self {
            SoundIn::Card(source) => source.start(),
            SoundIn::Airspy(source) => source.start(),
            SoundIn::File(source) => source.start(),
        }
    }

    pub fn state(&self) -> State {
        match self {
            SoundIn::Card(source) => source.state(),
            SoundIn::Airspy(source) => source.state(),
            SoundIn::File(source) => source.state(),
        }
    }

    /// Up to `n` samples and the UNIX time of the first one. See
    /// [`crate::ring::Consumer::pop_window`] for `latest`.
    pub fn get(&mut self, n: usize, latest: bool) -> Result<Window<f64>> {
        match self {
            SoundIn::Card(source) => source.get(n, latest),
            SoundIn::Airspy(source) => source.get(n, latest),
            SoundIn::File(source) => source.get(n, latest),
        }
    }

    /// The most recent `max` samples, discarding older backlog, and the time
    /// just past the last of them.
    pub fn read(&mut self, max: usize) -> Result<Reading> {
        let rate = self.rate();
        self.get(max, true).map(|w| Reading::from_window(w, rate))
    }

    /// Retune; returns the frequency the caller asked for. Sources without a
    /// tuner accept and ignore it.
    pub fn set_freq(&mut self, hz: f64) -> Result<f64> {
        match self {
            SoundIn::Airspy(source) => source.set_freq(hz),
            SoundIn::Card(source) => source.require_started().map(|_| hz),
            SoundIn::File(source) => source.require_started().map(|_| hz),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        match self {
            SoundIn::Card(source) => source.stats(),
            SoundIn::Airspy(source) => source.stats(),
            SoundIn::File(source) => source.stats(),
        }
    }

    /// Receiver serial number, for SDR sources.
    pub fn serial(&self) -> Option<u64> {
        match self {
            SoundIn::Airspy(source) => source.serial(),
            _ => None,
        }
    }

    /// True once a finite source has delivered everything it has.
    pub fn is_exhausted(&self) -> bool {
        match self {
            SoundIn::File(source) => source.is_exhausted(),
            _ => false,
        }
    }
}

/// Consecutive readings of up to `max` samples, oldest first, sleeping
/// `backoff` whenever the source has nothing new. Ends once a file source runs
/// out or a read fails.
pub fn windows(
    source: SoundIn,
    max: usize,
    backoff: Duration,
) -> impl Stream<Item = Result<Reading>> {
    futures::stream::unfold(Some(source), move |state| async move {
        let mut source = state?;
        let rate = source.rate();
        loop {
            match source.get(max, false).map(|w| Reading::from_window(w, rate)) {
                Ok(reading) if reading.samples.is_empty() => {
                    if source.is_exhausted() {
                        return None;
                    }
                    tokio::time::sleep(backoff).await;
                }
                Ok(reading) => return Some((Ok(reading), Some(source))),
                Err(e) => return Some((Err(e), None)),
            }
        }
    })
}

pub(crate) fn state_of<T: Sample>(capture: Option<&Capture<T>>) -> State {
    match capture {
        None => State::Unopened,
        Some(c) if c.has_produced() => State::Producing,
        Some(_) => State::Started,
    }
}
