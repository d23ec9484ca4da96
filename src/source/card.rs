//! Sound-card input.
//!
//! The card delivers interleaved 16-bit frames. The producer keeps one channel,
//! divides it by 32767 and pushes it into the ring buffer; each block is
//! timed from the card's own capture clock, mapped once onto wall-clock time,
//! so scheduling jitter in the callback does not leak into the timestamps.
//!
//! The device is driven through `cpal` when the `card` feature is enabled.

use std::fmt::Display;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{Capture, State, Stats, StatsSnapshot, state_of};
use crate::anchor::StreamClock;
use crate::error::{Error, Result};
use crate::ring::{Producer, RingBuffer, Window};

/// Full scale of a 16-bit sample.
pub const I16_SCALE: f64 = 32767.0;

/// Rate used when the caller does not ask for one.
#[cfg(target_os = "linux")]
pub const DEFAULT_CARD_RATE: u32 = 48_000;
#[cfg(not(target_os = "linux"))]
pub const DEFAULT_CARD_RATE: u32 = 12_000;

/// Sound-card source settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CardConfig {
    /// Input device index, in host enumeration order
    pub card: usize,
    /// 0 selects the left (or only) channel, 1 the right channel of a stereo pair
    pub channel: usize,
    pub rate: u32,
    pub buffer_seconds: usize,
}

impl CardConfig {
    pub fn new(card: usize, channel: usize, rate: Option<u32>) -> Self {
        Self {
            card,
            channel,
            rate: rate.unwrap_or(DEFAULT_CARD_RATE),
            buffer_seconds: 30,
        }
    }

    /// Channels to open: mono for channel 0, stereo for channel 1.
    pub fn channels(&self) -> u16 {
        if self.channel == 0 { 1 } else { 2 }
    }
}

/// Producer context of a card source: what the audio callback runs.
pub struct CardProducer {
    producer: Producer<f64>,
    channel: usize,
    channels: usize,
    rate: f64,
    clock: StreamClock,
    stats: Arc<Stats>,
}

impl CardProducer {
    /// Handle one interleaved block captured at `hw_time` on the card's clock.
    ///
    /// `overflowed` is the driver's input-overflow flag for this block; it is
    /// only counted. Partial trailing frames are ignored.
    pub fn on_block(&mut self, interleaved: &[i16], hw_time: f64, overflowed: bool, wall_now: f64) {
        if overflowed {
            self.stats.record_overrun();
        }

        let frames = interleaved.len() / self.channels;
        for frame in interleaved.chunks_exact(self.channels) {
            self.producer.push(frame[self.channel] as f64 / I16_SCALE);
        }

        let end = self.clock.block_end(hw_time, frames, self.rate, wall_now);
        self.producer.commit(end);
    }

    /// Handle for the device's error callback, sharing this producer's counters.
    pub fn error_handler(&self, card: usize) -> StreamErrors {
        StreamErrors {
            card,
            stats: self.stats.clone(),
        }
    }
}

/// Error side of a card stream. Backends report input overruns through the
/// error callback, so every stream error is counted as one.
pub struct StreamErrors {
    card: usize,
    stats: Arc<Stats>,
}

impl StreamErrors {
    pub fn on_error(&self, err: impl Display) {
        warn!("card {}: stream error: {}", self.card, err);
        self.stats.record_overrun();
    }
}

/// A sound-card input channel.
pub struct CardSource {
    config: CardConfig,
    capture: Option<Capture<f64>>,
    #[cfg(feature = "card")]
    _stream: Option<cpal::Stream>,
}

impl CardSource {
    pub fn new(config: CardConfig) -> Result<Self> {
        if config.channel > 1 {
            return Err(Error::config(format!(
                "card {} channel {} unsupported, expected 0 or 1",
                config.card, config.channel
            )));
        }
        if config.rate == 0 {
            return Err(Error::config("card sample rate must be positive"));
        }
        Ok(Self {
            config,
            capture: None,
            #[cfg(feature = "card")]
            _stream: None,
        })
    }

    pub fn config(&self) -> &CardConfig {
        &self.config
    }

    pub fn rate(&self) -> u32 {
        self.config.rate
    }

    pub fn state(&self) -> State {
        state_of(self.capture.as_ref())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.capture
            .as_ref()
            .map(Capture::snapshot)
            .unwrap_or_default()
    }

    /// Allocate the ring buffer and hand back the producer context for the
    /// caller to drive. [`CardSource::start`] does this and registers the
    /// context with the device.
    pub fn start_external(&mut self) -> Result<CardProducer> {
        if self.capture.is_some() {
            return Err(Error::device(format!("card {} already started", self.config.card)));
        }
        let ring = RingBuffer::with_duration(self.config.buffer_seconds, self.config.rate);
        let (producer, consumer) = ring.split();
        let stats = Arc::new(Stats::default());
        let label = format!("card {}:{}", self.config.card, self.config.channel);
        debug!(
            "{}: ring buffer of {} samples at {} Hz",
            label,
            producer.capacity(),
            self.config.rate
        );
        self.capture = Some(Capture::new(consumer, stats.clone(), label));
        Ok(CardProducer {
            producer,
            channel: self.config.channel,
            channels: self.config.channels() as usize,
            rate: self.config.rate as f64,
            clock: StreamClock::new(),
            stats,
        })
    }

    #[cfg(feature = "card")]
    pub fn start(&mut self) -> Result<()> {
        let producer = self.start_external()?;
        match backend::open(&self.config, producer) {
            Ok(stream) => {
                info!(
                    "card {} channel {} capturing at {} Hz",
                    self.config.card, self.config.channel, self.config.rate
                );
                self._stream = Some(stream);
                Ok(())
            }
            Err(e) => {
                self.capture = None;
                Err(e)
            }
        }
    }

    #[cfg(not(feature = "card"))]
    pub fn start(&mut self) -> Result<()> {
        info!("card {} requested without sound-card support", self.config.card);
        Err(Error::device(
            "sound-card support not compiled in (enable the `card` feature)",
        ))
    }

    pub(crate) fn require_started(&self) -> Result<()> {
        match self.capture {
            Some(_) => Ok(()),
            None => Err(Error::NotStarted),
        }
    }

    pub fn get(&mut self, n: usize, latest: bool) -> Result<Window<f64>> {
        let capture = self.capture.as_mut().ok_or(Error::NotStarted)?;
        Ok(capture.poll(n, latest))
    }
}

#[cfg(feature = "card")]
mod backend {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    use super::{CardConfig, CardProducer};
    use crate::anchor::now;
    use crate::error::{Error, Result};
    use crate::source::ensure_initialized;

    pub(super) fn open(config: &CardConfig, mut producer: CardProducer) -> Result<cpal::Stream> {
        let host = cpal::host_from_id(ensure_initialized().host)
            .map_err(|e| Error::device(format!("audio host unavailable: {}", e)))?;
        let device = host
            .input_devices()
            .map_err(|e| Error::device(format!("cannot list input devices: {}", e)))?
            .nth(config.card)
            .ok_or_else(|| Error::device(format!("no input device with index {}", config.card)))?;

        let stream_config = cpal::StreamConfig {
            channels: config.channels(),
            sample_rate: cpal::SampleRate(config.rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let errors = producer.error_handler(config.card);
        let mut origin: Option<cpal::StreamInstant> = None;
        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[i16], info: &cpal::InputCallbackInfo| {
                    let capture = info.timestamp().capture;
                    let first = *origin.get_or_insert(capture);
                    let hw_time = capture
                        .duration_since(&first)
                        .map(|d| d.as_secs_f64())
                        .unwrap_or(0.0);
                    producer.on_block(data, hw_time, false, now());
                },
                move |err| errors.on_error(err),
                None,
            )
            .map_err(|e| {
                Error::device(format!(
                    "cannot open card {} at {} Hz: {}",
                    config.card, config.rate, e
                ))
            })?;

        stream
            .play()
            .map_err(|e| Error::device(format!("cannot start card {}: {}", config.card, e)))?;
        Ok(stream)
    }
}
