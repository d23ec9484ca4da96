//! Audio output.
//!
//! [`SoundOut`] plays real samples in `[-1, 1]` on the default output device.
//! Samples are scaled by the configured gain before they are queued; values
//! that would clip are counted and reported.
//!
//! Playback needs the `playback` feature. [`scale_for_output`] is available
//! without it.

use tracing::warn;

/// Default output gain, a little under half of full scale.
pub const OUTPUT_GAIN: f64 = 16380.0 / 32767.0;

/// Output settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    pub rate: u32,
    pub gain: f64,
    /// Queue length in seconds before `write` starts waiting for the device
    pub queue_seconds: usize,
}

impl SinkConfig {
    pub fn new(rate: u32) -> Self {
        Self {
            rate,
            gain: OUTPUT_GAIN,
            queue_seconds: 2,
        }
    }
}

/// Scale `samples` by `gain` for the device; returns the scaled samples and
/// how many inputs were outside `[-1, 1]`. Out-of-range outputs are clamped.
pub fn scale_for_output(samples: &[f64], gain: f64) -> (Vec<f32>, usize) {
    let mut clipped = 0;
    let out = samples
        .iter()
        .map(|&x| {
            if x.abs() > 1.0 {
                clipped += 1;
            }
            (x * gain).clamp(-1.0, 1.0) as f32
        })
        .collect();
    if clipped > 0 {
        warn!("{} of {} output samples out of range", clipped, samples.len());
    }
    (out, clipped)
}

#[cfg(feature = "playback")]
pub use playback::SoundOut;

#[cfg(feature = "playback")]
mod playback {
    use crossbeam::channel::{self, Sender};
    use tinyaudio::prelude::*;
    use tracing::info;

    use super::{SinkConfig, scale_for_output};
    use crate::error::{Error, Result};

    /// Real-sample output to the default sound device.
    pub struct SoundOut {
        config: SinkConfig,
        queue: Option<Sender<f32>>,
        _device: Option<OutputDevice>,
        clipped: u64,
    }

    impl SoundOut {
        pub fn new(config: SinkConfig) -> Result<Self> {
            if config.rate == 0 {
                return Err(Error::config("output sample rate must be positive"));
            }
            Ok(Self {
                config,
                queue: None,
                _device: None,
                clipped: 0,
            })
        }

        pub fn rate(&self) -> u32 {
            self.config.rate
        }

        /// Samples reported out of range since the sink was created.
        pub fn clipped(&self) -> u64 {
            self.clipped
        }

        pub fn start(&mut self) -> Result<()> {
            crate::source::ensure_initialized();
            let (tx, rx) =
                channel::bounded::<f32>(self.config.rate as usize * self.config.queue_seconds);
            let params = OutputDeviceParameters {
                channels_count: 1,
                sample_rate: self.config.rate as usize,
                channel_sample_count: self.config.rate as usize / 50,
            };
            let device = run_output_device(params, move |data| {
                for sample in data.iter_mut() {
                    *sample = rx.try_recv().unwrap_or(0.0);
                }
            })
            .map_err(|e| Error::device(format!("cannot open audio output: {}", e)))?;

            info!("playing at {} Hz", self.config.rate);
            self.queue = Some(tx);
            self._device = Some(device);
            Ok(())
        }

        /// Queue `samples` for playback, waiting if the queue is full.
        pub fn write(&mut self, samples: &[f64]) -> Result<()> {
            let queue = self.queue.as_ref().ok_or(Error::NotStarted)?;
            let (scaled, clipped) = scale_for_output(samples, self.config.gain);
            self.clipped += clipped as u64;
            for s in scaled {
                queue
                    .send(s)
                    .map_err(|_| Error::device("audio output has stopped"))?;
            }
            Ok(())
        }
    }
}
