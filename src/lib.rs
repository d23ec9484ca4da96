#![doc = include_str!("../readme.md")]

pub mod anchor;
pub mod dsp;
pub mod error;
pub mod ring;
pub mod sink;
pub mod source;

pub use anchor::{TimeAnchor, now};
pub use error::{Error, Result};
pub use ring::{Consumer, Producer, RingBuffer, Window};
#[cfg(feature = "playback")]
pub use sink::SoundOut;
pub use sink::{SinkConfig, scale_for_output};
pub use source::{
    Reading, SoundIn, SourceSpec, State, Stats, StatsSnapshot, ensure_initialized, windows,
};

/// Parse `spec`, build the source and start it.
///
/// `wanted_rate` of `None` uses the source's default rate. Errors are
/// [`Error::Config`] for a bad specification or rate, and [`Error::Device`]
/// when the device cannot be opened.
pub fn open(spec: &str, wanted_rate: Option<u32>) -> Result<SoundIn> {
    let mut source = SoundIn::from_spec(spec, wanted_rate)?;
    source.start()?;
    Ok(source)
}

/// Retune `source` and return the frequency asked for; see [`SoundIn::set_freq`].
pub fn set_frequency(source: &mut SoundIn, hz: f64) -> Result<f64> {
    source.set_freq(hz)
}
