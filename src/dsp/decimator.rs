/// Streaming decimation filter.
///
/// Reduces a high-rate I/Q stream by an exact integer ratio `R = input_rate /
/// output_rate`. Every input sample is shifted through a Kaiser-windowed sinc
/// low-pass filter with its cutoff at `output_rate / 2`; every `R`-th filtered
/// sample is kept. The filter length follows from the requested transition
/// width and stopband attenuation (Kaiser's estimate), so a 60 dB design with a
/// 0.01 transition width yields 365 taps.
///
/// State is carried across calls for the lifetime of the filter and nothing is
/// allocated once it is built, so it can run inside a device callback.
///
/// # Example
///
/// ```rust
/// use soundin::dsp::decimator::DecimationFilter;
/// use num_complex::Complex;
///
/// let mut filter = DecimationFilter::new(192_000, 12_000, 0.01, 60.0).unwrap();
/// assert_eq!(filter.ratio(), 16);
///
/// let kept = (0..1600)
///     .filter_map(|_| filter.decimate(Complex::new(0.5, 0.0)))
///     .count();
/// assert_eq!(kept, 100);
///
/// // 192 kHz cannot be brought down to 11025 Hz by an integer ratio
/// assert!(DecimationFilter::new(192_000, 11_025, 0.01, 60.0).is_err());
/// ```
use num_complex::Complex;
use std::f64::consts::PI;

use super::DspBlock;
use crate::error::{Error, Result};

/// Default stopband attenuation in dB.
pub const DEFAULT_ATTENUATION_DB: f64 = 60.0;

/// Default transition width, as a fraction of the input rate.
pub const DEFAULT_TRANSITION_WIDTH: f64 = 0.01;

/// Low-pass FIR filter plus integer-ratio downsampler.
pub struct DecimationFilter {
    ratio: usize,
    taps: Vec<f64>,
    /// Delay line stored twice over so that the newest `taps.len()` samples
    /// are always contiguous at `history[pos..pos + taps.len()]`.
    history: Vec<Complex<f64>>,
    pos: usize,
    count: u64,
}

impl DecimationFilter {
    /// Design a filter taking `input_rate` down to `output_rate`.
    ///
    /// # Arguments
    /// * `transition_width` - transition band width, normalized to the input rate (0.0 to 0.5)
    /// * `attenuation_db` - stopband attenuation target
    ///
    /// # Errors
    /// Returns [`Error::Config`] if either rate is zero, the output rate is
    /// above the input rate, the ratio is not an integer, or the design
    /// parameters are out of range.
    pub fn new(
        input_rate: u32,
        output_rate: u32,
        transition_width: f64,
        attenuation_db: f64,
    ) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 {
            return Err(Error::config(format!(
                "decimation rates must be positive (got {} -> {})",
                input_rate, output_rate
            )));
        }
        if output_rate > input_rate || input_rate % output_rate != 0 {
            return Err(Error::config(format!(
                "decimation ratio {}/{} is not an integer",
                input_rate, output_rate
            )));
        }
        if !(transition_width > 0.0 && transition_width < 0.5) {
            return Err(Error::config(format!(
                "transition width {} outside (0, 0.5)",
                transition_width
            )));
        }
        if attenuation_db <= 0.0 {
            return Err(Error::config(format!(
                "stopband attenuation {} dB must be positive",
                attenuation_db
            )));
        }

        let len = estimate_filter_len(transition_width, attenuation_db);
        let cutoff = output_rate as f64 / input_rate as f64 / 2.0;
        let taps = kaiser_lowpass(len, cutoff, attenuation_db);

        Ok(Self {
            ratio: (input_rate / output_rate) as usize,
            history: vec![Complex::new(0.0, 0.0); 2 * taps.len()],
            taps,
            pos: 0,
            count: 0,
        })
    }

    /// Filter taking `input_rate` to `output_rate` with the default 60 dB / 0.01 design.
    pub fn with_defaults(input_rate: u32, output_rate: u32) -> Result<Self> {
        Self::new(
            input_rate,
            output_rate,
            DEFAULT_TRANSITION_WIDTH,
            DEFAULT_ATTENUATION_DB,
        )
    }

    /// Returns the decimation ratio.
    pub fn ratio(&self) -> usize {
        self.ratio
    }

    /// Returns the number of FIR taps.
    pub fn taps(&self) -> usize {
        self.taps.len()
    }

    /// Shift `x` into the filter and return the filtered sample for this instant.
    pub fn push_sample(&mut self, x: Complex<f64>) -> Complex<f64> {
        let len = self.taps.len();
        self.pos = if self.pos == 0 { len - 1 } else { self.pos - 1 };
        self.history[self.pos] = x;
        self.history[self.pos + len] = x;

        // history[pos] is the newest sample and pairs with taps[0]
        self.history[self.pos..self.pos + len]
            .iter()
            .zip(&self.taps)
            .fold(Complex::new(0.0, 0.0), |acc, (&s, &h)| acc + s * h)
    }

    /// Push `x` and return the filtered sample if it falls on the kept phase.
    ///
    /// The first sample pushed is kept, then every `ratio`-th one after it.
    pub fn decimate(&mut self, x: Complex<f64>) -> Option<Complex<f64>> {
        let y = self.push_sample(x);
        let keep = self.count % self.ratio as u64 == 0;
        self.count += 1;
        keep.then_some(y)
    }
}

impl DspBlock for DecimationFilter {
    fn process(&mut self, data: &[Complex<f64>]) -> Vec<Complex<f64>> {
        data.iter().filter_map(|&x| self.decimate(x)).collect()
    }
}

/// Kaiser's estimate of the filter length needed for a transition width `df`
/// (normalized) and stopband attenuation `att` dB.
pub fn estimate_filter_len(df: f64, att: f64) -> usize {
    let len = (att - 7.95) / (14.26 * df);
    (len.round() as usize).max(1)
}

/// Kaiser window shape parameter for a stopband attenuation in dB.
fn kaiser_beta(att: f64) -> f64 {
    if att > 50.0 {
        0.1102 * (att - 8.7)
    } else if att > 21.0 {
        0.5842 * (att - 21.0).powf(0.4) + 0.07886 * (att - 21.0)
    } else {
        0.0
    }
}

/// Zeroth-order modified Bessel function of the first kind.
fn bessel_i0(x: f64) -> f64 {
    let half = x / 2.0;
    let mut term = 1.0;
    let mut sum = 1.0;
    for k in 1..64 {
        term *= (half / k as f64) * (half / k as f64);
        sum += term;
        if term < sum * 1e-16 {
            break;
        }
    }
    sum
}

/// Kaiser-windowed sinc low-pass with cutoff `fc` (normalized, 0 to 0.5),
/// scaled to unity gain at DC.
fn kaiser_lowpass(len: usize, fc: f64, att: f64) -> Vec<f64> {
    let beta = kaiser_beta(att);
    let mid = (len as f64 - 1.0) / 2.0;
    let denom = bessel_i0(beta);

    let mut taps: Vec<f64> = (0..len)
        .map(|n| {
            let t = n as f64 - mid;
            let sinc = if t == 0.0 {
                2.0 * fc
            } else {
                (2.0 * PI * fc * t).sin() / (PI * t)
            };
            let r = if mid > 0.0 { t / mid } else { 0.0 };
            let window = bessel_i0(beta * (1.0 - r * r).max(0.0).sqrt()) / denom;
            sinc * window
        })
        .collect();

    let norm: f64 = taps.iter().sum();
    for v in taps.iter_mut() {
        *v /= norm;
    }
    taps
}
