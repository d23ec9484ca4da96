/// Digital Signal Processing (DSP) module.
///
/// Processing applied to SDR samples on their way through a source:
///
/// ```text
/// I/Q @ device rate → DecimationFilter → RingBuffer → PhasingDemodulator → SSB audio
///                      (producer side)                 (consumer side)
/// ```
///
/// # Modules
/// - [`decimator`]: streaming Kaiser-windowed low-pass filter with integer-ratio downsampling
/// - [`phasing`]: phasing-method single-sideband demodulation of popped I/Q windows
///
/// # Traits
/// - [`DspBlock`]: a stateful block that turns a slice of complex samples into
///   a vector of complex samples.
///
/// # Thread Safety
///
/// DSP blocks keep internal state and are not shared: the decimation filter
/// lives in the producer context, the demodulator in the consumer context.
use num_complex::Complex;

pub mod decimator;
pub mod phasing;

/// Trait for DSP blocks that process complex-valued signals.
///
/// The output length may differ from the input length (decimation shortens it).
///
/// # Examples
///
/// ```
/// use soundin::dsp::{DspBlock, decimator::DecimationFilter};
/// use num_complex::Complex;
///
/// let mut filter = DecimationFilter::new(192_000, 12_000, 0.01, 60.0).unwrap();
/// let input = vec![Complex::new(1.0, 0.0); 1600];
/// let output = filter.process(&input);
/// assert_eq!(output.len(), 100);
/// ```
pub trait DspBlock {
    fn process(&mut self, data: &[Complex<f64>]) -> Vec<Complex<f64>>;
}
