//! Phasing-method single-sideband demodulation.
//!
//! A popped I/Q window is turned into real audio by taking the analytic signal
//! of the I component and, separately, of the Q component, then combining
//!
//! ```text
//! usb[i] = Re(analytic(I))[i] - Im(analytic(Q))[i]
//! lsb[i] = Re(analytic(I))[i] + Im(analytic(Q))[i]
//! ```
//!
//! Each analytic signal comes from one forward FFT over the whole window, the
//! negative-frequency half zeroed and the positive half doubled, and one inverse
//! FFT. Because the window is transformed in one piece rather than as a
//! continuous stream, the first and last few milliseconds are less accurate
//! than the middle.
//!
//! Windows are zero-padded up to a multiple of a size quantum (the sample rate
//! for windows over five seconds, 1000 for windows over 1000 samples, else
//! 100) so that successive reads of similar length hit the same cached FFT
//! plans. The padding is cut off again before returning.

use num_complex::Complex;
use rustfft::FftPlanner;

/// Which sideband the demodulator keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sideband {
    #[default]
    Upper,
    Lower,
}

/// Batch SSB demodulator for I/Q windows.
pub struct PhasingDemodulator {
    planner: FftPlanner<f64>,
    rate: usize,
    sideband: Sideband,
}

impl PhasingDemodulator {
    /// Upper-sideband demodulator for windows sampled at `rate`.
    pub fn new(rate: u32) -> Self {
        Self::with_sideband(rate, Sideband::Upper)
    }

    pub fn with_sideband(rate: u32, sideband: Sideband) -> Self {
        Self {
            planner: FftPlanner::new(),
            rate: rate.max(1) as usize,
            sideband,
        }
    }

    pub fn sideband(&self) -> Sideband {
        self.sideband
    }

    /// Demodulate `iq` into real audio of the same length.
    ///
    /// Fewer than two samples cannot be transformed; their real parts are
    /// returned unchanged.
    pub fn demodulate(&mut self, iq: &[Complex<f64>]) -> Vec<f64> {
        if iq.len() < 2 {
            return iq.iter().map(|c| c.re).collect();
        }

        let len = padded_len(iq.len(), self.rate);
        let mut i: Vec<f64> = iq.iter().map(|c| c.re).collect();
        let mut q: Vec<f64> = iq.iter().map(|c| c.im).collect();
        i.resize(len, 0.0);
        q.resize(len, 0.0);

        let ai = self.analytic(&i);
        let aq = self.analytic(&q);

        let sign = match self.sideband {
            Sideband::Upper => -1.0,
            Sideband::Lower => 1.0,
        };
        ai.iter()
            .zip(&aq)
            .take(iq.len())
            .map(|(a, b)| a.re + sign * b.im)
            .collect()
    }

    /// Analytic signal of a real sequence: the sequence plus `j` times its
    /// Hilbert transform.
    pub fn analytic(&mut self, x: &[f64]) -> Vec<Complex<f64>> {
        let n = x.len();
        let mut buf: Vec<Complex<f64>> = x.iter().map(|&v| Complex::new(v, 0.0)).collect();
        if n < 2 {
            return buf;
        }

        self.planner.plan_fft_forward(n).process(&mut buf);

        // keep DC (and Nyquist for even n), double positive bins, drop negative ones
        for bin in buf.iter_mut().take(n.div_ceil(2)).skip(1) {
            *bin *= 2.0;
        }
        for bin in buf.iter_mut().skip(n / 2 + 1) {
            *bin = Complex::new(0.0, 0.0);
        }

        self.planner.plan_fft_inverse(n).process(&mut buf);

        let scale = 1.0 / n as f64;
        for v in buf.iter_mut() {
            *v *= scale;
        }
        buf
    }
}

/// Length a window of `len` samples is zero-padded to before transforming.
pub fn padded_len(len: usize, rate: usize) -> usize {
    let quantum = if len > rate * 5 {
        rate
    } else if len > 1000 {
        1000
    } else {
        100
    };
    len.div_ceil(quantum) * quantum
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    const RATE: u32 = 12_000;

    fn tone(freq: f64, n: usize) -> Vec<Complex<f64>> {
        (0..n)
            .map(|k| Complex::from_polar(1.0, 2.0 * PI * freq * k as f64 / RATE as f64))
            .collect()
    }

    #[test]
    fn test_single_sample_passthrough() {
        let mut demod = PhasingDemodulator::new(RATE);
        assert_eq!(demod.demodulate(&[Complex::new(0.25, -0.75)]), vec![0.25]);
        assert!(demod.demodulate(&[]).is_empty());
    }

    #[test]
    fn test_padded_len() {
        assert_eq!(padded_len(2, 12_000), 100);
        assert_eq!(padded_len(150, 12_000), 200);
        assert_eq!(padded_len(1_000, 12_000), 1_000);
        assert_eq!(padded_len(1_001, 12_000), 2_000);
        assert_eq!(padded_len(60_000, 12_000), 60_000);
        assert_eq!(padded_len(60_001, 12_000), 72_000);
    }

    #[test]
    fn test_output_truncated_to_input_length() {
        let mut demod = PhasingDemodulator::new(RATE);
        for n in [2, 99, 101, 1_234, 61_000] {
            assert_eq!(demod.demodulate(&tone(500.0, n)).len(), n);
        }
    }

    #[test]
    fn test_analytic_of_cosine() {
        let mut demod = PhasingDemodulator::new(RATE);
        // 600 Hz over 2000 samples is a whole number of cycles
        let x: Vec<f64> = tone(600.0, 2_000).iter().map(|c| c.re).collect();
        let a = demod.analytic(&x);
        for (k, v) in a.iter().enumerate() {
            let phase = 2.0 * PI * 600.0 * k as f64 / RATE as f64;
            assert_relative_eq!(v.re, phase.cos(), epsilon = 1e-9);
            assert_relative_eq!(v.im, phase.sin(), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_upper_sideband_selection() {
        let mut demod = PhasingDemodulator::new(RATE);

        let upper = demod.demodulate(&tone(600.0, 2_000));
        let lower = demod.demodulate(&tone(-600.0, 2_000));

        for (k, (u, l)) in upper.iter().zip(&lower).enumerate() {
            let phase = 2.0 * PI * 600.0 * k as f64 / RATE as f64;
            assert_relative_eq!(*u, 2.0 * phase.cos(), epsilon = 1e-9);
            assert_relative_eq!(*l, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_lower_sideband_selection() {
        let mut demod = PhasingDemodulator::with_sideband(RATE, Sideband::Lower);
        assert_eq!(demod.sideband(), Sideband::Lower);

        let upper = demod.demodulate(&tone(600.0, 2_000));
        let lower = demod.demodulate(&tone(-600.0, 2_000));

        let energy = |v: &[f64]| v.iter().map(|x| x * x).sum::<f64>();
        assert!(energy(&upper) < 1e-12);
        assert_relative_eq!(energy(&lower), 4.0 * 1_000.0, epsilon = 1e-6);
    }
}
