//! Test helper utilities for generating synthetic audio and I/Q signals
#![allow(dead_code)]

use std::f64::consts::PI;
use std::path::PathBuf;

use num_complex::Complex;

/// Generate a real sine wave
///
/// # Arguments
/// * `frequency` - Frequency in Hz
/// * `amplitude` - Peak value
/// * `sample_rate` - Sample rate in Hz
/// * `num_samples` - Number of samples to generate
pub fn sine(frequency: f64, amplitude: f64, sample_rate: u32, num_samples: usize) -> Vec<f64> {
    let w = 2.0 * PI * frequency / sample_rate as f64;
    (0..num_samples).map(|n| amplitude * (w * n as f64).sin()).collect()
}

/// Generate a complex tone; negative frequencies sit below the tuned frequency
pub fn iq_tone(frequency: f64, amplitude: f32, sample_rate: u32, num_samples: usize) -> Vec<Complex<f32>> {
    let w = 2.0 * PI * frequency / sample_rate as f64;
    (0..num_samples)
        .map(|n| Complex::from_polar(amplitude, (w * n as f64) as f32))
        .collect()
}

/// Mean power of a real signal
pub fn power(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|x| x * x).sum::<f64>() / samples.len() as f64
}

/// Write a mono 16-bit WAV file into the temp directory
pub fn write_wav(name: &str, sample_rate: u32, samples: &[f64]) -> PathBuf {
    let path = std::env::temp_dir().join(format!("soundin-{}-{}.wav", std::process::id(), name));
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).expect("Failed to create WAV file");
    for &x in samples {
        writer
            .write_sample((x * 32767.0).round() as i16)
            .expect("Failed to write sample");
    }
    writer.finalize().expect("Failed to finalize WAV file");
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sine_length_and_power() {
        let x = sine(1_000.0, 0.5, 8_000, 8_000);
        assert_eq!(x.len(), 8_000);
        assert_relative_eq!(power(&x), 0.125, epsilon = 1e-9);
    }

    #[test]
    fn test_iq_tone_unit_magnitude() {
        for c in iq_tone(-3_000.0, 1.0, 192_000, 100) {
            assert_relative_eq!(c.norm(), 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_power_of_empty() {
        assert_eq!(power(&[]), 0.0);
    }
}
