//! SDR path without hardware: device-rate I/Q through the decimation filter,
//! ring buffer and sideband demodulator

mod helpers;

use approx::assert_relative_eq;
use soundin::dsp::phasing::Sideband;
use soundin::source::{AirspyConfig, AirspySource};

const DEVICE_RATE: u32 = 192_000;

fn audio_power(sideband: Sideband, tone_hz: f64) -> f64 {
    let mut config = AirspyConfig::new(None, Some(12_000));
    config.sideband = sideband;
    let mut source = AirspySource::new(config).unwrap();
    let mut producer = source.start_external().unwrap();

    // one second, delivered in device-sized transfers
    let iq = helpers::iq_tone(tone_hz, 0.5, DEVICE_RATE, DEVICE_RATE as usize);
    for (k, chunk) in iq.chunks(16_384).enumerate() {
        producer.on_transfer(chunk, 0, 100.0 + k as f64 * 0.085);
    }

    let audio = source.get(12_000, false).unwrap();
    assert_eq!(audio.len(), 12_000);
    helpers::power(&audio.samples[1_000..11_000])
}

#[test]
fn test_usb_passes_tone_above_carrier() {
    assert_relative_eq!(audio_power(Sideband::Upper, 1_500.0), 0.5, epsilon = 0.05);
}

#[test]
fn test_usb_rejects_tone_below_carrier() {
    let wanted = audio_power(Sideband::Upper, 1_500.0);
    let unwanted = audio_power(Sideband::Upper, -1_500.0);
    assert!(unwanted < wanted * 1e-3, "rejection too small: {} vs {}", unwanted, wanted);
}

#[test]
fn test_lsb_passes_tone_below_carrier() {
    assert_relative_eq!(audio_power(Sideband::Lower, -1_500.0), 0.5, epsilon = 0.05);
    assert!(audio_power(Sideband::Lower, 1_500.0) < 1e-3);
}

#[test]
fn test_out_of_band_tone_is_filtered_before_decimation() {
    // 40 kHz would alias to 4 kHz at 12 kHz without the low-pass filter
    assert!(audio_power(Sideband::Upper, 40_000.0) < 1e-4);
}

#[test]
fn test_raw_iq_window_is_timestamped() {
    let mut source = AirspySource::new(AirspyConfig::new(None, None)).unwrap();
    let mut producer = source.start_external().unwrap();
    producer.on_transfer(&helpers::iq_tone(0.0, 1.0, DEVICE_RATE, 1_600), 0, 7.0);

    let window = source.get_iq(1_000, true).unwrap();
    assert_eq!(window.len(), 100);
    assert_relative_eq!(window.end_time(12_000.0).unwrap(), 7.0);
    assert_eq!(source.stats().overflows, 0);
}

#[test]
fn test_pure_i_sinusoid_keeps_its_tone() {
    use num_complex::Complex;
    use soundin::dsp::phasing::PhasingDemodulator;

    // 750 Hz on I only, 1200 samples at 12 kHz: not a quantum multiple
    let i = helpers::sine(750.0, 1.0, 12_000, 1_200);
    let iq: Vec<Complex<f64>> = i.iter().map(|&x| Complex::new(x, 0.0)).collect();
    let out = PhasingDemodulator::new(12_000).demodulate(&iq);
    assert_eq!(out.len(), iq.len());

    // away from the edges the output is the tone itself
    let middle = 200..1_000;
    let err: f64 = middle.clone().map(|k| (out[k] - i[k]).powi(2)).sum();
    let energy: f64 = middle.map(|k| i[k].powi(2)).sum();
    assert!(err < energy * 1e-2, "residual {} of {}", err, energy);
}
