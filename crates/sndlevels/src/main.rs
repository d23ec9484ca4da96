//! Input level monitor for soundin sources
//!
//! Reads a source continuously and prints, once per second's worth of samples,
//! the average and peak absolute level and the sample rate actually observed.
//!
//! # Usage Examples
//!
//! ## Sound card 0, left channel
//! ```bash
//! sndlevels 0,0
//! ```
//!
//! ## Airspy HF+ tuned to 7.074 MHz
//! ```bash
//! sndlevels airspy,- --freq 7.074M -v
//! ```
//!
//! ## WAV recording
//! ```bash
//! sndlevels file,~/capture.wav
//! ```

use std::str::FromStr;
use std::time::Duration;

use clap::{ArgAction, Parser};
use futures::StreamExt;
use tracing::{debug, info};

use soundin::{SoundIn, now, windows};

#[derive(Debug, Clone, Copy)]
struct Frequency(f64);

#[derive(Parser, Debug)]
#[command(author, version, about = "Print input levels of a sound card, SDR or recording", long_about = None)]
struct Args {
    /// Source: <card>,<channel> | airspy,<serial-or-dash>[,<MHz>] | file,<path>
    source: String,

    /// Sample rate in Hz (source default if omitted)
    #[arg(short, long)]
    rate: Option<u32>,

    /// Tune an SDR source to this frequency (accepts k/M suffix, e.g. 14.074M)
    #[arg(short, long, value_parser = Frequency::from_str)]
    freq: Option<Frequency>,

    /// Verbosity level (-v=info, -vv=debug, -vvv=trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> soundin::Result<()> {
    let args = Args::parse();

    // 0 = WARN (quiet), 1 = INFO, 2 = DEBUG, 3+ = TRACE
    let log_level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    let _ = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .try_init();

    let mut source = SoundIn::from_spec(&args.source, args.rate)?;
    source.start()?;
    if let Some(Frequency(hz)) = args.freq {
        source.set_freq(hz)?;
    }
    if let Some(serial) = source.serial() {
        info!("receiver serial {:x}", serial);
    }

    let rate = source.rate() as usize;
    info!("{} at {} Hz", args.source, rate);

    let mut levels = Levels::new(rate, now());
    let mut readings = std::pin::pin!(windows(source, rate, Duration::from_millis(100)));
    while let Some(reading) = readings.next().await {
        let reading = reading?;
        debug!("{} samples", reading.count());
        for line in levels.update(&reading.samples, now) {
            println!("{}", line);
        }
    }

    Ok(())
}

/// Running average and peak of absolute sample values, reported every
/// `period` samples.
struct Levels {
    period: usize,
    sum: f64,
    peak: f64,
    n: usize,
    since: f64,
}

impl Levels {
    fn new(period: usize, since: f64) -> Self {
        Self {
            period: period.max(1),
            sum: 0.0,
            peak: 0.0,
            n: 0,
            since,
        }
    }

    /// Accumulate `samples`; `clock` is read whenever a report is due.
    fn update(&mut self, samples: &[f64], clock: impl Fn() -> f64) -> Vec<String> {
        let mut lines = Vec::new();
        for &x in samples {
            let x = x.abs();
            self.sum += x;
            self.peak = self.peak.max(x);
            self.n += 1;
            if self.n >= self.period {
                let t = clock();
                lines.push(format!(
                    "avg={:.3} peak={:.3} rate={:.1}",
                    self.sum / self.n as f64,
                    self.peak,
                    self.n as f64 / (t - self.since)
                ));
                self.sum = 0.0;
                self.peak = 0.0;
                self.n = 0;
                self.since = t;
            }
        }
        lines
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(stripped) = s.strip_suffix('M') {
            let val: f64 = stripped.trim().parse().map_err(|_| "Invalid MHz value")?;
            Ok(Frequency(val * 1_000_000.0))
        } else if let Some(stripped) = s.strip_suffix('k') {
            let val: f64 = stripped.trim().parse().map_err(|_| "Invalid kHz value")?;
            Ok(Frequency(val * 1_000.0))
        } else {
            let val: f64 = s.parse().map_err(|_| "Invalid Hz value")?;
            Ok(Frequency(val))
        }
    }
}
