//! Recording input.
//!
//! Replays one channel of a WAV file as if it were arriving live: a sample
//! becomes available once the wall clock has passed its position in the file,
//! counted from [`FileSource::start`]. There is no device thread; the replay is
//! advanced lazily whenever the consumer polls, so the same ring buffer and
//! time anchoring apply as for the hardware sources.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hound::{SampleFormat, WavReader};
use tracing::{debug, info};

use super::{Capture, State, Stats, StatsSnapshot, state_of};
use crate::anchor::now;
use crate::error::{Error, Result};
use crate::ring::{Producer, RingBuffer, Window};

/// Recording source settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FileConfig {
    /// WAV file; a leading `~` is expanded to the home directory
    pub path: PathBuf,
    /// Required rate; `None` accepts whatever the file has
    pub rate: Option<u32>,
    pub channel: usize,
    pub buffer_seconds: usize,
}

impl FileConfig {
    pub fn new<P: AsRef<Path>>(path: P, rate: Option<u32>) -> Self {
        Self {
            path: expanduser(path.as_ref().to_path_buf()),
            rate,
            channel: 0,
            buffer_seconds: 30,
        }
    }
}

/// Feeds the recording into the ring buffer as wall-clock time passes.
struct Replay {
    producer: Producer<f64>,
    samples: Vec<f64>,
    pos: usize,
    origin: f64,
    rate: f64,
}

impl Replay {
    /// Push every sample due by `wall_now` and anchor the newest one.
    fn advance_to(&mut self, wall_now: f64) {
        let elapsed = (wall_now - self.origin).max(0.0);
        let due = ((elapsed * self.rate) as usize).min(self.samples.len());
        if due <= self.pos {
            return;
        }
        self.producer.push_slice(&self.samples[self.pos..due]);
        self.pos = due;
        self.producer.commit(self.origin + due as f64 / self.rate);
    }

    fn is_exhausted(&self) -> bool {
        self.pos == self.samples.len()
    }
}

/// One channel of a WAV recording replayed in real time.
pub struct FileSource {
    config: FileConfig,
    rate: u32,
    channels: usize,
    capture: Option<Capture<f64>>,
    replay: Option<Replay>,
}

impl FileSource {
    /// Read the WAV header and check it against `config`.
    pub fn new(config: FileConfig) -> Result<Self> {
        let spec = WavReader::open(&config.path)?.spec();
        let channels = spec.channels as usize;
        if config.channel >= channels {
            return Err(Error::config(format!(
                "{}: channel {} requested, file has {}",
                config.path.display(),
                config.channel,
                channels
            )));
        }
        if let Some(rate) = config.rate
            && rate != spec.sample_rate
        {
            return Err(Error::config(format!(
                "{}: recorded at {} Hz, {} Hz requested",
                config.path.display(),
                spec.sample_rate,
                rate
            )));
        }
        Ok(Self {
            rate: spec.sample_rate,
            channels,
            config,
            capture: None,
            replay: None,
        })
    }

    pub fn config(&self) -> &FileConfig {
        &self.config
    }

    pub fn rate(&self) -> u32 {
        self.rate
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

    /// Load the recording and start its clock now.
    pub fn start(&mut self) -> Result<()> {
        self.start_at(now())
    }

    /// Load the recording with its first sample due at `origin` (UNIX seconds).
    pub fn start_at(&mut self, origin: f64) -> Result<()> {
        if self.capture.is_some() {
            return Err(Error::device(format!(
                "{} already started",
                self.config.path.display()
            )));
        }
        let samples = read_channel(&self.config.path, self.config.channel, self.channels)?;
        info!(
            "replaying {} ({} samples at {} Hz, channel {})",
            self.config.path.display(),
            samples.len(),
            self.rate,
            self.config.channel
        );

        let ring = RingBuffer::with_duration(self.config.buffer_seconds, self.rate);
        let (producer, consumer) = ring.split();
        let label = self.config.path.display().to_string();
        self.capture = Some(Capture::new(consumer, Arc::new(Stats::default()), label));
        self.replay = Some(Replay {
            producer,
            samples,
            pos: 0,
            origin,
            rate: self.rate as f64,
        });
        Ok(())
    }

    pub(crate) fn require_started(&self) -> Result<()> {
        match self.capture {
            Some(_) => Ok(()),
            None => Err(Error::NotStarted),
        }
    }

    pub fn get(&mut self, n: usize, latest: bool) -> Result<Window<f64>> {
        self.get_at(n, latest, now())
    }

    /// [`FileSource::get`] as seen at wall time `wall_now`.
    pub fn get_at(&mut self, n: usize, latest: bool, wall_now: f64) -> Result<Window<f64>> {
        let (Some(capture), Some(replay)) = (self.capture.as_mut(), self.replay.as_mut()) else {
            return Err(Error::NotStarted);
        };
        replay.advance_to(wall_now);
        Ok(capture.poll(n, latest))
    }

    /// True once the whole recording has been pushed and popped.
    pub fn is_exhausted(&self) -> bool {
        match (&self.capture, &self.replay) {
            (Some(capture), Some(replay)) => replay.is_exhausted() && capture.is_drained(),
            _ => false,
        }
    }
}

/// Decode one channel of a WAV file to `[-1, 1]`.
fn read_channel(path: &Path, channel: usize, channels: usize) -> Result<Vec<f64>> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    debug!("{}: {:?}", path.display(), spec);

    let interleaved: Vec<f64> = match spec.sample_format {
        SampleFormat::Int => {
            let scale = ((1i64 << (spec.bits_per_sample - 1)) - 1) as f64;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f64 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| v as f64))
            .collect::<std::result::Result<_, _>>()?,
    };

    Ok(interleaved
        .into_iter()
        .skip(channel)
        .step_by(channels)
        .collect())
}

fn expanduser(path: PathBuf) -> PathBuf {
    if let Some(rest) = path.to_str().and_then(|p| p.strip_prefix('~'))
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest.trim_start_matches('/'));
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use hound::{WavSpec, WavWriter};

    fn write_wav(name: &str, channels: u16, rate: u32, frames: &[[i16; 2]]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("soundin-file-{}-{}.wav", std::process::id(), name));
        let spec = WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for frame in frames {
            for &v in &frame[..channels as usize] {
                writer.write_sample(v).unwrap();
            }
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn test_expanduser() {
        assert_eq!(expanduser(PathBuf::from("/tmp/x.wav")), PathBuf::from("/tmp/x.wav"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanduser(PathBuf::from("~/x.wav")), home.join("x.wav"));
        }
    }

    #[test]
    fn test_header_checks() {
        let path = write_wav("header", 1, 8_000, &[[0, 0]; 8]);
        assert!(FileSource::new(FileConfig::new(&path, Some(12_000))).err().unwrap().is_config());

        let mut config = FileConfig::new(&path, None);
        config.channel = 1;
        assert!(FileSource::new(config).err().unwrap().is_config());

        assert_eq!(FileSource::new(FileConfig::new(&path, Some(8_000))).unwrap().rate(), 8_000);
        assert!(FileSource::new(FileConfig::new("/nonexistent/soundin.wav", None)).is_err());
    }

    #[test]
    fn test_replay_paced_by_wall_clock() {
        let frames: Vec<[i16; 2]> = (0..100).map(|i| [i as i16 * 100, -32767]).collect();
        let path = write_wav("paced", 2, 100, &frames);

        let mut config = FileConfig::new(&path, None);
        config.channel = 1;
        let mut source = FileSource::new(config).unwrap();
        assert!(matches!(source.get_at(10, false, 0.0), Err(Error::NotStarted)));

        source.start_at(1_000.0).unwrap();
        assert_eq!(source.state(), State::Started);
        assert!(source.get_at(10, false, 1_000.0).unwrap().is_empty());

        // a quarter second in: 25 samples are due
        let window = source.get_at(100, false, 1_000.25).unwrap();
        assert_eq!(window.len(), 25);
        assert_relative_eq!(window.samples[0], -1.0);
        assert_relative_eq!(window.start_time.unwrap(), 1_000.0);
        assert_eq!(source.state(), State::Producing);

        let rest = source.get_at(1_000, false, 1_010.0).unwrap();
        assert_eq!(rest.len(), 75);
        assert_relative_eq!(rest.start_time.unwrap(), 1_000.25);
        assert!(source.is_exhausted());
    }

    #[test]
    fn test_int_samples_normalized() {
        let frames = [[32767i16, 0], [-32767, 0], [16384, 0]];
        let path = write_wav("scale", 1, 10, &frames);
        let samples = read_channel(&path, 0, 1).unwrap();
        assert_relative_eq!(samples[0], 1.0);
        assert_relative_eq!(samples[1], -1.0);
        assert_relative_eq!(samples[2], 16384.0 / 32767.0);
    }
}
