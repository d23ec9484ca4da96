//! Airspy HF+ receiver input.
//!
//! The receiver streams complex float I/Q at the device rate (192 kHz). The
//! producer context low-pass filters and decimates that to the source rate,
//! stores the complex result in the ring buffer and marks the wall-clock time
//! at the end of every transfer. Samples lost to a device overflow are
//! counted from the elapsed wall time and replaced by zeros, so the stream
//! stays contiguous in time.
//!
//! On the consumer side each popped window is demodulated as upper sideband,
//! see [`crate::dsp::phasing`].
//!
//! The hardware is reached through SoapySDR's `airspyhf` driver when the
//! `airspy` feature is enabled.

use std::sync::Arc;

use num_complex::Complex;
use tracing::{debug, info, warn};

use super::{Capture, State, Stats, StatsSnapshot, state_of};
use crate::dsp::decimator::{DEFAULT_ATTENUATION_DB, DEFAULT_TRANSITION_WIDTH, DecimationFilter};
use crate::dsp::phasing::{PhasingDemodulator, Sideband};
use crate::error::{Error, Result};
use crate::ring::{Producer, RingBuffer, Window};

/// Rate the receiver is run at.
pub const DEVICE_RATE: u32 = 192_000;

/// Rate delivered to the caller when none is requested.
pub const DEFAULT_RATE: u32 = 12_000;

/// Airspy HF+ source settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AirspyConfig {
    /// Open the receiver with this serial number; `None` opens the first one found
    pub serial: Option<u64>,
    /// Tuned frequency in Hz
    pub center_hz: f64,
    pub rate: u32,
    pub device_rate: u32,
    pub transition_width: f64,
    pub attenuation_db: f64,
    pub sideband: Sideband,
    pub buffer_seconds: usize,
}

impl AirspyConfig {
    pub fn new(serial: Option<u64>, rate: Option<u32>) -> Self {
        Self {
            serial,
            center_hz: 10_000_000.0,
            rate: rate.unwrap_or(DEFAULT_RATE),
            device_rate: DEVICE_RATE,
            transition_width: DEFAULT_TRANSITION_WIDTH,
            attenuation_db: DEFAULT_ATTENUATION_DB,
            sideband: Sideband::Upper,
            buffer_seconds: 60,
        }
    }
}

/// Whether the HF+ can be tuned to `hz`: 0.5 kHz to 31 MHz, or 60 to 260 MHz.
pub fn is_tunable(hz: f64) -> bool {
    (500.0..=31_000_000.0).contains(&hz) || (60_000_000.0..=260_000_000.0).contains(&hz)
}

/// Producer context of an SDR source: what the receive loop runs.
pub struct SdrProducer {
    producer: Producer<Complex<f64>>,
    filter: DecimationFilter,
    stats: Arc<Stats>,
    device_rate: f64,
    /// Wall time at the end of the last transfer handed to the filter
    last_transfer: Option<f64>,
    overflowed: bool,
}

impl SdrProducer {
    /// Handle one device transfer. `dropped` samples were lost by the device
    /// just before this one; they enter the filter as zeros.
    pub fn on_transfer(&mut self, samples: &[Complex<f32>], dropped: usize, wall_now: f64) {
        if dropped > 0 {
            self.stats.record_dropped(dropped as u64);
        }

        let zero = Complex::new(0.0f32, 0.0);
        for x in std::iter::repeat_n(zero, dropped).chain(samples.iter().copied()) {
            let x = Complex::new(x.re as f64, x.im as f64);
            if let Some(y) = self.filter.decimate(x) {
                self.producer.push(y);
            }
        }

        self.producer.commit(wall_now);
        self.last_transfer = Some(wall_now);
        self.overflowed = false;
    }

    /// Handle a transfer read at `wall_now`. After an overflow the samples
    /// lost in between are estimated from the elapsed wall time and zero-filled.
    pub fn on_received(&mut self, samples: &[Complex<f32>], wall_now: f64) {
        let dropped = self.samples_missed(samples.len(), wall_now);
        self.on_transfer(samples, dropped, wall_now);
    }

    /// The device reported an overflow without saying how much was lost.
    pub fn on_overrun(&mut self) {
        self.stats.record_overrun();
        self.overflowed = true;
    }

    /// Device samples expected between the last transfer and `wall_now` that
    /// did not arrive, counted only after an overflow. Capped at what the
    /// ring buffer can hold once decimated.
    fn samples_missed(&self, received: usize, wall_now: f64) -> usize {
        let Some(last) = self.last_transfer.filter(|_| self.overflowed) else {
            return 0;
        };
        let expected = ((wall_now - last) * self.device_rate).round();
        let missed = (expected - received as f64).max(0.0);
        let cap = (self.producer.capacity() * self.filter.ratio()) as f64;
        missed.min(cap) as usize
    }
}

/// An Airspy HF+ receiver demodulated to upper-sideband audio.
pub struct AirspySource {
    config: AirspyConfig,
    serial: Option<u64>,
    capture: Option<Capture<Complex<f64>>>,
    demod: PhasingDemodulator,
    #[cfg(feature = "airspy")]
    receiver: Option<soapy::Receiver>,
}

impl AirspySource {
    pub fn new(config: AirspyConfig) -> Result<Self> {
        // a bad rate is reported before the device is touched
        let filter = decimation_filter(&config)?;
        debug!(
            "airspy: {} Hz -> {} Hz, {} taps",
            config.device_rate,
            config.rate,
            filter.taps()
        );
        Ok(Self {
            serial: config.serial,
            capture: None,
            demod: PhasingDemodulator::with_sideband(config.rate, config.sideband),
            config,
            #[cfg(feature = "airspy")]
            receiver: None,
        })
    }

    pub fn config(&self) -> &AirspyConfig {
        &self.config
    }

    pub fn rate(&self) -> u32 {
        self.config.rate
    }

    /// Serial number of the receiver: the requested one until started, then
    /// the one actually opened.
    pub fn serial(&self) -> Option<u64> {
        self.serial
    }

    pub fn center_hz(&self) -> f64 {
        self.config.center_hz
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

    fn label(&self) -> String {
        match self.serial {
            Some(serial) => format!("airspy {:x}", serial),
            None => "airspy".to_string(),
        }
    }

    /// Allocate the ring buffer and hand back the producer context for the
    /// caller to drive. [`AirspySource::start`] does this and runs the context
    /// on a receive thread.
    pub fn start_external(&mut self) -> Result<SdrProducer> {
        if self.capture.is_some() {
            return Err(Error::device(format!("{} already started", self.label())));
        }
        let filter = decimation_filter(&self.config)?;
        let ring = RingBuffer::with_duration(self.config.buffer_seconds, self.config.rate);
        let (producer, consumer) = ring.split();
        let stats = Arc::new(Stats::default());
        self.capture = Some(Capture::new(consumer, stats.clone(), self.label()));
        Ok(SdrProducer {
            producer,
            filter,
            stats,
            device_rate: self.config.device_rate as f64,
            last_transfer: None,
            overflowed: false,
        })
    }

    #[cfg(feature = "airspy")]
    pub fn start(&mut self) -> Result<()> {
        let producer = self.start_external()?;
        let receiver = match soapy::Receiver::open(&self.config, producer) {
            Ok(receiver) => receiver,
            Err(e) => {
                self.capture = None;
                return Err(e);
            }
        };
        if receiver.serial.is_some() {
            self.serial = receiver.serial;
        }
        self.receiver = Some(receiver);
        info!("{} started at {} Hz", self.label(), self.config.rate);
        self.set_freq(self.config.center_hz)?;
        Ok(())
    }

    #[cfg(not(feature = "airspy"))]
    pub fn start(&mut self) -> Result<()> {
        info!("{} requested without SDR support", self.label());
        Err(Error::device(
            "Airspy support not compiled in (enable the `airspy` feature)",
        ))
    }

    /// Retune the receiver. Frequencies outside the HF+ ranges are refused
    /// with a warning and leave the tuning alone; either way the requested
    /// frequency is returned.
    pub fn set_freq(&mut self, hz: f64) -> Result<f64> {
        if self.capture.is_none() {
            return Err(Error::NotStarted);
        }
        if !is_tunable(hz) {
            warn!("{}: cannot tune to {} Hz", self.label(), hz);
            return Ok(hz);
        }

        #[cfg(feature = "airspy")]
        if let Some(receiver) = &self.receiver {
            receiver.tune(hz)?;
        }

        self.config.center_hz = hz;
        debug!("{}: tuned to {} Hz", self.label(), hz);
        Ok(hz)
    }

    /// Pop up to `n` I/Q samples and demodulate them.
    pub fn get(&mut self, n: usize, latest: bool) -> Result<Window<f64>> {
        let capture = self.capture.as_mut().ok_or(Error::NotStarted)?;
        let window = capture.poll(n, latest);
        let demod = &mut self.demod;
        Ok(window.map(|iq| demod.demodulate(&iq)))
    }

    /// Pop up to `n` raw I/Q samples at the source rate.
    pub fn get_iq(&mut self, n: usize, latest: bool) -> Result<Window<Complex<f64>>> {
        let capture = self.capture.as_mut().ok_or(Error::NotStarted)?;
        Ok(capture.poll(n, latest))
    }
}

fn decimation_filter(config: &AirspyConfig) -> Result<DecimationFilter> {
    DecimationFilter::new(
        config.device_rate,
        config.rate,
        config.transition_width,
        config.attenuation_db,
    )
}

#[cfg(feature = "airspy")]
mod soapy {
    use std::sync::mpsc;
    use std::thread::JoinHandle;

    use num_complex::Complex;
    use soapysdr::{Device, Direction, ErrorCode};
    use tracing::error;

    use super::{AirspyConfig, SdrProducer};
    use crate::anchor::now;
    use crate::error::{Error, Result};

    enum Command {
        Tune(f64, mpsc::Sender<Result<()>>),
        Stop,
    }

    /// Receive thread owning the SoapySDR device and stream.
    pub(super) struct Receiver {
        pub serial: Option<u64>,
        commands: mpsc::Sender<Command>,
        handle: Option<JoinHandle<()>>,
    }

    impl Receiver {
        pub fn open(config: &AirspyConfig, mut producer: SdrProducer) -> Result<Self> {
            let (tx_init, rx_init) = mpsc::channel::<Result<Option<u64>>>();
            let (tx_cmd, rx_cmd) = mpsc::channel::<Command>();
            let args = match config.serial {
                Some(serial) => format!("driver=airspyhf,serial={:016x}", serial),
                None => "driver=airspyhf".to_string(),
            };
            let device_rate = config.device_rate as f64;

            let handle = std::thread::spawn(move || {
                let init = (|| -> Result<(Device, soapysdr::RxStream<Complex<f32>>, Option<u64>)> {
                    let device = Device::new(args.as_str())?;
                    device.set_sample_rate(Direction::Rx, 0, device_rate)?;
                    let serial = device
                        .hardware_info()
                        .ok()
                        .and_then(|info| info.get("serial").map(str::to_string))
                        .and_then(|s| u64::from_str_radix(&s, 16).ok());
                    let mut stream = device.rx_stream::<Complex<f32>>(&[0])?;
                    stream.activate(None)?;
                    Ok((device, stream, serial))
                })();

                let (device, mut stream, serial) = match init {
                    Ok(parts) => parts,
                    Err(e) => {
                        let _ = tx_init.send(Err(e));
                        return;
                    }
                };
                let _ = tx_init.send(Ok(serial));

                let mtu = stream.mtu().unwrap_or(16384);
                let mut buffer = vec![Complex::new(0.0f32, 0.0); mtu];

                loop {
                    while let Ok(command) = rx_cmd.try_recv() {
                        match command {
                            Command::Tune(hz, reply) => {
                                let res = device
                                    .set_frequency(Direction::Rx, 0, hz, ())
                                    .map_err(Error::from);
                                let _ = reply.send(res);
                            }
                            Command::Stop => return,
                        }
                    }

                    match stream.read(&mut [&mut buffer], 100_000) {
                        Ok(len) => producer.on_received(&buffer[..len], now()),
                        Err(e) if e.code == ErrorCode::Overflow => producer.on_overrun(),
                        Err(e) if e.code == ErrorCode::Timeout => {}
                        Err(e) => {
                            error!("airspy receive loop stopped: {}", e);
                            return;
                        }
                    }
                }
            });

            match rx_init.recv() {
                Ok(Ok(serial)) => Ok(Self {
                    serial,
                    commands: tx_cmd,
                    handle: Some(handle),
                }),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(Error::device("failed to initialize Airspy HF+ device")),
            }
        }

        pub fn tune(&self, hz: f64) -> Result<()> {
            let (tx, rx) = mpsc::channel();
            self.commands
                .send(Command::Tune(hz, tx))
                .map_err(|_| Error::device("Airspy receive loop has stopped"))?;
            rx.recv()
                .map_err(|_| Error::device("Airspy receive loop has stopped"))?
        }
    }

    impl Drop for Receiver {
        fn drop(&mut self) {
            let _ = self.commands.send(Command::Stop);
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }
}
