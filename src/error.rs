//! Error handling for the soundin library
//!
//! Configuration mistakes and device failures are fatal for the operation that
//! hit them and are returned to the caller. Transient overruns in a producer
//! context are never errors: they are counted in [`crate::Stats`] instead.

use std::fmt;
use std::io;

/// A specialized Result type for soundin operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for soundin operations
#[derive(Debug)]
pub enum Error {
    /// I/O error (recording files, etc.)
    Io(io::Error),

    /// Invalid source specification, rate or filter configuration
    Config(String),

    /// Device open/start failure, with the backend's diagnostic text
    Device(String),

    /// The source must be started before this operation
    NotStarted,

    /// WAV decoding error
    Wav(hound::Error),

    /// SoapySDR specific error (requires "airspy" feature)
    #[cfg(feature = "airspy")]
    SoapySdr(soapysdr::Error),

    /// Generic error with custom message
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Device(msg) => write!(f, "Device error: {}", msg),
            Error::NotStarted => write!(f, "source has not been started"),
            Error::Wav(err) => write!(f, "WAV error: {}", err),
            #[cfg(feature = "airspy")]
            Error::SoapySdr(err) => write!(f, "SoapySDR error: {}", err),
            Error::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Wav(err) => Some(err),
            #[cfg(feature = "airspy")]
            Error::SoapySdr(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<hound::Error> for Error {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(err) => Error::Io(err),
            other => Error::Wav(other),
        }
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

#[cfg(feature = "airspy")]
impl From<soapysdr::Error> for Error {
    fn from(err: soapysdr::Error) -> Self {
        Error::SoapySdr(err)
    }
}

impl Error {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Create a device error with a custom message
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Error::Device(msg.into())
    }

    /// Create a generic error with a custom message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Error::Other(msg.into())
    }

    /// True for the errors that stem from a bad source spec or parameters.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}
