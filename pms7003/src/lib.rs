#![cfg_attr(not(any(test, feature = "testing")), no_std)]

pub mod frame;
pub mod sensor;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use frame::{Command, Measurement};
pub use sensor::{Pms7003, RetryPolicy, State};

/// Name reported as the `sensor` field of published records.
pub const SENSOR_NAME: &str = "PMS7003";

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<Inner: core::fmt::Debug> {
    Link(Inner),
    ShortRead { expected: usize, received: usize },
    Parsing(ParsingError),
    NotReady,
    HandshakeFailed { attempts: u32 },
}

impl<E: embedded_io_async::Error> From<E> for Error<E> {
    fn from(e: E) -> Self {
        Self::Link(e)
    }
}

impl<T: core::fmt::Debug> From<ParsingError> for Error<T> {
    fn from(e: ParsingError) -> Self {
        Error::Parsing(e)
    }
}

impl<T: core::fmt::Debug> core::fmt::Display for Error<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Link(e) => write!(f, "link error: {:?}", e),
            Error::ShortRead { expected, received } => {
                write!(f, "short read: expected {} bytes, received {}", expected, received)
            }
            Error::Parsing(e) => write!(f, "invalid frame: {}", e),
            Error::NotReady => write!(f, "sensor is not in passive mode"),
            Error::HandshakeFailed { attempts } => write!(
                f,
                "sensor did not acknowledge passive mode after {} attempts",
                attempts
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParsingError {
    Length,
    Header,
    Checksum,
}

impl core::fmt::Display for ParsingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ParsingError::Length => write!(f, "wrong frame length"),
            ParsingError::Header => write!(f, "bad frame header"),
            ParsingError::Checksum => write!(f, "checksum mismatch"),
        }
    }
}
