//! Capabilities a platform has to provide to run a station.
//!
//! The sensor link is any `embedded-io-async` byte stream whose reads return
//! `Ok(0)` once the line goes quiet, delays come from `embedded-hal-async`.
//! Wall clock time, HTTP delivery and the status LED are described by the
//! traits below.

use chrono::{DateTime, Utc};
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::{Read, Write};

pub const CONTENT_TYPE: &str = "application/json; charset=utf-8";
pub const API_KEY_HEADER: &str = "x-api-key";

/// Binds together the concrete types of one platform.
pub trait Platform {
    type Link: Read + Write;
    type Delay: DelayNs;
    type Transport: Transport;
    type Indicator: StatusIndicator;
    type Clock: Clock;
}

pub trait Clock {
    /// Current UTC time, `None` while the clock has not been set yet.
    fn now(&self) -> Option<DateTime<Utc>>;
}

/// A POST request carrying a JSON body.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub url: &'a str,
    pub api_key: &'a str,
    pub body: &'a [u8],
}

#[allow(async_fn_in_trait)]
pub trait Transport {
    type Error: core::fmt::Debug;

    /// Sends the request with [`CONTENT_TYPE`] and the [`API_KEY_HEADER`] set
    /// and returns the HTTP status code of the response.
    async fn post(&mut self, request: &Request<'_>) -> Result<u16, Self::Error>;
}

/// Indicator showing whether a transmission is in flight.
pub trait StatusIndicator {
    /// Called right before the request goes out.
    fn off(&mut self);
    /// Called once the request finished, successfully or not.
    fn on(&mut self);
}

pub struct NoIndicator;

impl StatusIndicator for NoIndicator {
    fn off(&mut self) {}

    fn on(&mut self) {}
}
