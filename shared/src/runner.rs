use core::convert::Infallible;

use embedded_hal_async::delay::DelayNs;
use embedded_io_async::ErrorType;
use pms7003::Pms7003;

use crate::platform::{Clock, Platform};
use crate::publisher::{PublishOutcome, Publisher};
use crate::record::build_record;
use crate::station::StationConfig;

pub type SensorError<P> = pms7003::Error<<<P as Platform>::Link as ErrorType>::Error>;

/// Reads the sensor and publishes the result once per interval, forever.
pub struct Runner<P: Platform> {
    sensor: Pms7003<P::Link, P::Delay>,
    publisher: Publisher<P::Transport, P::Indicator>,
    clock: P::Clock,
    timer: P::Delay,
    station: StationConfig,
}

impl<P: Platform> Runner<P> {
    pub fn new(
        sensor: Pms7003<P::Link, P::Delay>,
        publisher: Publisher<P::Transport, P::Indicator>,
        clock: P::Clock,
        timer: P::Delay,
        station: StationConfig,
    ) -> Self {
        Self {
            sensor,
            publisher,
            clock,
            timer,
            station,
        }
    }

    pub fn sensor(&self) -> &Pms7003<P::Link, P::Delay> {
        &self.sensor
    }

    /// Puts the sensor into passive mode, the error is terminal.
    pub async fn start(&mut self) -> Result<(), SensorError<P>> {
        self.sensor.initialize().await
    }

    /// One read, build, publish round without the trailing sleep.
    pub async fn cycle(&mut self) -> PublishOutcome {
        let record = match self.sensor.read().await {
            Some(measurement) => match self.clock.now() {
                Some(now) => Some(build_record(&measurement, &self.station, &now)),
                None => {
                    log::warn!("Clock is not set yet, dropping measurement");
                    None
                }
            },
            None => None,
        };

        self.publisher.publish(record.as_ref()).await
    }

    /// Starts the sensor and cycles until the process is stopped.
    ///
    /// Only returns when the sensor never acknowledged passive mode.
    pub async fn run(&mut self) -> Result<Infallible, SensorError<P>> {
        self.start().await?;

        let interval_ms = self
            .station
            .interval_secs()
            .saturating_mul(1000)
            .try_into()
            .unwrap_or(u32::MAX);

        loop {
            let outcome = self.cycle().await;
            log::debug!(
                "Cycle finished with {:?}, next one in {} s",
                outcome,
                self.station.interval_secs()
            );
            self.timer.delay_ms(interval_ms).await;
        }
    }
}
