use alloc::string::String;

use crate::platform::{Request, StatusIndicator, Transport};
use crate::record::{self, PublishRecord};
use crate::station::StationConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PublishOutcome {
    /// Nothing to send this cycle.
    Skipped,
    Delivered(u16),
    /// The collector answered with a non-2xx status.
    Rejected(u16),
    Failed,
}

pub struct Publisher<T, I> {
    transport: T,
    indicator: I,
    url: String,
    api_key: String,
}

impl<T, I> Publisher<T, I>
where
    T: Transport,
    I: StatusIndicator,
{
    pub fn new(transport: T, indicator: I, station: &StationConfig) -> Self {
        Self {
            transport,
            indicator,
            url: station.url().clone(),
            api_key: station.api_key().clone(),
        }
    }

    /// Sends `record` to the collector.
    ///
    /// Failures are logged and reported in the outcome, the next cycle is the retry.
    pub async fn publish(&mut self, record: Option<&PublishRecord>) -> PublishOutcome {
        let Some(record) = record else {
            log::warn!("No measurement from sensor this cycle, not publishing");
            return PublishOutcome::Skipped;
        };

        let body = match record::to_payload(record) {
            Ok(body) => body,
            Err(e) => {
                log::error!("Failed to serialize record: {}", e);
                return PublishOutcome::Failed;
            }
        };

        log::info!(
            "Publishing to {} with: {}",
            self.url,
            core::str::from_utf8(&body).unwrap_or_default()
        );

        let request = Request {
            url: &self.url,
            api_key: &self.api_key,
            body: &body,
        };

        self.indicator.off();
        let result = self.transport.post(&request).await;
        self.indicator.on();

        match result {
            Ok(status) if (200..300).contains(&status) => {
                log::info!("Collector accepted record ({})", status);
                PublishOutcome::Delivered(status)
            }
            Ok(status) => {
                log::error!("Collector rejected record with status {}", status);
                PublishOutcome::Rejected(status)
            }
            Err(e) => {
                log::error!("Failed to deliver record: {:?}", e);
                PublishOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use chrono::{TimeZone, Utc};
    use futures::executor::block_on;
    use pms7003::Measurement;

    use super::*;
    use crate::record::build_record;

    #[derive(Clone, Debug, PartialEq)]
    pub(crate) enum Event {
        IndicatorOff,
        IndicatorOn,
        Post {
            url: String,
            api_key: String,
            body: Vec<u8>,
        },
    }

    pub(crate) type EventLog = Rc<RefCell<Vec<Event>>>;

    pub(crate) struct RecordingTransport {
        pub(crate) events: EventLog,
        pub(crate) response: Result<u16, &'static str>,
    }

    impl Transport for RecordingTransport {
        type Error = &'static str;

        async fn post(&mut self, request: &Request<'_>) -> Result<u16, Self::Error> {
            self.events.borrow_mut().push(Event::Post {
                url: request.url.into(),
                api_key: request.api_key.into(),
                body: request.body.to_vec(),
            });
            self.response
        }
    }

    pub(crate) struct RecordingIndicator {
        pub(crate) events: EventLog,
    }

    impl StatusIndicator for RecordingIndicator {
        fn off(&mut self) {
            self.events.borrow_mut().push(Event::IndicatorOff);
        }

        fn on(&mut self) {
            self.events.borrow_mut().push(Event::IndicatorOn);
        }
    }

    pub(crate) fn station() -> StationConfig {
        StationConfig::new("1F9B3E", "secret", "rooftop", -25.2637, -57.5759)
            .with_url("http://collector.local/api/v1/measurements")
    }

    fn publisher(
        response: Result<u16, &'static str>,
    ) -> (Publisher<RecordingTransport, RecordingIndicator>, EventLog) {
        let events = EventLog::default();
        let publisher = Publisher::new(
            RecordingTransport {
                events: events.clone(),
                response,
            },
            RecordingIndicator {
                events: events.clone(),
            },
            &station(),
        );
        (publisher, events)
    }

    fn record() -> PublishRecord {
        let measurement = Measurement {
            pm1_0_atmospheric: 5,
            pm2_5_atmospheric: 8,
            pm10_atmospheric: 9,
            ..Default::default()
        };
        let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        build_record(&measurement, &station(), &timestamp)
    }

    #[test]
    fn nothing_to_publish() {
        testing_logger::setup();
        let (mut publisher, events) = publisher(Ok(200));

        assert_eq!(block_on(publisher.publish(None)), PublishOutcome::Skipped);
        assert!(events.borrow().is_empty());
        testing_logger::validate(|logs| {
            assert_eq!(logs.len(), 1);
            assert_eq!(logs[0].level, log::Level::Warn);
            assert!(logs[0].body.contains("No measurement"), "{}", logs[0].body);
        });
    }

    #[test]
    fn delivers_with_indicator_around_request() {
        let (mut publisher, events) = publisher(Ok(201));
        let record = record();

        assert_eq!(
            block_on(publisher.publish(Some(&record))),
            PublishOutcome::Delivered(201)
        );

        let events = events.borrow();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], Event::IndicatorOff);
        assert_eq!(events[2], Event::IndicatorOn);
        match &events[1] {
            Event::Post { url, api_key, body } => {
                assert_eq!(url, "http://collector.local/api/v1/measurements");
                assert_eq!(api_key, "secret");
                assert_eq!(body, &record::to_payload(&record).unwrap());
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn rejection_is_reported() {
        let (mut publisher, events) = publisher(Ok(403));

        assert_eq!(
            block_on(publisher.publish(Some(&record()))),
            PublishOutcome::Rejected(403)
        );
        assert_eq!(events.borrow().last(), Some(&Event::IndicatorOn));
    }

    #[test]
    fn transport_error_is_not_fatal() {
        let (mut publisher, events) = publisher(Err("connection refused"));

        assert_eq!(
            block_on(publisher.publish(Some(&record()))),
            PublishOutcome::Failed
        );
        assert_eq!(
            block_on(publisher.publish(Some(&record()))),
            PublishOutcome::Failed
        );
        assert_eq!(events.borrow().len(), 6);
    }
}
