use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use chrono::{DateTime, Datelike, Timelike, Utc};
use pms7003::Measurement;
use serde::Serialize;

use crate::station::StationConfig;
use crate::BuildInfo;

/// One entry of the JSON array POSTed to the collector.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PublishRecord {
    pub sensor: &'static str,
    pub source: String,
    pub version: &'static str,
    pub description: String,
    /// Atmospheric PM1.0 [μg/m³]
    pub pm1dot0: u16,
    /// Atmospheric PM2.5 [μg/m³]
    pub pm2dot5: u16,
    /// Atmospheric PM10 [μg/m³]
    pub pm10: u16,
    pub longitude: f64,
    pub latitude: f64,
    pub recorded: String,
}

pub fn build_record(
    measurement: &Measurement,
    station: &StationConfig,
    timestamp: &DateTime<Utc>,
) -> PublishRecord {
    PublishRecord {
        sensor: pms7003::SENSOR_NAME,
        source: station.sensor_id().clone(),
        version: BuildInfo::PROTOCOL_VERSION,
        description: station.description().clone(),
        pm1dot0: measurement.pm1_0_atmospheric,
        pm2dot5: measurement.pm2_5_atmospheric,
        pm10: measurement.pm10_atmospheric,
        longitude: station.longitude(),
        latitude: station.latitude(),
        recorded: format_timestamp(timestamp),
    }
}

/// `YYYY-MM-DDTHH:MM:SS.000Z`, sub-second precision is dropped.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.000Z",
        timestamp.year(),
        timestamp.month(),
        timestamp.day(),
        timestamp.hour(),
        timestamp.minute(),
        timestamp.second()
    )
}

/// Request body, a JSON array holding the single record.
pub fn to_payload(record: &PublishRecord) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(core::slice::from_ref(record))
}
