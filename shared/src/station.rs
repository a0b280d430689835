use alloc::format;
use alloc::string::{String, ToString};

use getset::{CopyGetters, Getters};

use crate::BuildInfo;

pub const SENSOR_ID_LEN: usize = 6;

/// Static description of the measuring station, fixed for the whole run.
#[derive(Clone, Debug, PartialEq, Getters, CopyGetters)]
pub struct StationConfig {
    #[getset(get = "pub")]
    sensor_id: String,
    #[getset(get = "pub")]
    api_key: String,
    #[getset(get = "pub")]
    description: String,
    #[getset(get_copy = "pub")]
    latitude: f64,
    #[getset(get_copy = "pub")]
    longitude: f64,
    #[getset(get = "pub")]
    url: String,
    #[getset(get_copy = "pub")]
    interval_secs: u64,
}

impl StationConfig {
    pub fn new(
        sensor_id: impl Into<String>,
        api_key: impl Into<String>,
        description: impl Into<String>,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            api_key: api_key.into(),
            description: description.into(),
            latitude,
            longitude,
            url: BuildInfo::DEFAULT_URL.into(),
            interval_secs: BuildInfo::DEFAULT_INTERVAL_SECS,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_interval_secs(mut self, interval_secs: u64) -> Self {
        self.interval_secs = interval_secs;
        self
    }
}

/// Station id of a microcontroller: the MAC in upper-case hex, last six characters.
pub fn sensor_id_from_mac(mac: &[u8; 6]) -> String {
    format!("{:02X}{:02X}{:02X}", mac[3], mac[4], mac[5])
}

/// Station id of a host: the decimal node number, last six digits.
pub fn sensor_id_from_node(node: u64) -> String {
    let digits = node.to_string();
    let start = digits.len().saturating_sub(SENSOR_ID_LEN);
    digits[start..].into()
}

/// Node number of a network interface, the MAC read as a 48-bit integer.
pub fn node_from_mac(mac: &[u8; 6]) -> u64 {
    mac.iter().fold(0u64, |node, &byte| node << 8 | byte as u64)
}
