use std::fs;
use std::path::Path;

use eyre::{ensure, WrapErr};
use linka_shared::{BuildInfo, StationConfig};
use serde::Deserialize;

/// Station settings read from the TOML file given on the command line.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Only used by the microcontroller build.
    pub ssid: Option<String>,
    /// Only used by the microcontroller build.
    pub psk: Option<String>,
    pub api_key: String,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_url")]
    pub linka_url: String,
    /// Seconds between two publishes.
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default = "default_serial_port")]
    pub serial_port: String,
    #[serde(default = "default_handshake_attempts")]
    pub handshake_attempts: u32,
    /// Overrides the id derived from the network interface.
    pub sensor_id: Option<String>,
}

fn default_url() -> String {
    BuildInfo::DEFAULT_URL.to_string()
}

fn default_interval() -> u64 {
    BuildInfo::DEFAULT_INTERVAL_SECS
}

fn default_serial_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_handshake_attempts() -> u32 {
    30
}

impl Config {
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let text = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read configuration {}", path.display()))?;
        Self::parse(&text).wrap_err_with(|| format!("Invalid configuration {}", path.display()))
    }

    pub fn parse(text: &str) -> eyre::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        ensure!(!self.api_key.trim().is_empty(), "api_key must not be empty");
        ensure!(
            (-90.0..=90.0).contains(&self.latitude),
            "latitude {} is out of range",
            self.latitude
        );
        ensure!(
            (-180.0..=180.0).contains(&self.longitude),
            "longitude {} is out of range",
            self.longitude
        );
        ensure!(self.interval > 0, "interval must be at least one second");
        ensure!(
            self.handshake_attempts > 0,
            "handshake_attempts must be at least 1"
        );
        ensure!(!self.linka_url.is_empty(), "linka_url must not be empty");
        Ok(())
    }

    pub fn station(&self, sensor_id: String) -> StationConfig {
        StationConfig::new(
            sensor_id,
            self.api_key.as_str(),
            self.description.as_str(),
            self.latitude,
            self.longitude,
        )
        .with_url(self.linka_url.as_str())
        .with_interval_secs(self.interval)
    }
}
