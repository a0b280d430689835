#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod platform;
pub mod publisher;
pub mod record;
pub mod runner;
pub mod station;

pub use platform::{Clock, NoIndicator, Platform, Request, StatusIndicator, Transport};
pub use publisher::{PublishOutcome, Publisher};
pub use record::{build_record, PublishRecord};
pub use runner::Runner;
pub use station::StationConfig;

/// Constants baked into every build, whatever the platform.
pub struct BuildInfo;

impl BuildInfo {
    /// Reported as `version` in every published record.
    pub const PROTOCOL_VERSION: &'static str = "linka_mpv0.0.1";
    pub const DEFAULT_URL: &'static str = "http://localhost:8000/api/v1/measurements";
    pub const DEFAULT_INTERVAL_SECS: u64 = 300;
}
