use std::path::PathBuf;

use clap::Parser;
use eyre::eyre;
use linka_shared::{NoIndicator, Publisher, Runner};
use pms7003::{Pms7003, RetryPolicy};

mod config;
mod platform;

use config::Config;
use platform::{host_sensor_id, Host, HttpTransport, SerialLink, SystemClock, TokioDelay};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Station configuration file.
    #[clap(short, long, default_value = "config.toml")]
    config: PathBuf,
    /// Overrides `serial_port` from the configuration.
    #[clap(long)]
    serial_port: Option<String>,
    /// Overrides `interval` from the configuration, in seconds.
    #[clap(long)]
    interval: Option<u64>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> eyre::Result<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    if let Some(port) = args.serial_port {
        config.serial_port = port;
    }
    if let Some(interval) = args.interval {
        config.interval = interval;
    }
    config.validate()?;

    let sensor_id = match config.sensor_id.clone() {
        Some(id) => id,
        None => host_sensor_id()?,
    };
    let station = config.station(sensor_id);
    log::info!(
        "Station {} ({}) reporting every {} s to {}",
        station.sensor_id(),
        station.description(),
        station.interval_secs(),
        station.url()
    );

    let link = SerialLink::open(&config.serial_port)?;
    let sensor = Pms7003::with_retry_policy(
        link,
        TokioDelay,
        RetryPolicy::new(config.handshake_attempts),
    );
    let publisher = Publisher::new(HttpTransport::new()?, NoIndicator, &station);
    let mut runner = Runner::<Host>::new(sensor, publisher, SystemClock, TokioDelay, station);

    tokio::select! {
        result = runner.run() => match result {
            Ok(never) => match never {},
            Err(e) => Err(eyre!("Sensor on {} stopped: {}", config.serial_port, e)),
        },
        _ = tokio::signal::ctrl_c() => {
            log::info!("Interrupted, closing {}", config.serial_port);
            Ok(())
        }
    }
}
