use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::{ErrorKind, ErrorType, Read, Write};
use eyre::{eyre, WrapErr};
use linka_shared::platform::{API_KEY_HEADER, CONTENT_TYPE};
use linka_shared::station::{node_from_mac, sensor_id_from_node, SENSOR_ID_LEN};
use linka_shared::{Clock, NoIndicator, Platform, Request, Transport};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::{
    ClearBuffer, DataBits, Parity, SerialPort, SerialPortBuilderExt, SerialStream, StopBits,
};

const BAUD_RATE: u32 = 9600;
/// The line counts as quiet after this long without a byte.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Host;

impl Platform for Host {
    type Link = SerialLink;
    type Delay = TokioDelay;
    type Transport = HttpTransport;
    type Indicator = NoIndicator;
    type Clock = SystemClock;
}

/// Serial port speaking 9600 8N1, reads end with `Ok(0)` when the line goes quiet.
pub struct SerialLink<S = SerialStream> {
    port: S,
    quiet: Duration,
}

impl SerialLink {
    pub fn open(path: &str) -> eyre::Result<Self> {
        let port = tokio_serial::new(path, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(READ_TIMEOUT)
            .open_native_async()
            .wrap_err_with(|| format!("Failed to open serial port {}", path))?;
        port.clear(ClearBuffer::All)
            .wrap_err("Failed to clear serial port buffers")?;

        Ok(Self::with_quiet_period(port, READ_TIMEOUT))
    }
}

impl<S> SerialLink<S> {
    pub fn with_quiet_period(port: S, quiet: Duration) -> Self {
        Self { port, quiet }
    }
}

#[derive(Debug)]
pub struct LinkError(std::io::Error);

impl embedded_io_async::Error for LinkError {
    fn kind(&self) -> ErrorKind {
        match self.0.kind() {
            std::io::ErrorKind::TimedOut => ErrorKind::TimedOut,
            std::io::ErrorKind::Interrupted => ErrorKind::Interrupted,
            std::io::ErrorKind::BrokenPipe => ErrorKind::BrokenPipe,
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            _ => ErrorKind::Other,
        }
    }
}

impl<S> ErrorType for SerialLink<S> {
    type Error = LinkError;
}

impl<S: AsyncRead + Unpin> Read for SerialLink<S> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        match tokio::time::timeout(self.quiet, self.port.read(buf)).await {
            Ok(result) => result.map_err(LinkError),
            Err(_) => Ok(0),
        }
    }
}

impl<S: AsyncWrite + Unpin> Write for SerialLink<S> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.port.write(buf).await.map_err(LinkError)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.port.flush().await.map_err(LinkError)
    }
}

#[derive(Clone, Copy, Default)]
pub struct TokioDelay;

impl DelayNs for TokioDelay {
    async fn delay_ns(&mut self, ns: u32) {
        tokio::time::sleep(Duration::from_nanos(ns.into())).await
    }

    async fn delay_ms(&mut self, ms: u32) {
        tokio::time::sleep(Duration::from_millis(ms.into())).await
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Option<DateTime<Utc>> {
        Some(Utc::now())
    }
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> eyre::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .wrap_err("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    type Error = reqwest::Error;

    async fn post(&mut self, request: &Request<'_>) -> Result<u16, Self::Error> {
        let response = self
            .client
            .post(request.url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .header(API_KEY_HEADER, request.api_key)
            .body(request.body.to_vec())
            .send()
            .await?;
        Ok(response.status().as_u16())
    }
}

/// Station id of this host, derived like the microcontroller derives it from its MAC.
///
/// Falls back to the machine id when no interface has a hardware address.
pub fn host_sensor_id() -> eyre::Result<String> {
    if let Some(mac) = first_mac(Path::new("/sys/class/net")) {
        return Ok(sensor_id_from_node(node_from_mac(&mac)));
    }

    fs::read_to_string("/etc/machine-id")
        .ok()
        .and_then(|id| sensor_id_from_machine_id(&id))
        .ok_or_else(|| {
            eyre!("Could not derive a station id, set sensor_id in the configuration")
        })
}

/// Last characters of the machine id, upper-cased.
fn sensor_id_from_machine_id(machine_id: &str) -> Option<String> {
    let machine_id = machine_id.trim();
    if machine_id.chars().count() < SENSOR_ID_LEN {
        return None;
    }
    let mut tail: Vec<char> = machine_id.chars().rev().take(SENSOR_ID_LEN).collect();
    tail.reverse();
    Some(tail.into_iter().collect::<String>().to_uppercase())
}

fn first_mac(interfaces: &Path) -> Option<[u8; 6]> {
    let entries = fs::read_dir(interfaces).ok()?;
    let addresses = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let address = fs::read_to_string(entry.path().join("address")).ok()?;
            Some((name, address))
        })
        .collect();
    pick_mac(addresses)
}

/// First usable hardware address in interface name order, so the choice is stable.
fn pick_mac(mut interfaces: Vec<(String, String)>) -> Option<[u8; 6]> {
    interfaces.sort();
    interfaces
        .iter()
        .filter(|(name, _)| name != "lo")
        .filter_map(|(_, address)| parse_mac(address.trim()))
        .find(|mac| mac.iter().any(|&byte| byte != 0))
}

fn parse_mac(text: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = text.split(':');
    for byte in mac.iter_mut() {
        *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    match parts.next() {
        Some(_) => None,
        None => Some(mac),
    }
}

#[cfg(test)]
mod tests {
    use pms7003::frame::{encode_measurement, PASSIVE_MODE_ACK};
    use pms7003::{Command, Measurement, Pms7003, State};
    use tokio::io::DuplexStream;

    use super::*;

    #[test]
    fn mac_parsing() {
        assert_eq!(
            parse_mac("24:0a:c4:1f:9b:3e"),
            Some([0x24, 0x0a, 0xc4, 0x1f, 0x9b, 0x3e])
        );
        assert_eq!(parse_mac("24:0a:c4:1f:9b"), None);
        assert_eq!(parse_mac("24:0a:c4:1f:9b:3e:00"), None);
        assert_eq!(parse_mac("zz:0a:c4:1f:9b:3e"), None);
    }

    #[test]
    fn mac_choice_is_stable() {
        let interfaces = vec![
            ("wlan0".to_string(), "24:0a:c4:1f:9b:3e\n".to_string()),
            ("lo".to_string(), "00:00:00:00:00:00\n".to_string()),
            ("eth0".to_string(), "b8:27:eb:00:11:22\n".to_string()),
            ("docker0".to_string(), "00:00:00:00:00:00\n".to_string()),
        ];
        let mut reversed = interfaces.clone();
        reversed.reverse();

        let mac = pick_mac(interfaces).unwrap();
        assert_eq!(mac, [0xb8, 0x27, 0xeb, 0x00, 0x11, 0x22]);
        assert_eq!(pick_mac(reversed), Some(mac));
        assert_eq!(
            sensor_id_from_node(node_from_mac(&mac)),
            sensor_id_from_node(node_from_mac(&mac))
        );
    }

    #[test]
    fn no_usable_mac() {
        assert_eq!(
            pick_mac(vec![("lo".to_string(), "00:00:00:00:00:00".to_string())]),
            None
        );
    }

    #[test]
    fn machine_id_fallback() {
        assert_eq!(
            sensor_id_from_machine_id("4c4c4544004d3510804bb4c04f4e3132\n"),
            Some("4E3132".to_string())
        );
        assert_eq!(
            sensor_id_from_machine_id("ab\u{e9}cd\u{fc}ef"),
            Some("\u{c9}CD\u{dc}EF".to_string())
        );
        assert_eq!(sensor_id_from_machine_id("\u{e9}\u{e9}\u{e9}"), None);
        assert_eq!(sensor_id_from_machine_id(""), None);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_line_ends_read() {
        let (port, mut device) = tokio::io::duplex(64);
        let mut link = SerialLink::with_quiet_period(port, READ_TIMEOUT);

        device.write_all(&[1, 2, 3]).await.unwrap();

        let mut buffer = [0u8; 8];
        assert_eq!(link.read(&mut buffer).await.unwrap(), 3);
        assert_eq!(&buffer[..3], &[1, 2, 3]);
        assert_eq!(link.read(&mut buffer).await.unwrap(), 0);
    }

    async fn fake_sensor(mut device: DuplexStream, reading: [u8; 32]) {
        let mut command = [0u8; 7];
        while device.read_exact(&mut command).await.is_ok() {
            if command == Command::SetPassiveMode.encode() {
                device.write_all(&PASSIVE_MODE_ACK).await.unwrap();
            } else if command == Command::ReadPassive.encode() {
                device.write_all(&reading).await.unwrap();
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sensor_over_serial_link() {
        let measurement = Measurement {
            pm1_0_atmospheric: 12,
            pm2_5_atmospheric: 35,
            pm10_atmospheric: 40,
            particles_0_3um: 1234,
            ..Default::default()
        };
        let (port, device) = tokio::io::duplex(256);
        tokio::spawn(fake_sensor(device, encode_measurement(&measurement)));

        let link = SerialLink::with_quiet_period(port, READ_TIMEOUT);
        let mut sensor = Pms7003::new(link, TokioDelay);
        sensor.initialize().await.unwrap();

        assert_eq!(sensor.state(), State::Ready);
        assert_eq!(sensor.read().await, Some(measurement));
    }
}
