use core::cell::Cell;

use chrono::{DateTime, Utc};
use embassy_net::dns::DnsQueryType;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::IpEndpoint;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{with_timeout, Duration, Instant, Timer};
use linka_shared::Clock;

use crate::NetStack;

const SERVER: &str = "pool.ntp.org";
const NTP_PORT: u16 = 123;
const NTP_PACKET_LEN: usize = 48;
/// Seconds between 1900-01-01 and 1970-01-01.
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_DELAY: Duration = Duration::from_secs(10);

#[derive(Clone, Copy)]
struct SyncPoint {
    unix_secs: u64,
    at: Instant,
}

static SYNC: Mutex<CriticalSectionRawMutex, Cell<Option<SyncPoint>>> = Mutex::new(Cell::new(None));

/// Wall clock derived from the last SNTP answer and the uptime since then.
pub struct SntpClock;

impl Clock for SntpClock {
    fn now(&self) -> Option<DateTime<Utc>> {
        let sync = SYNC.lock(|cell| cell.get())?;
        let elapsed = Instant::now().duration_since(sync.at).as_secs();
        DateTime::from_timestamp((sync.unix_secs + elapsed) as i64, 0)
    }
}

#[derive(Debug)]
enum SntpError {
    Dns,
    Socket,
    Timeout,
    InvalidResponse,
}

/// Synchronizes the clock once, retrying until a server answers.
#[embassy_executor::task]
pub async fn sntp_task(stack: &'static NetStack) {
    loop {
        match request(stack).await {
            Ok(unix_secs) => {
                SYNC.lock(|cell| {
                    cell.set(Some(SyncPoint {
                        unix_secs,
                        at: Instant::now(),
                    }))
                });
                log::info!("Clock synchronized, unix time {}", unix_secs);
                return;
            }
            Err(e) => {
                log::warn!("SNTP sync failed: {:?}, retrying", e);
                Timer::after(RETRY_DELAY).await;
            }
        }
    }
}

async fn request(stack: &'static NetStack) -> Result<u64, SntpError> {
    let server = stack
        .dns_query(SERVER, DnsQueryType::A)
        .await
        .map_err(|_| SntpError::Dns)?
        .first()
        .copied()
        .ok_or(SntpError::Dns)?;

    let mut rx_meta = [PacketMetadata::EMPTY; 2];
    let mut rx_buffer = [0u8; 64];
    let mut tx_meta = [PacketMetadata::EMPTY; 2];
    let mut tx_buffer = [0u8; 64];
    let mut socket = UdpSocket::new(
        stack,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    );
    socket.bind(0).map_err(|_| SntpError::Socket)?;

    // LI = 0, VN = 3, mode = client
    let mut packet = [0u8; NTP_PACKET_LEN];
    packet[0] = 0x1B;
    socket
        .send_to(&packet, IpEndpoint::new(server, NTP_PORT))
        .await
        .map_err(|_| SntpError::Socket)?;

    let mut response = [0u8; NTP_PACKET_LEN];
    let (len, _) = with_timeout(RESPONSE_TIMEOUT, socket.recv_from(&mut response))
        .await
        .map_err(|_| SntpError::Timeout)?
        .map_err(|_| SntpError::Socket)?;
    if len < NTP_PACKET_LEN || response[1] == 0 {
        return Err(SntpError::InvalidResponse);
    }

    let transmit_secs =
        u32::from_be_bytes([response[40], response[41], response[42], response[43]]) as u64;
    transmit_secs
        .checked_sub(NTP_UNIX_OFFSET)
        .ok_or(SntpError::InvalidResponse)
}
