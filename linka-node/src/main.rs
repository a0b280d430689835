#![no_std]
#![no_main]
#![feature(type_alias_impl_trait)]

extern crate alloc;

use core::mem::MaybeUninit;

use embassy_executor::Spawner;
use embassy_net::{Config, StackResources};
use embassy_time::{with_timeout, Delay, Duration, Timer};
use embedded_io_async::{ErrorType, Read, Write};
use esp_backtrace as _;
use esp_wifi::wifi::{ClientConfiguration, Configuration, WifiDevice, WifiStaDevice};
use hal::gpio::{AnyPin, Output, PushPull};
use hal::peripherals::UART1;
use hal::uart::config::{Config as UartConfig, DataBits, Parity, StopBits};
use hal::uart::TxRxPins;
use hal::{clock::ClockControl, peripherals::Peripherals, prelude::*, Rng, Uart, IO};
use hal::{embassy, interrupt};
use linka_shared::station::sensor_id_from_mac;
use linka_shared::{BuildInfo, Platform, Publisher, Runner, StationConfig, StatusIndicator};
use pms7003::{Pms7003, RetryPolicy};
use static_cell::make_static;

mod http;
mod sntp;

use http::{HttpTransport, TcpState};
use sntp::{sntp_task, SntpClock};

const SSID: &str = env!("SSID");
const PASSWORD: &str = env!("PASSWORD");
const API_KEY: &str = env!("API_KEY");
const DESCRIPTION: &str = env!("DESCRIPTION");
const LATITUDE: &str = env!("LATITUDE");
const LONGITUDE: &str = env!("LONGITUDE");
const LINKA_URL: Option<&str> = option_env!("LINKA_URL");

const HEAP_SIZE: usize = 32 * 1024;
/// The sensor line counts as quiet after this long without a byte.
const UART_QUIET: Duration = Duration::from_millis(100);

pub type WifiStaDriver = WifiDevice<'static, WifiStaDevice>;
pub type NetStack = embassy_net::Stack<WifiStaDriver>;

#[global_allocator]
static ALLOCATOR: esp_alloc::EspHeap = esp_alloc::EspHeap::empty();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("panic: {}", info);
    hal::reset::software_reset();
    loop {}
}

fn init_heap() {
    static mut HEAP: MaybeUninit<[u8; HEAP_SIZE]> = MaybeUninit::uninit();

    unsafe {
        ALLOCATOR.init(HEAP.as_mut_ptr() as *mut u8, HEAP_SIZE);
    }
}

/// UART whose reads end with `Ok(0)` once the sensor stops talking.
struct SensorUart {
    uart: Uart<'static, UART1>,
}

impl ErrorType for SensorUart {
    type Error = hal::uart::Error;
}

impl Read for SensorUart {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        match with_timeout(UART_QUIET, Read::read(&mut self.uart, buf)).await {
            Ok(result) => result,
            Err(_) => Ok(0),
        }
    }
}

impl Write for SensorUart {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        Write::write(&mut self.uart, buf).await
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Write::flush(&mut self.uart).await
    }
}

/// Lit while idle, dark while a record is on its way.
struct Led {
    pin: AnyPin<Output<PushPull>>,
}

impl StatusIndicator for Led {
    fn off(&mut self) {
        let _ = self.pin.set_low();
    }

    fn on(&mut self) {
        let _ = self.pin.set_high();
    }
}

struct Node;

impl Platform for Node {
    type Link = SensorUart;
    type Delay = Delay;
    type Transport = HttpTransport;
    type Indicator = Led;
    type Clock = SntpClock;
}

#[main]
async fn main(spawner: Spawner) {
    init_heap();
    esp_println::logger::init_logger(log::LevelFilter::Info);

    let peripherals = Peripherals::take();
    let system = peripherals.SYSTEM.split();
    let clocks = ClockControl::max(system.clock_control).freeze();

    embassy::init(
        &clocks,
        hal::timer::TimerGroup::new(peripherals.TIMG0, &clocks),
    );
    let io = IO::new(peripherals.GPIO, peripherals.IO_MUX);

    let uart_config = UartConfig {
        baudrate: 9600,
        data_bits: DataBits::DataBits8,
        parity: Parity::ParityNone,
        stop_bits: StopBits::STOP1,
    };
    let pins = TxRxPins::new_tx_rx(
        io.pins.gpio21.into_push_pull_output(),
        io.pins.gpio20.into_floating_input(),
    );
    let uart = Uart::new_with_config(peripherals.UART1, uart_config, Some(pins), &clocks);
    interrupt::enable(
        hal::peripherals::Interrupt::UART1,
        interrupt::Priority::Priority1,
    )
    .unwrap();

    let mut led = Led {
        pin: io.pins.gpio8.into_push_pull_output().degrade(),
    };
    led.on();

    let mut rng = Rng::new(peripherals.RNG);
    let stack_seed = rng.random() as u64;

    let init = esp_wifi::initialize(
        esp_wifi::EspWifiInitFor::Wifi,
        hal::systimer::SystemTimer::new(peripherals.SYSTIMER).alarm0,
        rng,
        system.radio_clock_control,
        &clocks,
    )
    .unwrap();

    let (wifi_interface, controller) =
        esp_wifi::wifi::new_with_mode(&init, peripherals.WIFI, WifiStaDevice).unwrap();

    let mut mac = [0u8; 6];
    esp_wifi::wifi::get_ap_mac(&mut mac);

    let station = StationConfig::new(
        sensor_id_from_mac(&mac),
        API_KEY,
        DESCRIPTION,
        LATITUDE.parse().expect("LATITUDE is not a number"),
        LONGITUDE.parse().expect("LONGITUDE is not a number"),
    )
    .with_url(LINKA_URL.unwrap_or(BuildInfo::DEFAULT_URL));
    log::info!(
        "Station {} ({}) reporting to {}",
        station.sensor_id(),
        station.description(),
        station.url()
    );

    let stack = &*make_static!(embassy_net::Stack::new(
        wifi_interface,
        Config::dhcpv4(Default::default()),
        make_static!(StackResources::<4>::new()),
        stack_seed
    ));

    spawner.spawn(connection(controller)).ok();
    spawner.spawn(net_task(stack)).ok();

    wait_for_connection(stack).await;
    spawner.spawn(sntp_task(stack)).ok();

    let sensor = Pms7003::with_retry_policy(SensorUart { uart }, Delay, RetryPolicy::default());
    let transport = HttpTransport::new(stack, make_static!(TcpState::new()));
    let publisher = Publisher::new(transport, led, &station);
    let runner = Runner::<Node>::new(sensor, publisher, SntpClock, Delay, station);
    spawner.spawn(station_task(runner)).ok();
}

#[embassy_executor::task]
async fn station_task(mut runner: Runner<Node>) {
    if let Err(e) = runner.run().await {
        log::error!("Sensor stopped: {}, restarting", e);
        Timer::after(Duration::from_secs(60)).await;
        hal::reset::software_reset();
    }
}

#[embassy_executor::task]
async fn connection(mut controller: esp_wifi::wifi::WifiController<'static>) {
    loop {
        if esp_wifi::wifi::get_wifi_state() == esp_wifi::wifi::WifiState::StaConnected {
            controller
                .wait_for_event(esp_wifi::wifi::WifiEvent::StaDisconnected)
                .await;
            log::warn!("Wifi disconnected");
            Timer::after(Duration::from_millis(5000)).await
        }
        if !matches!(controller.is_started(), Ok(true)) {
            let client_config = Configuration::Client(ClientConfiguration {
                ssid: SSID.try_into().unwrap(),
                password: PASSWORD.try_into().unwrap(),
                ..Default::default()
            });
            controller.set_configuration(&client_config).unwrap();
            controller.start().await.unwrap();
        }

        match controller.connect().await {
            Ok(_) => log::info!("Wifi connected to {}", SSID),
            Err(e) => {
                log::error!("Failed to connect to wifi: {:?}", e);
                Timer::after(Duration::from_millis(5000)).await
            }
        }
    }
}

#[embassy_executor::task]
async fn net_task(stack: &'static NetStack) {
    stack.run().await
}

async fn wait_for_connection(stack: &'static NetStack) {
    loop {
        if stack.is_link_up() {
            break;
        }
        Timer::after(Duration::from_millis(500)).await;
    }

    log::info!("Waiting to get IP address...");
    loop {
        if let Some(config) = stack.config_v4() {
            log::info!("Got IP: {}", config.address);
            break;
        }
        Timer::after(Duration::from_millis(500)).await;
    }
}
