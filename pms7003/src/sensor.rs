use embedded_hal_async::delay::DelayNs;
use embedded_io_async::{Read, Write};

use crate::frame::{self, Command, Measurement, FRAME_LEN, PASSIVE_MODE_ACK};
use crate::Error;

/// The sensor needs this long to answer a read request.
const READ_SETTLE_MS: u32 = 2000;
const WAKEUP_DELAY_MS: u32 = 5000;
const MODE_CHANGE_DELAY_MS: u32 = 1000;
/// Upper bound on reads spent discarding data, a sensor left in active mode never goes quiet.
const MAX_DRAIN_READS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    Uninitialized,
    PassiveModeHandshake,
    Ready,
    ReadCycle,
}

/// How often the passive mode handshake is attempted before giving up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Time between sending the command and reading the answer.
    pub backoff_ms: u32,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_ms: 1000,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(30)
    }
}

/// PMS7003 driven in passive mode over a UART link.
///
/// Reads on `L` are expected to return `Ok(0)` once the line stays quiet for
/// the link's timeout, the way a serial port with a read timeout behaves.
pub struct Pms7003<L, D> {
    link: L,
    delay: D,
    state: State,
    retry: RetryPolicy,
}

impl<L, D> Pms7003<L, D>
where
    L: Read + Write,
    D: DelayNs,
{
    pub fn new(link: L, delay: D) -> Self {
        Self::with_retry_policy(link, delay, RetryPolicy::default())
    }

    pub fn with_retry_policy(link: L, delay: D, retry: RetryPolicy) -> Self {
        Self {
            link,
            delay,
            state: State::Uninitialized,
            retry,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Gives the link back, consuming the driver.
    pub fn release(self) -> L {
        self.link
    }

    /// Switches the sensor to passive mode.
    ///
    /// The sensor has to answer with exactly [`PASSIVE_MODE_ACK`]; anything
    /// else is retried until the retry policy runs out.
    pub async fn initialize(&mut self) -> Result<(), Error<L::Error>> {
        self.state = State::PassiveModeHandshake;

        for attempt in 1..=self.retry.max_attempts {
            match self.exchange_handshake().await {
                Ok(true) => {
                    log::info!("PMS7003: passive mode acknowledged (attempt {})", attempt);
                    self.state = State::Ready;
                    return Ok(());
                }
                Ok(false) => log::debug!(
                    "PMS7003: no passive mode ack, attempt {}/{}",
                    attempt,
                    self.retry.max_attempts
                ),
                Err(e) => log::warn!("PMS7003: link error during handshake: {:?}", e),
            }
        }

        Err(Error::HandshakeFailed {
            attempts: self.retry.max_attempts,
        })
    }

    async fn exchange_handshake(&mut self) -> Result<bool, L::Error> {
        self.drain().await?;
        self.send(Command::SetPassiveMode).await?;
        self.delay.delay_ms(self.retry.backoff_ms).await;

        let mut response = [0u8; FRAME_LEN];
        let received = self.receive(&mut response).await?;
        Ok(response[..received] == PASSIVE_MODE_ACK)
    }

    /// Requests a single reading, `None` when no valid frame came back.
    pub async fn read(&mut self) -> Option<Measurement> {
        match self.try_read().await {
            Ok(measurement) => Some(measurement),
            Err(e) => {
                log::warn!("PMS7003: no reading this cycle: {}", e);
                None
            }
        }
    }

    pub async fn try_read(&mut self) -> Result<Measurement, Error<L::Error>> {
        if self.state != State::Ready {
            return Err(Error::NotReady);
        }

        self.state = State::ReadCycle;
        let result = self.exchange_reading().await;
        self.state = State::Ready;
        result
    }

    async fn exchange_reading(&mut self) -> Result<Measurement, Error<L::Error>> {
        // leftovers of an earlier cycle would shift the frame
        self.drain().await?;
        self.send(Command::ReadPassive).await?;
        self.delay.delay_ms(READ_SETTLE_MS).await;

        let mut buffer = [0u8; FRAME_LEN];
        let received = self.receive(&mut buffer).await?;
        if received < FRAME_LEN {
            return Err(Error::ShortRead {
                expected: FRAME_LEN,
                received,
            });
        }

        Ok(frame::parse_frame(&buffer)?)
    }

    pub async fn wakeup(&mut self) -> Result<(), Error<L::Error>> {
        self.send(Command::WakeUp).await?;
        self.delay.delay_ms(WAKEUP_DELAY_MS).await;
        self.drain().await?;
        Ok(())
    }

    pub async fn sleep(&mut self) -> Result<(), Error<L::Error>> {
        self.send(Command::Sleep).await?;
        self.delay.delay_ms(MODE_CHANGE_DELAY_MS).await;
        self.drain().await?;
        Ok(())
    }

    /// Puts the sensor back into streaming mode, [`Self::initialize`] has to
    /// run again before the next [`Self::read`].
    pub async fn set_active_mode(&mut self) -> Result<(), Error<L::Error>> {
        self.send(Command::SetActiveMode).await?;
        self.state = State::Uninitialized;
        self.delay.delay_ms(MODE_CHANGE_DELAY_MS).await;
        self.drain().await?;
        Ok(())
    }

    async fn send(&mut self, command: Command) -> Result<(), L::Error> {
        self.link.write_all(&command.encode()).await?;
        self.link.flush().await
    }

    /// Fills `buffer` until it is full or the link goes quiet.
    async fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, L::Error> {
        let mut filled = 0;
        while filled < buffer.len() {
            match self.link.read(&mut buffer[filled..]).await? {
                0 => break,
                read => filled += read,
            }
        }
        Ok(filled)
    }

    async fn drain(&mut self) -> Result<usize, L::Error> {
        let mut scratch = [0u8; FRAME_LEN];
        let mut discarded = 0;
        for _ in 0..MAX_DRAIN_READS {
            match self.link.read(&mut scratch).await? {
                0 => break,
                read => discarded += read,
            }
        }
        log::trace!("PMS7003: discarded {} bytes", discarded);
        Ok(discarded)
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;
    use crate::frame::encode_measurement;
    use crate::testing::{RecordingDelay, ScriptedLink};
    use crate::ParsingError;

    fn reading() -> Measurement {
        Measurement {
            pm1_0_atmospheric: 12,
            pm2_5_atmospheric: 35,
            pm10_atmospheric: 40,
            ..Default::default()
        }
    }

    fn ready_sensor(link: ScriptedLink) -> Pms7003<ScriptedLink, RecordingDelay> {
        let mut sensor = Pms7003::new(link.respond(&PASSIVE_MODE_ACK), RecordingDelay::new());
        block_on(sensor.initialize()).unwrap();
        sensor
    }

    #[test]
    fn handshake_accepts_exact_ack() {
        let link = ScriptedLink::new().respond(&PASSIVE_MODE_ACK);
        let delay = RecordingDelay::new();
        let mut sensor = Pms7003::new(link, delay.clone());

        assert_eq!(sensor.state(), State::Uninitialized);
        block_on(sensor.initialize()).unwrap();

        assert_eq!(sensor.state(), State::Ready);
        assert_eq!(delay.recorded(), vec![1000]);
        let link = sensor.release();
        assert_eq!(link.written(), vec![Command::SetPassiveMode.encode().to_vec()]);
    }

    #[test]
    fn handshake_retries_until_ack() {
        let link = ScriptedLink::new()
            .respond(&[])
            .respond(&PASSIVE_MODE_ACK[..5])
            .respond(&[0x42, 0x4D, 0x00, 0x04, 0xE1, 0x00, 0x01, 0x75])
            .respond(&PASSIVE_MODE_ACK);
        let mut sensor = Pms7003::new(link, RecordingDelay::new());

        block_on(sensor.initialize()).unwrap();

        assert_eq!(sensor.state(), State::Ready);
        assert_eq!(sensor.release().written().len(), 4);
    }

    #[test]
    fn handshake_gives_up() {
        let link = ScriptedLink::new()
            .respond(&PASSIVE_MODE_ACK[..7])
            .respond(&[])
            .respond(&encode_measurement(&reading()));
        let mut sensor =
            Pms7003::with_retry_policy(link, RecordingDelay::new(), RetryPolicy::new(3));

        let result = block_on(sensor.initialize());

        assert!(matches!(result, Err(Error::HandshakeFailed { attempts: 3 })));
        assert_eq!(sensor.state(), State::PassiveModeHandshake);
    }

    #[test]
    fn handshake_discards_streamed_frames() {
        let mut streamed = encode_measurement(&reading()).to_vec();
        streamed.extend_from_slice(&encode_measurement(&reading())[..8]);
        let link = ScriptedLink::new()
            .respond(&streamed)
            .respond(&PASSIVE_MODE_ACK);
        let mut sensor =
            Pms7003::with_retry_policy(link, RecordingDelay::new(), RetryPolicy::new(2));

        block_on(sensor.initialize()).unwrap();

        assert_eq!(sensor.state(), State::Ready);
    }

    #[test]
    fn ack_followed_by_extra_bytes_is_rejected() {
        let mut response = PASSIVE_MODE_ACK.to_vec();
        response.push(0x42);
        let link = ScriptedLink::new().respond(&response);
        let mut sensor =
            Pms7003::with_retry_policy(link, RecordingDelay::new(), RetryPolicy::new(1));

        assert!(block_on(sensor.initialize()).is_err());
        assert_eq!(sensor.state(), State::PassiveModeHandshake);
    }

    #[test]
    fn read_decodes_complete_frame() {
        let link = ScriptedLink::new()
            .chunked(5)
            .respond(&PASSIVE_MODE_ACK)
            .respond(&encode_measurement(&reading()));
        let mut sensor = Pms7003::new(link, RecordingDelay::new());
        block_on(sensor.initialize()).unwrap();

        assert_eq!(block_on(sensor.read()), Some(reading()));
        assert_eq!(sensor.state(), State::Ready);
        let written = sensor.release().written();
        assert_eq!(written.last().unwrap(), &Command::ReadPassive.encode().to_vec());
    }

    #[test]
    fn read_waits_for_sensor() {
        let delay = RecordingDelay::new();
        let link = ScriptedLink::new()
            .respond(&PASSIVE_MODE_ACK)
            .respond(&encode_measurement(&reading()));
        let mut sensor = Pms7003::new(link, delay.clone());

        block_on(sensor.initialize()).unwrap();
        block_on(sensor.read()).unwrap();

        assert_eq!(delay.recorded(), vec![1000, 2000]);
    }

    #[test]
    fn short_read_is_no_measurement() {
        let frame = encode_measurement(&reading());
        let link = ScriptedLink::new()
            .respond(&PASSIVE_MODE_ACK)
            .respond(&frame[..31])
            .respond(&[]);
        let mut sensor = Pms7003::new(link, RecordingDelay::new());
        block_on(sensor.initialize()).unwrap();

        assert!(matches!(
            block_on(sensor.try_read()),
            Err(Error::ShortRead {
                expected: 32,
                received: 31
            })
        ));
        assert_eq!(block_on(sensor.read()), None);
        assert_eq!(sensor.state(), State::Ready);
    }

    #[test]
    fn corrupted_frame_is_no_measurement() {
        let mut frame = encode_measurement(&reading());
        frame[10] ^= 0x01;
        let link = ScriptedLink::new()
            .respond(&PASSIVE_MODE_ACK)
            .respond(&frame);
        let mut sensor = Pms7003::new(link, RecordingDelay::new());
        block_on(sensor.initialize()).unwrap();

        assert!(matches!(
            block_on(sensor.try_read()),
            Err(Error::Parsing(ParsingError::Checksum))
        ));
    }

    #[test]
    fn trailing_byte_does_not_misalign_later_reads() {
        let frame = encode_measurement(&reading());
        let mut padded = frame.to_vec();
        padded.push(0x00);
        let link = ScriptedLink::new()
            .respond(&PASSIVE_MODE_ACK)
            .respond(&padded)
            .respond(&frame)
            .respond(&frame)
            .respond(&frame);
        let mut sensor = Pms7003::new(link, RecordingDelay::new());
        block_on(sensor.initialize()).unwrap();

        for _ in 0..4 {
            assert_eq!(block_on(sensor.read()), Some(reading()));
        }
        assert_eq!(sensor.release().unread(), 0);
    }

    #[test]
    fn link_error_is_no_measurement() {
        let link = ScriptedLink::new().respond(&PASSIVE_MODE_ACK).fail();
        let mut sensor = Pms7003::new(link, RecordingDelay::new());
        block_on(sensor.initialize()).unwrap();

        assert!(matches!(block_on(sensor.try_read()), Err(Error::Link(_))));
        assert_eq!(sensor.state(), State::Ready);
    }

    #[test]
    fn read_requires_handshake() {
        let link = ScriptedLink::new().respond(&encode_measurement(&reading()));
        let mut sensor = Pms7003::new(link, RecordingDelay::new());

        assert!(matches!(block_on(sensor.try_read()), Err(Error::NotReady)));
        assert!(sensor.release().written().is_empty());
    }

    #[test]
    fn wakeup_drains_link() {
        let delay = RecordingDelay::new();
        let link = ScriptedLink::new().respond(&encode_measurement(&reading()));
        let mut sensor = Pms7003::new(link, delay.clone());

        block_on(sensor.wakeup()).unwrap();

        assert_eq!(delay.recorded(), vec![5000]);
        let link = sensor.release();
        assert_eq!(link.written(), vec![Command::WakeUp.encode().to_vec()]);
        assert_eq!(link.unread(), 0);
    }

    #[test]
    fn active_mode_requires_new_handshake() {
        let link = ScriptedLink::new()
            .respond(&PASSIVE_MODE_ACK)
            .respond(&[0x42, 0x4D, 0x00, 0x04, 0xE1, 0x01, 0x01, 0x75]);
        let mut sensor = Pms7003::new(link, RecordingDelay::new());
        block_on(sensor.initialize()).unwrap();

        block_on(sensor.set_active_mode()).unwrap();

        assert_eq!(sensor.state(), State::Uninitialized);
        assert!(matches!(block_on(sensor.try_read()), Err(Error::NotReady)));
    }

    #[test]
    fn sleep_sends_command() {
        let mut sensor = ready_sensor(ScriptedLink::new());

        block_on(sensor.sleep()).unwrap();

        let written = sensor.release().written();
        assert_eq!(written.last().unwrap(), &Command::Sleep.encode().to_vec());
    }
}
