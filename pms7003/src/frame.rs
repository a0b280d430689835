//! PMS7003 wire format.
//!
//! Host commands are seven bytes long:
//!
//! ```text
//! 0x42 0x4D <command> <data high> <data low> <checksum high> <checksum low>
//! ```
//!
//! Measurement frames sent by the sensor are 32 bytes long: a four byte header
//! (`0x42 0x4D` followed by the big-endian length of the rest of the frame,
//! always 28), 26 bytes of payload and a big-endian checksum. The checksum is
//! the plain 16-bit sum of every byte that precedes it.
//!
//! Payload layout, all words big-endian:
//!
//! ```text
//! Offset  Field
//! ------  -----
//! 0       PM1.0 [μg/m³], standard particle
//! 2       PM2.5 [μg/m³], standard particle
//! 4       PM10  [μg/m³], standard particle
//! 6       PM1.0 [μg/m³], atmospheric environment
//! 8       PM2.5 [μg/m³], atmospheric environment
//! 10      PM10  [μg/m³], atmospheric environment
//! 12      particles > 0.3 μm in 0.1 L of air
//! 14      particles > 0.5 μm
//! 16      particles > 1.0 μm
//! 18      particles > 2.5 μm
//! 20      particles > 5.0 μm
//! 22      particles > 10 μm
//! 24      reserved (version, error code)
//! ```

use crate::ParsingError;

pub const START_1: u8 = 0x42;
pub const START_2: u8 = 0x4D;

pub const HEADER_LEN: usize = 4;
pub const PAYLOAD_LEN: usize = 26;
pub const CHECKSUM_LEN: usize = 2;
pub const FRAME_LEN: usize = HEADER_LEN + PAYLOAD_LEN + CHECKSUM_LEN;
pub const COMMAND_LEN: usize = 7;

/// Value of the length field of a measurement frame.
const BODY_LEN: u16 = (PAYLOAD_LEN + CHECKSUM_LEN) as u16;

/// Reply to [`Command::SetPassiveMode`].
pub const PASSIVE_MODE_ACK: [u8; 8] = [0x42, 0x4D, 0x00, 0x04, 0xE1, 0x00, 0x01, 0x74];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    SetPassiveMode,
    SetActiveMode,
    ReadPassive,
    Sleep,
    WakeUp,
}

impl Command {
    pub fn code(&self) -> u8 {
        match self {
            Self::SetPassiveMode | Self::SetActiveMode => 0xE1,
            Self::ReadPassive => 0xE2,
            Self::Sleep | Self::WakeUp => 0xE4,
        }
    }

    pub fn data(&self) -> [u8; 2] {
        match self {
            Self::SetPassiveMode => [0x00, 0x00],
            Self::SetActiveMode => [0x00, 0x01],
            Self::ReadPassive => [0x00, 0x00],
            Self::Sleep => [0x00, 0x00],
            Self::WakeUp => [0x00, 0x01],
        }
    }

    pub fn encode(&self) -> [u8; COMMAND_LEN] {
        encode_command(self.code(), self.data())
    }
}

/// A single decoded measurement frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Measurement {
    /// PM1.0 concentration, standard particle [μg/m³]
    pub pm1_0_standard: u16,
    /// PM2.5 concentration, standard particle [μg/m³]
    pub pm2_5_standard: u16,
    /// PM10 concentration, standard particle [μg/m³]
    pub pm10_standard: u16,
    /// PM1.0 concentration, atmospheric environment [μg/m³]
    pub pm1_0_atmospheric: u16,
    /// PM2.5 concentration, atmospheric environment [μg/m³]
    pub pm2_5_atmospheric: u16,
    /// PM10 concentration, atmospheric environment [μg/m³]
    pub pm10_atmospheric: u16,
    /// Particles beyond 0.3 μm [#/0.1 L]
    pub particles_0_3um: u16,
    /// Particles beyond 0.5 μm [#/0.1 L]
    pub particles_0_5um: u16,
    /// Particles beyond 1.0 μm [#/0.1 L]
    pub particles_1_0um: u16,
    /// Particles beyond 2.5 μm [#/0.1 L]
    pub particles_2_5um: u16,
    /// Particles beyond 5.0 μm [#/0.1 L]
    pub particles_5_0um: u16,
    /// Particles beyond 10 μm [#/0.1 L]
    pub particles_10um: u16,
}

impl Measurement {
    fn words(&self) -> [u16; 12] {
        [
            self.pm1_0_standard,
            self.pm2_5_standard,
            self.pm10_standard,
            self.pm1_0_atmospheric,
            self.pm2_5_atmospheric,
            self.pm10_atmospheric,
            self.particles_0_3um,
            self.particles_0_5um,
            self.particles_1_0um,
            self.particles_2_5um,
            self.particles_5_0um,
            self.particles_10um,
        ]
    }
}

fn sum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |acc, &byte| acc.wrapping_add(byte as u16))
}

pub fn encode_command(command: u8, data: [u8; 2]) -> [u8; COMMAND_LEN] {
    let mut buffer = [START_1, START_2, command, data[0], data[1], 0, 0];
    let checksum = sum(&buffer[..5]);
    buffer[5..].copy_from_slice(&checksum.to_be_bytes());
    buffer
}

fn header_is_valid(header: &[u8]) -> bool {
    header.len() == HEADER_LEN
        && header[0] == START_1
        && header[1] == START_2
        && u16::from_be_bytes([header[2], header[3]]) == BODY_LEN
}

fn checksum_matches(header: &[u8], payload: &[u8], checksum: &[u8]) -> bool {
    payload.len() == PAYLOAD_LEN
        && checksum.len() == CHECKSUM_LEN
        && sum(header).wrapping_add(sum(payload)) == u16::from_be_bytes([checksum[0], checksum[1]])
}

/// Checks framing and checksum of a measurement frame split into its parts.
///
/// Slices of the wrong length are reported as invalid rather than panicking.
pub fn validate(header: &[u8], payload: &[u8], checksum: &[u8]) -> bool {
    header_is_valid(header) && checksum_matches(header, payload, checksum)
}

/// Decodes the payload of a frame that already passed [`validate`].
pub fn decode_measurement(payload: &[u8; PAYLOAD_LEN]) -> Measurement {
    let word = |index: usize| u16::from_be_bytes([payload[2 * index], payload[2 * index + 1]]);

    Measurement {
        pm1_0_standard: word(0),
        pm2_5_standard: word(1),
        pm10_standard: word(2),
        pm1_0_atmospheric: word(3),
        pm2_5_atmospheric: word(4),
        pm10_atmospheric: word(5),
        particles_0_3um: word(6),
        particles_0_5um: word(7),
        particles_1_0um: word(8),
        particles_2_5um: word(9),
        particles_5_0um: word(10),
        particles_10um: word(11),
    }
}

/// Validates a complete 32 byte frame and decodes its payload.
pub fn parse_frame(bytes: &[u8]) -> Result<Measurement, ParsingError> {
    if bytes.len() != FRAME_LEN {
        return Err(ParsingError::Length);
    }

    let (header, rest) = bytes.split_at(HEADER_LEN);
    let (payload, checksum) = rest.split_at(PAYLOAD_LEN);

    if !header_is_valid(header) {
        return Err(ParsingError::Header);
    }
    if !checksum_matches(header, payload, checksum) {
        return Err(ParsingError::Checksum);
    }

    let payload: &[u8; PAYLOAD_LEN] = payload.try_into().map_err(|_| ParsingError::Length)?;
    Ok(decode_measurement(payload))
}

/// Builds the frame the sensor would send for `measurement`.
pub fn encode_measurement(measurement: &Measurement) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = START_1;
    frame[1] = START_2;
    frame[2..HEADER_LEN].copy_from_slice(&BODY_LEN.to_be_bytes());

    for (index, word) in measurement.words().iter().enumerate() {
        let offset = HEADER_LEN + 2 * index;
        frame[offset..offset + 2].copy_from_slice(&word.to_be_bytes());
    }

    let checksum = sum(&frame[..HEADER_LEN + PAYLOAD_LEN]);
    frame[HEADER_LEN + PAYLOAD_LEN..].copy_from_slice(&checksum.to_be_bytes());
    frame
}
