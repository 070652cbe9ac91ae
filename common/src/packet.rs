//! Fixed layout binary record for a single sensor reading.
//!
//! All fields are little-endian:
//!
//! | offset | size | field                         |
//! |--------|------|-------------------------------|
//! | 0      | 8    | timestamp, ns since unix epoch |
//! | 8      | 4    | temperature, i32, 0.01 °C     |
//! | 12     | 4    | humidity, u32, %RH * 1024     |
//! | 16     | 4    | pressure, u32, Pa * 256       |
//! | 20     | 2    | CRC-16/CCITT-FALSE of 0..20   |
//!
//! A measurement that was not available is sent as a sentinel value, see
//! [`TEMPERATURE_ABSENT`] and [`UNSIGNED_ABSENT`].

use core::fmt;

use crc::{Crc, CRC_16_IBM_3740};

pub const PACKET_LEN: usize = 22;
const CHECKED_LEN: usize = PACKET_LEN - 2;

/// Compensated temperatures stay within ±2^23, so this never collides with a reading
pub const TEMPERATURE_ABSENT: i32 = i32::MIN;
/// Humidity tops out at 102400. Pressure is clamped below this value by the
/// compensation; a `Some(u32::MAX)` encodes as absent.
pub const UNSIGNED_ABSENT: u32 = u32::MAX;

// CRC-16/IBM-3740 is the catalogue name of CCITT-FALSE: poly 0x1021, init 0xffff
const CHECKSUM: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SensorPacket {
    pub timestamp_ns: u64,
    pub temperature: Option<i32>,
    pub humidity: Option<u32>,
    pub pressure: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    Length(usize),
    Checksum { expected: u16, found: u16 },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecodeError::Length(len) => {
                write!(f, "packet is {} bytes, expected {}", len, PACKET_LEN)
            }
            DecodeError::Checksum { expected, found } => write!(
                f,
                "packet checksum mismatch: computed {:#06x}, packet says {:#06x}",
                expected, found
            ),
        }
    }
}

pub fn checksum(bytes: &[u8]) -> u16 {
    CHECKSUM.checksum(bytes)
}

impl SensorPacket {
    pub fn encode(&self) -> [u8; PACKET_LEN] {
        let mut result = [0; PACKET_LEN];
        result[0..8].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        result[8..12].copy_from_slice(
            &self.temperature.unwrap_or(TEMPERATURE_ABSENT).to_le_bytes()
        );
        result[12..16].copy_from_slice(
            &self.humidity.unwrap_or(UNSIGNED_ABSENT).to_le_bytes()
        );
        result[16..20].copy_from_slice(
            &self.pressure.unwrap_or(UNSIGNED_ABSENT).to_le_bytes()
        );

        let sum = checksum(&result[..CHECKED_LEN]);
        result[CHECKED_LEN..].copy_from_slice(&sum.to_le_bytes());
        result
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != PACKET_LEN {
            return Err(DecodeError::Length(bytes.len()));
        }

        let expected = checksum(&bytes[..CHECKED_LEN]);
        let found = u16::from_le_bytes([bytes[20], bytes[21]]);
        if expected != found {
            return Err(DecodeError::Checksum { expected, found });
        }

        let mut timestamp = [0; 8];
        timestamp.copy_from_slice(&bytes[0..8]);
        let word = |offset: usize| {
            [bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]]
        };

        let temperature = i32::from_le_bytes(word(8));
        let humidity = u32::from_le_bytes(word(12));
        let pressure = u32::from_le_bytes(word(16));

        Ok(Self {
            timestamp_ns: u64::from_le_bytes(timestamp),
            temperature: Some(temperature).filter(|&t| t != TEMPERATURE_ABSENT),
            humidity: Some(humidity).filter(|&h| h != UNSIGNED_ABSENT),
            pressure: Some(pressure).filter(|&p| p != UNSIGNED_ABSENT),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SensorPacket {
        SensorPacket {
            timestamp_ns: 0x0102_0304_0506_0708,
            temperature: Some(-512),
            humidity: Some(56317),
            pressure: Some(25767233),
        }
    }

    #[test]
    fn checksum_is_ccitt_false() {
        assert_eq!(checksum(b"123456789"), 0x29B1);
    }

    #[test]
    fn layout_is_little_endian() {
        let bytes = sample().encode();

        assert_eq!(&bytes[0..8], &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[8..12], &(-512i32).to_le_bytes());
        assert_eq!(&bytes[12..16], &56317u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &25767233u32.to_le_bytes());
        assert_eq!(
            u16::from_le_bytes([bytes[20], bytes[21]]),
            checksum(&bytes[..20])
        );
        assert_ne!(&bytes[20..], &[0, 0]);
    }

    #[test]
    fn encoding_is_deterministic() {
        assert_eq!(sample().encode(), sample().encode());
    }

    #[test]
    fn absent_fields_survive_decoding() {
        let packet = SensorPacket {
            timestamp_ns: 42,
            temperature: Some(2508),
            humidity: None,
            pressure: None,
        };
        let bytes = packet.encode();
        assert_eq!(&bytes[12..16], &[0xff; 4]);

        assert_eq!(SensorPacket::decode(&bytes), Ok(packet));
    }

    #[test]
    fn corrupted_packet_is_rejected() {
        let mut bytes = sample().encode();
        bytes[9] ^= 0x40;

        match SensorPacket::decode(&bytes) {
            Err(DecodeError::Checksum { expected, found }) => assert_ne!(expected, found),
            other => panic!("expected checksum error, got {:?}", other),
        }
    }

    #[test]
    fn short_packet_is_rejected() {
        let bytes = sample().encode();
        assert_eq!(
            SensorPacket::decode(&bytes[..21]),
            Err(DecodeError::Length(21))
        );
    }
}
