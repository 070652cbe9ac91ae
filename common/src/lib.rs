#![cfg_attr(not(test), no_std)]

pub mod packet;

pub use packet::{DecodeError, SensorPacket, PACKET_LEN};
