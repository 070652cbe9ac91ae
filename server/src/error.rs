use std::fmt;
use std::io;

use thiserror::Error;

use crate::session::SessionState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusOp {
    ReadBlock,
    WriteByte,
}

impl fmt::Display for BusOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BusOp::ReadBlock => write!(f, "read"),
            BusOp::WriteByte => write!(f, "write"),
        }
    }
}

/// A single failed register transaction.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("bus {op} of register {register:#04x} failed: {cause}")]
pub struct BusError {
    pub register: u8,
    pub op: BusOp,
    pub cause: String,
}

impl BusError {
    pub fn new(register: u8, op: BusOp, cause: impl fmt::Debug) -> Self {
        Self {register, op, cause: format!("{:?}", cause)}
    }
}

#[derive(Debug, Error)]
#[error("failed to load calibration data")]
pub struct CalibrationError(#[from] pub BusError);

#[derive(Debug, Error)]
#[error("failed to write control registers")]
pub struct ConfigError(#[from] pub BusError);

#[derive(Debug, Error, PartialEq)]
pub enum AcquireError {
    #[error("sensor session is {0:?}, it must be configured before reading")]
    NotConfigured(SessionState),
}

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("refusing to poll a sensor session that is {0:?}")]
    NotConfigured(SessionState),
    #[error("failed to spawn poller thread")]
    Spawn(#[from] io::Error),
    #[error("poller is not running")]
    Stopped,
    #[error("poller did not answer in time")]
    Timeout,
    #[error("poller thread panicked")]
    Panicked,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error, PartialEq)]
pub enum SnapshotError {
    #[error("no data yet")]
    NoData,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("io error")]
    Io(#[from] io::Error),
    #[error("failed to serialize payload")]
    Json(#[from] serde_json::Error),
}
