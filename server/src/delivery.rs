use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::thread::{self, JoinHandle};

use common::SensorPacket;

use crate::error::DeliveryError;
use crate::packet;
use crate::types::Reading;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureUnit {
    Pa,
    HPa,
}

impl Default for PressureUnit {
    fn default() -> Self {
        PressureUnit::HPa
    }
}

/// The JSON document pushed once per reading. Absent measurements are left out.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Payload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
}

impl Payload {
    pub fn from_reading(reading: &Reading, unit: PressureUnit) -> Self {
        let pressure = match unit {
            PressureUnit::Pa => reading.pressure_centi_pa().map(|p| p as f64 / 100.),
            // 1 hPa = 100 Pa, so whole pascals are hPa with two decimals
            PressureUnit::HPa => reading.pressure_pa().map(|p| f64::from(p) / 100.),
        };

        Self {
            temperature: reading.temperature.map(|t| f64::from(t) / 100.),
            pressure,
            humidity: reading.humidity_centi_percent().map(|h| f64::from(h) / 100.),
        }
    }

    pub fn to_json(&self) -> Result<String, DeliveryError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Everything handed to the outbound side for one reading
pub struct Outbound {
    pub reading: Reading,
    pub payload: Payload,
    pub packet: SensorPacket,
}

impl Outbound {
    pub fn new(reading: Reading, unit: PressureUnit) -> Self {
        Self {
            payload: Payload::from_reading(&reading, unit),
            packet: packet::encode(&reading, reading.timestamp_nanos()),
            reading,
        }
    }
}

/// An outbound transport. Retries, if any, are up to the implementation.
pub trait Delivery: Send {
    fn name(&self) -> &str;
    fn deliver(&mut self, outbound: &Outbound) -> Result<(), DeliveryError>;
}

/// Appends every payload as one line of JSON
pub struct JsonLinesFile {
    path: PathBuf,
}

impl JsonLinesFile {
    pub fn new(path: &Path) -> Self {
        Self {path: path.to_path_buf()}
    }
}

impl Delivery for JsonLinesFile {
    fn name(&self) -> &str {
        "json log"
    }

    fn deliver(&mut self, outbound: &Outbound) -> Result<(), DeliveryError> {
        let mut line = outbound.payload.to_json()?;
        line.push('\n');

        let mut file = OpenOptions::new().append(true).create(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;

        Ok(())
    }
}

/// Hands every reading received on `rx` to all sinks until the sending side is
/// dropped, i.e. until the poller stops.
pub fn run_delivery(
    rx: Receiver<Reading>,
    mut sinks: Vec<Box<dyn Delivery>>,
    unit: PressureUnit,
) -> JoinHandle<()> {
    thread::spawn(move || {
        for reading in rx {
            let outbound = Outbound::new(reading, unit);
            match outbound.payload.to_json() {
                Ok(json) => info!("Pushing reading {}: {}", reading.sequence, json),
                Err(e) => error!("Failed to encode reading {}: {}", reading.sequence, e),
            }

            for sink in sinks.iter_mut() {
                if let Err(e) = sink.deliver(&outbound) {
                    error!("Failed to deliver reading {} to {}: {}", reading.sequence, sink.name(), e);
                }
            }
        }
        info!("Delivery stopped");
    })
}
