use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};

/// One measurement cycle. A field is `None` when its registers could not be read
/// (or could not be compensated) during that cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reading {
    /// Position in the poller's cycle order, starting at 1
    pub sequence: u64,
    pub taken_at: Instant,
    pub recorded_at: DateTime<Utc>,
    /// 0.01 °C
    pub temperature: Option<i32>,
    /// Pa * 256
    pub pressure: Option<u32>,
    /// %RH * 1024
    pub humidity: Option<u32>,
}

impl Reading {
    pub fn absent(sequence: u64) -> Self {
        Self {
            sequence,
            taken_at: Instant::now(),
            recorded_at: Utc::now(),
            temperature: None,
            pressure: None,
            humidity: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.temperature.is_some() && self.pressure.is_some() && self.humidity.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.pressure.is_none() && self.humidity.is_none()
    }

    /// Whole pascals, rounded
    pub fn pressure_pa(&self) -> Option<u32> {
        self.pressure.map(|p| ((u64::from(p) + 128) >> 8) as u32)
    }

    /// Hundredths of a pascal, rounded
    pub fn pressure_centi_pa(&self) -> Option<u64> {
        self.pressure.map(|p| (u64::from(p) * 100 + 128) >> 8)
    }

    /// Hundredths of a percent, rounded
    pub fn humidity_centi_percent(&self) -> Option<u32> {
        self.humidity.map(|h| ((u64::from(h) * 100 + 512) >> 10) as u32)
    }

    pub fn timestamp_nanos(&self) -> u64 {
        let nanos = self.recorded_at.timestamp() * 1_000_000_000
            + i64::from(self.recorded_at.timestamp_subsec_nanos());
        nanos.max(0) as u64
    }
}

/// The textual form served to on-demand queries
impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.temperature {
            Some(t) => {
                let sign = if t < 0 {"-"} else {""};
                let t = t.unsigned_abs();
                writeln!(f, "Temp: {}{}.{:02} C", sign, t / 100, t % 100)?
            }
            None => writeln!(f, "Temp: -- C")?,
        }
        match self.pressure {
            // Truncated, like the integer part of the temperature
            Some(p) => writeln!(f, "Pressure: {} Pa", p >> 8)?,
            None => writeln!(f, "Pressure: -- Pa")?,
        }
        match self.humidity {
            Some(h) => writeln!(f, "Humidity: {} %", h >> 10),
            None => writeln!(f, "Humidity: -- %"),
        }
    }
}
