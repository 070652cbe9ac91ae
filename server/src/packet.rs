use common::SensorPacket;

use crate::types::Reading;

/// Packs a reading for transmission. Pressure stays in its native Pa * 256 form.
pub fn encode(reading: &Reading, timestamp_ns: u64) -> SensorPacket {
    SensorPacket {
        timestamp_ns,
        temperature: reading.temperature,
        humidity: reading.humidity,
        pressure: reading.pressure,
    }
}
