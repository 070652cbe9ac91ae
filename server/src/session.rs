use std::time::{Duration, Instant};

use chrono::Utc;

use crate::calibration::CalibrationData;
use crate::compensation::{compensate_humidity, compensate_pressure, compensate_temperature};
use crate::error::{AcquireError, CalibrationError, ConfigError};
use crate::transport::RegisterTransport;
use crate::types::Reading;

// BME280 register addresses.
const REG_CHIP_ID: u8 = 0xD0;
const REG_CTRL_HUM: u8 = 0xF2;
const REG_CTRL_MEAS: u8 = 0xF4;
const REG_CONFIG: u8 = 0xF5;
const REG_PRESS: u8 = 0xF7;
const REG_TEMP: u8 = 0xFA;
const REG_HUM: u8 = 0xFD;

pub const BME280_CHIP_ID: u8 = 0x60;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Oversampling {
    Skip = 0b000,
    X1 = 0b001,
    X2 = 0b010,
    X4 = 0b011,
    X8 = 0b100,
    X16 = 0b101,
}

impl Oversampling {
    fn samples(self) -> u32 {
        match self {
            Oversampling::Skip => 0,
            Oversampling::X1 => 1,
            Oversampling::X2 => 2,
            Oversampling::X4 => 4,
            Oversampling::X8 => 8,
            Oversampling::X16 => 16,
        }
    }
}

/// Inactive time between two measurements in normal mode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum Standby {
    #[serde(rename = "0.5ms")]
    Ms0_5 = 0b000,
    #[serde(rename = "62.5ms")]
    Ms62_5 = 0b001,
    #[serde(rename = "125ms")]
    Ms125 = 0b010,
    #[serde(rename = "250ms")]
    Ms250 = 0b011,
    #[serde(rename = "500ms")]
    Ms500 = 0b100,
    #[serde(rename = "1000ms")]
    Ms1000 = 0b101,
    #[serde(rename = "10ms")]
    Ms10 = 0b110,
    #[serde(rename = "20ms")]
    Ms20 = 0b111,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    Off = 0b000,
    X2 = 0b001,
    X4 = 0b010,
    X8 = 0b011,
    X16 = 0b100,
}

#[derive(Clone, Copy)]
enum Mode {
    Sleep = 0b00,
    Normal = 0b11,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub temperature_oversampling: Oversampling,
    pub pressure_oversampling: Oversampling,
    pub humidity_oversampling: Oversampling,
    pub standby: Standby,
    pub filter: Filter,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            temperature_oversampling: Oversampling::X1,
            pressure_oversampling: Oversampling::X1,
            humidity_oversampling: Oversampling::X1,
            standby: Standby::Ms1000,
            filter: Filter::Off,
        }
    }
}

impl Settings {
    fn ctrl_hum(&self) -> u8 {
        self.humidity_oversampling as u8
    }

    fn ctrl_meas(&self, mode: Mode) -> u8 {
        ((self.temperature_oversampling as u8) << 5)
            | ((self.pressure_oversampling as u8) << 2)
            | mode as u8
    }

    fn config(&self) -> u8 {
        // spi3w_en stays 0
        ((self.standby as u8) << 5) | ((self.filter as u8) << 2)
    }

    /// Maximum duration of one measurement, datasheet appendix B
    pub fn measurement_time(&self) -> Duration {
        let t = self.temperature_oversampling.samples();
        let p = self.pressure_oversampling.samples();
        let h = self.humidity_oversampling.samples();

        let mut micros = 1250 + 2300 * t;
        if p > 0 {
            micros += 2300 * p + 575;
        }
        if h > 0 {
            micros += 2300 * h + 575;
        }
        Duration::from_micros(u64::from(micros))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Configured,
    Reading,
    Closed,
}

/// Owns the bus handle and the calibration of one device
pub struct SensorSession<T: RegisterTransport> {
    transport: T,
    calib: CalibrationData,
    settings: Settings,
    state: SessionState,
}

impl<T: RegisterTransport> SensorSession<T> {
    /// Checks the chip id and loads the calibration. The device is left untouched
    /// until [`SensorSession::configure`].
    pub fn new(mut transport: T, settings: Settings) -> Result<Self, CalibrationError> {
        let chip_id = transport.read_byte(REG_CHIP_ID)?;
        if chip_id != BME280_CHIP_ID {
            warn!("Unexpected chip id {:#04x}, expected a BME280 ({:#04x})", chip_id, BME280_CHIP_ID);
        }

        let calib = CalibrationData::load(&mut transport)?;

        Ok(Self {
            transport,
            calib,
            settings,
            state: SessionState::Uninitialized,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn settings(&self) -> Settings {
        self.settings
    }

    pub fn calibration(&self) -> &CalibrationData {
        &self.calib
    }

    /// How long to wait after configuring before the first reading is valid
    pub fn settle_time(&self) -> Duration {
        self.settings.measurement_time()
    }

    /// Starts continuous measurements with the current settings
    pub fn configure(&mut self) -> Result<(), ConfigError> {
        let settings = self.settings;
        self.write_settings(&settings, Mode::Normal)?;
        self.state = SessionState::Configured;
        info!("Sensor configured: {:?}", settings);
        Ok(())
    }

    /// Switches to new settings, keeping the old ones if the device rejects them
    pub fn reconfigure(&mut self, settings: Settings) -> Result<(), ConfigError> {
        if let Err(e) = self.write_settings(&settings, Mode::Normal) {
            error!("Reconfiguration failed, keeping {:?}: {}", self.settings, e.0);
            // Registers written before the failure already hold the new values
            let previous = self.settings;
            if let Err(restore) = self.write_settings(&previous, Mode::Normal) {
                warn!("Could not restore previous settings: {}", restore.0);
            }
            return Err(e);
        }
        self.settings = settings;
        self.state = SessionState::Configured;
        info!("Sensor reconfigured: {:?}", settings);
        Ok(())
    }

    fn write_settings(&mut self, settings: &Settings, mode: Mode) -> Result<(), ConfigError> {
        // ctrl_hum only takes effect after the following ctrl_meas write
        self.transport.write_byte(REG_CTRL_HUM, settings.ctrl_hum())?;
        self.transport.write_byte(REG_CONFIG, settings.config())?;
        self.transport.write_byte(REG_CTRL_MEAS, settings.ctrl_meas(mode))?;
        Ok(())
    }

    /// Reads and compensates the latest measurement. Each measurement block is
    /// read separately and a failed block only removes its own field from the
    /// reading, except temperature which pressure and humidity depend on.
    pub fn acquire(&mut self, sequence: u64) -> Result<Reading, AcquireError> {
        if self.state != SessionState::Configured {
            return Err(AcquireError::NotConfigured(self.state));
        }
        self.state = SessionState::Reading;

        let taken_at = Instant::now();
        let recorded_at = Utc::now();

        let raw_temperature = self.read_raw::<3>(REG_TEMP, "temperature", decode_20bit);
        let raw_pressure = self.read_raw::<3>(REG_PRESS, "pressure", decode_20bit);
        let raw_humidity = self.read_raw::<2>(REG_HUM, "humidity", decode_16bit);

        let mut reading = Reading {
            sequence,
            taken_at,
            recorded_at,
            temperature: None,
            pressure: None,
            humidity: None,
        };

        if let Some(adc_t) = raw_temperature {
            let (temperature, t_fine) = compensate_temperature(adc_t, &self.calib);
            reading.temperature = Some(temperature);
            reading.pressure = raw_pressure.map(|adc_p| compensate_pressure(adc_p, t_fine, &self.calib));
            reading.humidity = raw_humidity.map(|adc_h| compensate_humidity(adc_h, t_fine, &self.calib));
        }
        else if raw_pressure.is_some() || raw_humidity.is_some() {
            warn!("Discarding pressure and humidity of cycle {}, no temperature", sequence);
        }

        self.state = SessionState::Configured;
        Ok(reading)
    }

    fn read_raw<const N: usize>(
        &mut self,
        register: u8,
        name: &str,
        decode: fn([u8; N]) -> i32,
    ) -> Option<i32> {
        let mut buffer = [0; N];
        match self.transport.read_block(register, &mut buffer) {
            Ok(()) => Some(decode(buffer)),
            Err(e) => {
                warn!("Failed to read {}: {}", name, e);
                None
            }
        }
    }

    /// Puts the device to sleep. The session can not be read from afterwards.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        let settings = self.settings;
        if self.state != SessionState::Uninitialized {
            if let Err(e) = self.write_settings(&settings, Mode::Sleep) {
                warn!("Failed to put sensor to sleep: {}", e.0);
            }
        }
        self.state = SessionState::Closed;
        info!("Sensor session closed");
    }

    pub fn into_transport(self) -> T {
        self.transport
    }
}

fn decode_20bit(raw: [u8; 3]) -> i32 {
    (i32::from(raw[0]) << 12) | (i32::from(raw[1]) << 4) | (i32::from(raw[2]) >> 4)
}

fn decode_16bit(raw: [u8; 2]) -> i32 {
    (i32::from(raw[0]) << 8) | i32::from(raw[1])
}
