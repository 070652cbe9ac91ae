use std::fs::File;
use std::io::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::LevelFilter;

use crate::delivery::PressureUnit;
use crate::poller::DEFAULT_PERIOD;
use crate::session::Settings;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub i2c_bus: u8,
    pub i2c_address: u8,
    /// Use a simulated sensor instead of the I2C bus
    pub simulate: bool,
    pub poll_period_ms: u64,
    pub settings: Settings,
    pub http_port: u16,
    pub http_address: String,
    pub packet_port: u16,
    pub packet_address: String,
    /// Payloads are appended here, one JSON document per line
    pub push_log: Option<PathBuf>,
    pub pressure_unit: PressureUnit,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            i2c_bus: 1,
            i2c_address: 0x77,
            simulate: false,
            poll_period_ms: DEFAULT_PERIOD.as_millis() as u64,
            settings: Settings::default(),
            http_port: 8080,
            http_address: "0.0.0.0".into(),
            packet_port: 2000,
            packet_address: "0.0.0.0".into(),
            push_log: None,
            pressure_unit: PressureUnit::HPa,
            log_level: "debug".into(),
        }
    }
}

impl Config {
    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }

    pub fn log_level(&self) -> Result<LevelFilter> {
        self.log_level
            .parse()
            .map_err(|_| anyhow!("invalid log level {:?}", self.log_level))
    }
}

pub fn read_config(config_path: &Path) -> Result<Config> {
    let mut file = File::open(config_path)
        .with_context(|| format!("failed to open {}", config_path.display()))?;
    let mut content = String::new();
    file.read_to_string(&mut content)?;

    parse_config(&content).with_context(|| format!("failed to parse {}", config_path.display()))
}

fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)?;
    if config.poll_period_ms == 0 {
        anyhow::bail!("poll_period_ms must be positive");
    }
    config.log_level()?;
    Ok(config)
}
