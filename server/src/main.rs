use std::env;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::mpsc::channel;

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

mod calibration;
mod compensation;
mod config;
mod delivery;
mod dummy_data;
mod error;
mod packet;
mod poller;
mod session;
mod snapshot;
mod tcp_handler;
mod transport;
mod types;
mod web;

use anyhow::{anyhow, Context, Result};
use fern::colors::{Color, ColoredLevelConfig};

use crate::config::Config;
use crate::delivery::{Delivery, JsonLinesFile};
use crate::dummy_data::SimulatedBme280;
use crate::poller::Poller;
use crate::session::SensorSession;
use crate::snapshot::Snapshot;
use crate::tcp_handler::PacketFeed;
use crate::transport::RegisterTransport;

type BoxedTransport = Box<dyn RegisterTransport + Send>;

fn setup_logger(level: log::LevelFilter) -> Result<()> {
    fern::Dispatch::new()
        // Perform allocation-free log formatting
        .format(|out, message, record| {
            let colors = ColoredLevelConfig::default()
                .trace(Color::BrightBlue)
                .debug(Color::Cyan)
                .info(Color::Green)
                .warn(Color::Yellow)
                .error(Color::Red);

            out.finish(format_args!(
                "[{}][{}]{}",
                chrono::Local::now().format("%H:%M:%S"),
                colors.color(record.level()),
                message
            ))
        })
        .level(level)
        .level_for("simple_server", log::LevelFilter::Warn)
        .chain(std::io::stdout())
        .apply()
        .map_err(|e| anyhow!("failed to install logger: {}", e))
}

fn open_transport(config: &Config) -> Result<BoxedTransport> {
    if config.simulate {
        info!("Using a simulated sensor");
        return Ok(Box::new(SimulatedBme280::new()));
    }
    open_i2c(config)
}

#[cfg(feature = "raspi")]
fn open_i2c(config: &Config) -> Result<BoxedTransport> {
    use rppal::i2c::I2c;

    let i2c = I2c::with_bus(config.i2c_bus)
        .with_context(|| format!("failed to open i2c bus {}", config.i2c_bus))?;
    info!("Using sensor {:#04x} on i2c bus {}", config.i2c_address, config.i2c_bus);

    Ok(Box::new(transport::HalTransport::new(i2c, config.i2c_address)))
}

#[cfg(not(feature = "raspi"))]
fn open_i2c(_config: &Config) -> Result<BoxedTransport> {
    Err(anyhow!("built without I2C support, set `simulate = true`"))
}

fn main() -> Result<()> {
    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let config = config::read_config(&config_path)?;

    setup_logger(config.log_level()?)?;

    ////////////////////////////////////////////////////////////////////////////////
    ////////////////////////////////////////////////////////////////////////////////

    let transport = open_transport(&config)?;
    let mut session = SensorSession::new(transport, config.settings)
        .context("sensor startup failed")?;
    session.configure().context("sensor startup failed")?;

    let snapshot = Snapshot::new();
    let feed = PacketFeed::new();

    let mut sinks: Vec<Box<dyn Delivery>> = vec!(Box::new(feed.clone()));
    if let Some(path) = &config.push_log {
        info!("Appending readings to {}", path.display());
        sinks.push(Box::new(JsonLinesFile::new(path)));
    }

    let (tx, rx) = channel();
    delivery::run_delivery(rx, sinks, config.pressure_unit);

    let poller = Poller::start(session, config.poll_period(), snapshot.clone(), Some(tx))?;

    web::run_server(
            config.http_address.clone(),
            config.http_port,
            snapshot,
            poller.handle(),
            config.pressure_unit
        );

    let listener = TcpListener::bind((config.packet_address.as_str(), config.packet_port))
        .with_context(|| format!("failed to listen on port {}", config.packet_port))?;

    info!("Packet feed started, waiting for subscribers on port {}", config.packet_port);

    tcp_handler::tcp_handler(listener, feed);

    poller.stop()?;
    Ok(())
}
