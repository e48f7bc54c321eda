mod adc;
mod config;
mod logging;
mod rest;
mod sampler;
mod shutdown;
mod spi;

use adc::Mcp3008;
use config::Config;
use rest::RestClient;
use sampler::{Sampler, SamplerSettings, ThreadSleeper};
use shutdown::StopSignal;
use spi::{SimulatedBus, SpiBus, SpiTransfer};

use anyhow::Context;
use std::process::ExitCode;
use tracing::{error, info, warn};

const EXIT_CONFIG: u8 = 1;
const EXIT_HARDWARE: u8 = 2;
const EXIT_NETWORK: u8 = 3;

fn open_bus(config: &Config) -> anyhow::Result<Box<dyn SpiTransfer>> {
    if config.simulate {
        info!("Simulation mode: generating synthetic breathing data");
        return Ok(Box::new(SimulatedBus::new()));
    }

    let bus = SpiBus::open(&config.spi_device, config.spi_clock_hz)
        .context("Failed to initialize ADC")?;
    info!("MCP3008 ADC initialized on {}", config.spi_device);
    Ok(Box::new(bus))
}

fn open_client(config: &Config) -> anyhow::Result<RestClient> {
    let client = RestClient::new(&config.api_url, config.http_timeout, config.http_connect_timeout)
        .context("Failed to initialize REST client")?;
    info!("REST client initialized for {}", client.base_url());
    Ok(client)
}

fn main() -> ExitCode {
    logging::init();
    info!("Breath sensor starting...");

    let stop = StopSignal::new();
    if let Err(e) = stop.install_handlers() {
        warn!("Could not install signal handlers: {}", e);
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    config.log_summary();

    let bus = match open_bus(&config) {
        Ok(bus) => bus,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_HARDWARE);
        }
    };

    // The bus is dropped on this early return as well.
    let client = match open_client(&config) {
        Ok(client) => client,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_NETWORK);
        }
    };

    let sampler = Sampler::new(Mcp3008::new(bus), client, ThreadSleeper, SamplerSettings::from(&config));
    sampler.run(&stop);

    ExitCode::SUCCESS
}
