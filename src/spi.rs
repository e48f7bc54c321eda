use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use std::f64::consts::PI;
use thiserror::Error;
use tracing::debug;

pub const TRANSFER_SIZE: usize = 3;
pub const DEFAULT_CLOCK_HZ: u32 = 1_000_000;

#[derive(Debug, Error)]
pub enum BusFault {
    #[error("SPI transfer incomplete: moved {moved} of 3 bytes")]
    ShortTransfer { moved: usize },

    #[error("SPI transfer failed: {0}")]
    Spi(#[from] rppal::spi::Error),
}

#[derive(Debug, Error)]
pub enum OpenError {
    #[error("unsupported SPI device path '{0}' (expected /dev/spidevB.S)")]
    InvalidDevicePath(String),

    #[error("failed to open SPI device '{path}': {source}")]
    Spi {
        path: String,
        #[source]
        source: rppal::spi::Error,
    },
}

/// One full-duplex exchange of a fixed-size frame.
///
/// Every byte written is clocked out while the reply byte is clocked in, so
/// the response is only meaningful as a whole.
pub trait SpiTransfer {
    fn transfer(&mut self, request: &[u8; TRANSFER_SIZE]) -> Result<[u8; TRANSFER_SIZE], BusFault>;
}

impl<T: SpiTransfer + ?Sized> SpiTransfer for Box<T> {
    fn transfer(&mut self, request: &[u8; TRANSFER_SIZE]) -> Result<[u8; TRANSFER_SIZE], BusFault> {
        (**self).transfer(request)
    }
}

pub struct SpiBus {
    spi: Spi,
    path: String,
}

impl SpiBus {
    pub fn open(path: &str, clock_hz: u32) -> Result<Self, OpenError> {
        let (bus, slave) = parse_device_path(path)?;
        let spi = Spi::new(bus, slave, clock_hz, Mode::Mode0).map_err(|source| OpenError::Spi {
            path: path.to_string(),
            source,
        })?;
        debug!(path, clock_hz, "SPI bus opened");
        Ok(SpiBus { spi, path: path.to_string() })
    }
}

impl SpiTransfer for SpiBus {
    fn transfer(&mut self, request: &[u8; TRANSFER_SIZE]) -> Result<[u8; TRANSFER_SIZE], BusFault> {
        let mut response = [0u8; TRANSFER_SIZE];
        let moved = self.spi.transfer(&mut response, request)?;
        if moved != TRANSFER_SIZE {
            return Err(BusFault::ShortTransfer { moved });
        }
        Ok(response)
    }
}

impl Drop for SpiBus {
    fn drop(&mut self) {
        debug!(path = %self.path, "SPI bus released");
    }
}

fn parse_device_path(path: &str) -> Result<(Bus, SlaveSelect), OpenError> {
    let invalid = || OpenError::InvalidDevicePath(path.to_string());

    let (bus, slave) = path
        .strip_prefix("/dev/spidev")
        .and_then(|rest| rest.split_once('.'))
        .ok_or_else(invalid)?;

    let bus = match bus {
        "0" => Bus::Spi0,
        "1" => Bus::Spi1,
        "2" => Bus::Spi2,
        "3" => Bus::Spi3,
        "4" => Bus::Spi4,
        "5" => Bus::Spi5,
        "6" => Bus::Spi6,
        _ => return Err(invalid()),
    };
    let slave = match slave {
        "0" => SlaveSelect::Ss0,
        "1" => SlaveSelect::Ss1,
        "2" => SlaveSelect::Ss2,
        _ => return Err(invalid()),
    };
    Ok((bus, slave))
}

const BREATH_CENTER: f64 = 512.0;
const BREATH_AMPLITUDE: f64 = 300.0;
const BREATH_HALF_CYCLE: u32 = 8;
const BREATH_NOISE: i32 = 10;

/// Stand-in converter producing a slow breathing waveform with a few counts
/// of jitter.
///
/// Replies are framed exactly like the MCP3008 so the regular decoder is
/// exercised when running without hardware.
pub struct SimulatedBus {
    index: u32,
    rng: ChaCha8Rng,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::with_rng(ChaCha8Rng::from_entropy())
    }

    /// Same waveform and noise sequence for the same seed.
    #[cfg(test)]
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(ChaCha8Rng::seed_from_u64(seed))
    }

    fn with_rng(rng: ChaCha8Rng) -> Self {
        SimulatedBus { index: 0, rng }
    }

    fn next_value(&mut self) -> u16 {
        let step = self.index % (BREATH_HALF_CYCLE * 2);
        self.index = self.index.wrapping_add(1);

        let phase = step as f64 / BREATH_HALF_CYCLE as f64;
        let noise = self.rng.gen_range(-BREATH_NOISE..BREATH_NOISE) as f64;
        let value = BREATH_CENTER + BREATH_AMPLITUDE * (phase * PI).sin() + noise;
        value.clamp(0.0, 1023.0) as u16
    }
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SpiTransfer for SimulatedBus {
    fn transfer(&mut self, _request: &[u8; TRANSFER_SIZE]) -> Result<[u8; TRANSFER_SIZE], BusFault> {
        let value = self.next_value();
        Ok([0x00, (value >> 8) as u8 & 0x03, (value & 0xFF) as u8])
    }
}
