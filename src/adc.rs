use thiserror::Error;

use crate::spi::{BusFault, SpiTransfer, TRANSFER_SIZE};

pub const MAX_CHANNEL: u8 = 7;
pub const MAX_VALUE: u16 = 1023;

const START_BIT: u8 = 0x01;
const SINGLE_ENDED: u8 = 0x80;
const RESULT_MASK: u16 = 0x03FF;

#[derive(Debug, Error)]
pub enum AdcError {
    #[error("invalid channel {0} (must be 0-7)")]
    InvalidChannel(u8),

    #[error(transparent)]
    Bus(#[from] BusFault),
}

/// Source of raw 10-bit samples.
pub trait ChannelReader {
    fn read_channel(&mut self, channel: u8) -> Result<u16, AdcError>;
}

/// MCP3008 8-channel 10-bit converter.
pub struct Mcp3008<B> {
    bus: B,
}

impl<B: SpiTransfer> Mcp3008<B> {
    pub fn new(bus: B) -> Self {
        Mcp3008 { bus }
    }
}

impl<B: SpiTransfer> ChannelReader for Mcp3008<B> {
    /// Single-ended read of `channel`. No retry: a failed exchange is
    /// reported once and the next call starts from scratch.
    fn read_channel(&mut self, channel: u8) -> Result<u16, AdcError> {
        let request = encode_request(channel)?;
        let response = self.bus.transfer(&request)?;
        Ok(decode_response(&response))
    }
}

pub fn encode_request(channel: u8) -> Result<[u8; TRANSFER_SIZE], AdcError> {
    if channel > MAX_CHANNEL {
        return Err(AdcError::InvalidChannel(channel));
    }

    Ok([START_BIT, SINGLE_ENDED | (channel << 4), 0x00])
}

// First byte is the leading null bit, bits 9-8 sit in the low bits of the
// second byte, bits 7-0 fill the third.
pub fn decode_response(response: &[u8; TRANSFER_SIZE]) -> u16 {
    let value = (((response[1] & 0x03) as u16) << 8) | (response[2] as u16);
    value & RESULT_MASK
}
