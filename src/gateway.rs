use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

/// Access to the registers of a single inverter.
///
/// Reads are served from whatever the last poll cycle saw; writes go straight
/// to the device.
#[async_trait]
pub trait RegisterGateway: Send {
    /// Last polled value of `address`, or `None` if it isn't known.
    fn read(&self, address: u16, signed: bool) -> Option<i32>;

    /// Write a single holding register.
    async fn write_register(&mut self, address: u16, value: u16) -> anyhow::Result<()>;

    fn is_connected(&self) -> bool;

    /// Ask for `addresses` to be kept fresh by the poll cycle.
    fn track(&mut self, addresses: &[u16]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Polled,
    /// The connection was (re)established during this poll
    BecameConnected,
    Disconnected,
}

/// A gateway which refreshes its own register values when asked to.
#[async_trait]
pub trait PolledGateway: RegisterGateway {
    async fn poll(&mut self) -> anyhow::Result<PollOutcome>;
}

pub fn decode_register(raw: u16, signed: bool) -> i32 {
    if signed {
        BigEndian::read_i16(&raw.to_be_bytes()) as i32
    } else {
        raw as i32
    }
}

/// Encode a value for a single 16 bit register. Signed values are stored as
/// two's complement.
pub fn encode_register(address: u16, value: i32, signed: bool) -> Result<u16> {
    let out_of_range = || Error::ValueOutOfRange {
        address,
        value: value as i64,
    };
    if signed {
        let signed = i16::try_from(value).map_err(|_| out_of_range())?;
        let mut buf = [0u8; 2];
        BigEndian::write_i16(&mut buf, signed);
        Ok(BigEndian::read_u16(&buf))
    } else {
        u16::try_from(value).map_err(|_| out_of_range())
    }
}
