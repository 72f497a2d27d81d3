use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context as _, anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tokio_modbus::Slave;
use tokio_modbus::client::{Client, Context, Reader, Writer, tcp};
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::gateway::{PollOutcome, PolledGateway, RegisterGateway, decode_register};

/// Which modbus register bank the tracked addresses are polled from.
/// Writes always go to holding registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterType {
    #[default]
    Input,
    Holding,
}

/// Register gateway for an inverter reachable over modbus TCP.
pub struct ModbusGateway {
    socket_addr: SocketAddr,
    slave: Slave,
    register_type: RegisterType,
    max_read: u16,
    request_timeout: Duration,

    ctx: Option<Context>,
    tracked: BTreeSet<u16>,
    values: HashMap<u16, u16>,
}

impl ModbusGateway {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            socket_addr: config.address,
            slave: Slave(config.slave),
            register_type: config.register_type,
            max_read: config.max_read,
            request_timeout: Duration::from_secs(config.timeout_secs),
            ctx: None,
            tracked: BTreeSet::new(),
            values: HashMap::new(),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.socket_addr
    }

    async fn connect(&mut self) -> anyhow::Result<()> {
        debug!("Connecting to {} (slave {:?})", self.socket_addr, self.slave);
        let ctx = timeout(
            self.request_timeout,
            tcp::connect_slave(self.socket_addr, self.slave),
        )
        .await
        .context("Connection timeout")?
        .with_context(|| format!("Failed to connect to {}", self.socket_addr))?;
        info!("Connected to {}", self.socket_addr);
        self.ctx = Some(ctx);
        Ok(())
    }

    /// Forget the connection and everything read over it.
    async fn disconnect(&mut self) {
        if let Some(mut ctx) = self.ctx.take() {
            let _ = ctx.disconnect().await;
        }
        self.values.clear();
    }

    async fn read_range(&mut self, start: u16, count: u16) -> Result<Vec<u16>, ReadError> {
        let register_type = self.register_type;
        let Some(ctx) = self.ctx.as_mut() else {
            return Err(ReadError::Transport(anyhow!("not connected")));
        };

        let request = async move {
            match register_type {
                RegisterType::Input => ctx.read_input_registers(start, count).await,
                RegisterType::Holding => ctx.read_holding_registers(start, count).await,
            }
        };
        match timeout(self.request_timeout, request).await {
            Ok(Ok(Ok(values))) if values.len() == count as usize => Ok(values),
            Ok(Ok(Ok(values))) => Err(ReadError::Transport(anyhow!(
                "expected {count} registers at {start}, got {}",
                values.len()
            ))),
            Ok(Ok(Err(exception))) => Err(ReadError::Exception(anyhow!(
                "Error reading {count} registers at {start}: {exception:?}"
            ))),
            Ok(Err(e)) => Err(ReadError::Transport(anyhow!(
                "Error reading {count} registers at {start}: {e:?}"
            ))),
            Err(_) => Err(ReadError::Transport(anyhow!(
                "Timeout reading {count} registers at {start}"
            ))),
        }
    }
}

enum ReadError {
    /// The device answered, but refused the request
    Exception(anyhow::Error),
    /// The connection is unusable
    Transport(anyhow::Error),
}

/// Group addresses into contiguous `(start, count)` runs of at most `max_read` registers.
pub fn read_ranges(addresses: &BTreeSet<u16>, max_read: u16) -> Vec<(u16, u16)> {
    let mut ranges: Vec<(u16, u16)> = Vec::new();
    for &address in addresses {
        match ranges.last_mut() {
            Some((start, count))
                if u32::from(*start) + u32::from(*count) == u32::from(address)
                    && *count < max_read =>
            {
                *count += 1
            }
            _ => ranges.push((address, 1)),
        }
    }
    ranges
}

#[async_trait]
impl RegisterGateway for ModbusGateway {
    fn read(&self, address: u16, signed: bool) -> Option<i32> {
        self.values
            .get(&address)
            .map(|raw| decode_register(*raw, signed))
    }

    async fn write_register(&mut self, address: u16, value: u16) -> anyhow::Result<()> {
        let socket_addr = self.socket_addr;
        let Some(ctx) = self.ctx.as_mut() else {
            bail!("Not connected to {socket_addr}, can't write {value} to {address}");
        };

        let result = timeout(self.request_timeout, ctx.write_single_register(address, value)).await;
        match result {
            Ok(Ok(Ok(()))) => {
                debug!("Wrote {value} to register {address}");
                Ok(())
            }
            Ok(Ok(Err(exception))) => {
                bail!("{socket_addr} rejected write of {value} to {address}: {exception:?}")
            }
            Ok(Err(e)) => {
                self.disconnect().await;
                bail!("Error writing {value} to {address} on {socket_addr}: {e:?}")
            }
            Err(_) => {
                self.disconnect().await;
                bail!("Timeout writing {value} to {address} on {socket_addr}")
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }

    fn track(&mut self, addresses: &[u16]) {
        self.tracked.extend(addresses.iter().copied());
    }
}

#[async_trait]
impl PolledGateway for ModbusGateway {
    async fn poll(&mut self) -> anyhow::Result<PollOutcome> {
        let became_connected = if self.ctx.is_none() {
            if let Err(e) = self.connect().await {
                warn!("{e:#}");
                return Ok(PollOutcome::Disconnected);
            }
            true
        } else {
            false
        };

        for (start, count) in read_ranges(&self.tracked, self.max_read) {
            match self.read_range(start, count).await {
                Ok(values) => {
                    for (offset, value) in values.into_iter().enumerate() {
                        self.values.insert(start.wrapping_add(offset as u16), value);
                    }
                }
                Err(ReadError::Exception(e)) => {
                    // The connection is fine, but these registers are now unknown
                    warn!("{e:#}");
                    for offset in 0..count {
                        self.values.remove(&start.wrapping_add(offset));
                    }
                }
                Err(ReadError::Transport(e)) => {
                    warn!("Lost connection to {}: {e:#}", self.socket_addr);
                    self.disconnect().await;
                    return Ok(PollOutcome::Disconnected);
                }
            }
        }

        Ok(if became_connected {
            PollOutcome::BecameConnected
        } else {
            PollOutcome::Polled
        })
    }
}
