use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::addresses::AddressConfig;
use crate::error::{Error, Result};
use crate::modbus::RegisterType;
use crate::power_limit::PowerLimit;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub address: SocketAddr,
    #[serde(default = "default_slave")]
    pub slave: u8,
    #[serde(default)]
    pub register_type: RegisterType,
    /// Maximum number of registers per read request
    #[serde(default = "default_max_read")]
    pub max_read: u16,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Everything needed to run remote control for one inverter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InverterConfig {
    pub connection: ConnectionConfig,
    #[serde(default = "default_poll_rate_secs")]
    pub poll_rate_secs: u64,
    pub addresses: AddressConfig,
    #[serde(default)]
    pub charge_power_limit: Option<PowerLimit>,
    #[serde(default)]
    pub discharge_power_limit: Option<PowerLimit>,
}

fn default_slave() -> u8 {
    247
}

fn default_max_read() -> u16 {
    50
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_poll_rate_secs() -> u64 {
    10
}

impl InverterConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn poll_rate(&self) -> Duration {
        Duration::from_secs(self.poll_rate_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_rate_secs == 0 {
            return Err(Error::Config("poll_rate_secs must be at least 1".into()));
        }
        // The inverter's watchdog is twice the poll rate
        if self.poll_rate_secs.saturating_mul(2) > u64::from(u16::MAX) {
            return Err(Error::Config(format!(
                "poll_rate_secs {} is too large",
                self.poll_rate_secs
            )));
        }
        if self.connection.max_read == 0 {
            return Err(Error::Config("max_read must be at least 1".into()));
        }
        if self.connection.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be at least 1".into()));
        }
        Ok(())
    }
}
