//! Remote control of FoxESS inverters: force charge and force discharge the
//! battery by driving the inverter's remote control registers.
//!
//! [`RemoteControlManager`] holds the control logic and talks to the inverter
//! through a [`RegisterGateway`]. [`ModbusGateway`] is a gateway over modbus TCP,
//! and [`Driver`] ties the two together on a poll interval.

pub mod addresses;
pub mod charge;
pub mod config;
pub mod driver;
pub mod error;
pub mod gateway;
pub mod manager;
pub mod modbus;
pub mod mode;
pub mod power_limit;

pub use addresses::AddressConfig;
pub use config::{ConnectionConfig, InverterConfig};
pub use driver::{Command, Driver, PowerLimits};
pub use error::{Error, Result};
pub use gateway::{PollOutcome, PolledGateway, RegisterGateway};
pub use manager::RemoteControlManager;
pub use modbus::{ModbusGateway, RegisterType};
pub use mode::{RemoteControlMode, RemoteControlState, WorkMode};
pub use power_limit::PowerLimit;

/// Build a manager and driver for one inverter from its config.
pub fn build_driver(config: &InverterConfig) -> Driver<ModbusGateway> {
    let gateway = ModbusGateway::new(&config.connection);
    let manager = RemoteControlManager::new(gateway, config.addresses.clone(), config.poll_rate());
    let limits = PowerLimits {
        charge: config.charge_power_limit.clone(),
        discharge: config.discharge_power_limit.clone(),
    };
    Driver::new(manager, limits)
}
