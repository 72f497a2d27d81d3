use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Register addresses used for remote control on one inverter model.
///
/// Optional addresses are not available on every model (e.g. H1 over LAN has no
/// max SoC register). A missing address always reads as unavailable, never as 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressConfig {
    pub remote_enable: u16,
    pub timeout_set: u16,
    /// Signed: negative imports (charges), positive exports (discharges)
    pub active_power: u16,

    #[serde(default)]
    pub work_mode: Option<u16>,
    #[serde(default)]
    pub battery_soc: Option<u16>,
    #[serde(default)]
    pub max_soc: Option<u16>,
    #[serde(default)]
    pub inverter_power: Vec<u16>,
    #[serde(default)]
    pub pv_power_limit: Option<u16>,
    #[serde(default)]
    pub ac_power_limit_down: Option<u16>,
    /// Units are 0.1V
    #[serde(default)]
    pub pv_voltages: Vec<u16>,
    #[serde(default)]
    pub pv_powers: Vec<u16>,
}

impl AddressConfig {
    /// Addresses which need to be kept fresh by the poll cycle.
    pub fn tracked_addresses(&self) -> Vec<u16> {
        let singles = [
            self.battery_soc,
            self.work_mode,
            self.max_soc,
            self.pv_power_limit,
            self.ac_power_limit_down,
        ];

        singles
            .into_iter()
            .flatten()
            .chain(self.inverter_power.iter().copied())
            .chain(self.pv_voltages.iter().copied())
            .chain(self.pv_powers.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
