use serde::{Deserialize, Serialize};

use crate::gateway::RegisterGateway;

/// A user-facing power setting (charge or discharge power), limited to what
/// the inverter reports it can do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerLimit {
    /// Register holding the maximum. If unset, `fallback_max` is used.
    #[serde(default)]
    pub max_value_address: Option<u16>,
    pub fallback_max: f64,
    /// Native value per register unit
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub signed: bool,
}

fn default_scale() -> f64 {
    1.0
}

impl PowerLimit {
    pub fn with_fallback(fallback_max: f64) -> Self {
        Self {
            max_value_address: None,
            fallback_max,
            scale: 1.0,
            signed: false,
        }
    }

    /// Largest value the user may set, or `None` if the register hasn't been read yet.
    pub fn max_value<G: RegisterGateway + ?Sized>(&self, gateway: &G) -> Option<f64> {
        match self.max_value_address {
            Some(address) => gateway
                .read(address, self.signed)
                .map(|raw| raw as f64 * self.scale),
            None => Some(self.fallback_max),
        }
    }

    /// Clamp `requested` into `[0, max]` and convert it to register units.
    pub fn clamp<G: RegisterGateway + ?Sized>(&self, gateway: &G, requested: f64) -> i32 {
        // Before the first read, don't limit the user
        let max = self.max_value(gateway).unwrap_or(f64::INFINITY);
        let value = requested.min(max).max(0.0);
        (value / self.scale) as i32
    }

    pub fn addresses(&self) -> Vec<u16> {
        self.max_value_address.into_iter().collect()
    }
}
