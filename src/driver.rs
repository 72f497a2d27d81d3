use std::sync::Arc;

use tokio::sync::{Notify, mpsc};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::gateway::{PollOutcome, PolledGateway};
use crate::manager::RemoteControlManager;
use crate::mode::RemoteControlMode;
use crate::power_limit::PowerLimit;

/// Requests from the outside world (UI, automations, ...)
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetMode(RemoteControlMode),
    /// Watts. `None` falls back to the inverter capacity
    SetChargePower(Option<f64>),
    SetDischargePower(Option<f64>),
}

#[derive(Debug, Clone, Default)]
pub struct PowerLimits {
    pub charge: Option<PowerLimit>,
    pub discharge: Option<PowerLimit>,
}

/// Runs polls and commands for one inverter on a single task, so the manager
/// only ever sees one update at a time.
pub struct Driver<G> {
    manager: RemoteControlManager<G>,
    limits: PowerLimits,
}

impl<G: PolledGateway> Driver<G> {
    pub fn new(mut manager: RemoteControlManager<G>, limits: PowerLimits) -> Self {
        let addresses: Vec<u16> = limits
            .charge
            .iter()
            .chain(limits.discharge.iter())
            .flat_map(PowerLimit::addresses)
            .collect();
        manager.gateway_mut().track(&addresses);

        Self { manager, limits }
    }

    pub fn manager(&self) -> &RemoteControlManager<G> {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut RemoteControlManager<G> {
        &mut self.manager
    }

    /// Poll every `poll_rate` and handle commands until `shutdown` is notified.
    /// Commands already queued are handled before shutting down.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<Command>, shutdown: Arc<Notify>) {
        let mut interval = time::interval(self.manager.poll_rate());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = interval.tick() => self.tick().await,
                Some(command) = commands.recv() => self.handle(command).await,
                _ = shutdown.notified() => {
                    info!("Shutting down remote control");
                    break;
                }
            }
        }
    }

    /// One poll cycle, followed by a remote control update.
    pub async fn tick(&mut self) {
        let result = match self.manager.gateway_mut().poll().await {
            Ok(PollOutcome::BecameConnected) => self.manager.on_became_connected().await,
            Ok(PollOutcome::Polled | PollOutcome::Disconnected) => {
                self.manager.on_poll_complete().await
            }
            Err(e) => {
                warn!("Poll failed: {e:#}");
                self.manager.on_poll_complete().await
            }
        };

        if let Err(e) = result {
            // The next poll tries again
            warn!("Remote control update failed: {:#}", anyhow::Error::from(e));
        }
    }

    pub async fn handle(&mut self, command: Command) {
        debug!("Handling {command:?}");
        match command {
            Command::SetMode(mode) => {
                if let Err(e) = self.manager.set_mode(mode).await {
                    warn!("Failed to set mode {mode}: {:#}", anyhow::Error::from(e));
                }
            }
            Command::SetChargePower(watts) => {
                let watts = self.resolve(self.limits.charge.as_ref(), watts);
                self.manager.set_charge_power(watts);
            }
            Command::SetDischargePower(watts) => {
                let watts = self.resolve(self.limits.discharge.as_ref(), watts);
                self.manager.set_discharge_power(watts);
            }
        }
    }

    fn resolve(&self, limit: Option<&PowerLimit>, watts: Option<f64>) -> Option<i32> {
        let watts = watts?;
        Some(match limit {
            Some(limit) => limit.clamp(self.manager.gateway(), watts),
            None => watts.max(0.0) as i32,
        })
    }
}
