use std::time::Duration;

use tracing::{debug, info, warn};

use crate::addresses::AddressConfig;
use crate::charge;
use crate::error::{Error, Result};
use crate::gateway::{RegisterGateway, encode_register};
use crate::mode::{RemoteControlMode, RemoteControlState, WorkMode};

/// If every PV string is below this voltage, there's no sun
const PV_VOLTAGE_THRESHOLD: i32 = 20;

/// Drives the remote control registers of one inverter.
///
/// The host calls [`on_poll_complete`](Self::on_poll_complete) after every poll
/// cycle and [`on_became_connected`](Self::on_became_connected) after a
/// (re)connection. Each call re-evaluates the current mode and issues whatever
/// writes it needs, in order. Calls must not overlap.
pub struct RemoteControlManager<G> {
    gateway: G,
    addresses: AddressConfig,
    poll_rate: Duration,

    mode: RemoteControlMode,
    previous_mode: RemoteControlMode,
    remote_control: RemoteControlState,
    /// Import power the charge controller last settled on. Positive imports.
    current_import_power: i32,
    charge_power: Option<i32>,
    discharge_power: Option<i32>,
}

impl<G: RegisterGateway> RemoteControlManager<G> {
    pub fn new(mut gateway: G, addresses: AddressConfig, poll_rate: Duration) -> Self {
        gateway.track(&addresses.tracked_addresses());

        Self {
            gateway,
            addresses,
            poll_rate,
            mode: RemoteControlMode::Disable,
            previous_mode: RemoteControlMode::Disable,
            remote_control: RemoteControlState::Unknown,
            current_import_power: 0,
            charge_power: None,
            discharge_power: None,
        }
    }

    pub fn mode(&self) -> RemoteControlMode {
        self.mode
    }

    pub fn previous_mode(&self) -> RemoteControlMode {
        self.previous_mode
    }

    pub fn remote_control_state(&self) -> RemoteControlState {
        self.remote_control
    }

    pub fn current_import_power(&self) -> i32 {
        self.current_import_power
    }

    pub fn charge_power(&self) -> Option<i32> {
        self.charge_power
    }

    /// Maximum import power in W while force charging. `None` uses the inverter capacity.
    pub fn set_charge_power(&mut self, watts: Option<i32>) {
        self.charge_power = watts;
    }

    pub fn discharge_power(&self) -> Option<i32> {
        self.discharge_power
    }

    /// Export power in W while force discharging. `None` uses the inverter capacity.
    pub fn set_discharge_power(&mut self, watts: Option<i32>) {
        self.discharge_power = watts;
    }

    pub fn poll_rate(&self) -> Duration {
        self.poll_rate
    }

    pub fn addresses(&self) -> &AddressConfig {
        &self.addresses
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    pub async fn set_mode(&mut self, mode: RemoteControlMode) -> Result<()> {
        if self.mode != mode {
            info!("Remote control: mode {} -> {}", self.mode, mode);
            self.mode = mode;
            self.update().await?;
        }
        Ok(())
    }

    pub async fn on_poll_complete(&mut self) -> Result<()> {
        self.update().await
    }

    pub async fn on_became_connected(&mut self) -> Result<()> {
        // The inverter may have changed (or reset) the registers while we were away
        self.remote_control = RemoteControlState::Unknown;
        self.update().await
    }

    async fn update(&mut self) -> Result<()> {
        if !self.gateway.is_connected() {
            // Coming back always counts as entering the mode afresh
            self.previous_mode = RemoteControlMode::Disable;
            return Ok(());
        }

        match self.mode {
            RemoteControlMode::Disable => self.update_disable().await?,
            RemoteControlMode::ForceCharge => self.update_charge().await?,
            RemoteControlMode::ForceDischarge => self.update_discharge().await?,
        }

        self.previous_mode = self.mode;
        Ok(())
    }

    async fn update_disable(&mut self) -> Result<()> {
        self.disable_remote_control(None).await
    }

    async fn update_charge(&mut self) -> Result<()> {
        // The inverter doesn't respect Max SoC while under remote control
        let soc = self.read(self.addresses.battery_soc, false);
        let max_soc = self.read(self.addresses.max_soc, false);
        if let (Some(soc), Some(max_soc)) = (soc, max_soc)
            && soc >= max_soc
        {
            debug!("Force charge: soc {soc}% >= max soc {max_soc}%, using Back-up");
            // Back-up stops the inverter from discharging the battery
            return self.disable_remote_control(Some(WorkMode::BackUp)).await;
        }

        let Some(max_import_power) = self.power_cap(self.charge_power) else {
            warn!(
                "Remote control: max charge power has not been set and inverter capacity not \
                 available, so not charging"
            );
            return self.disable_remote_control(None).await;
        };

        let pv_power_sum = self.sum(&self.addresses.pv_powers);
        let pv_power_limit = self.read(self.addresses.pv_power_limit, true);
        let (pv_power_sum, pv_power_limit) =
            match (self.has_any_pv_voltage(), pv_power_sum, pv_power_limit) {
                (true, Some(sum), Some(limit)) => (sum, limit),
                _ => {
                    // Without sun, controlling would just limit import to the PV limit
                    debug!("Remote control: no sun (or PV unavailable), defaulting to {max_import_power}W");
                    self.enable_remote_control(WorkMode::BackUp).await?;
                    return self.write_active_power(-max_import_power).await;
                }
            };

        let import_power = if self.previous_mode != RemoteControlMode::ForceCharge {
            // Start at full power and let things settle
            max_import_power
        } else {
            let step = charge::step(
                self.current_import_power,
                max_import_power,
                pv_power_sum,
                pv_power_limit,
            );
            debug!(
                "Remote control: PV: {pv_power_sum}W, limit: {pv_power_limit}W, error: {}W, import {}W -> {}W",
                step.error, self.current_import_power, step.import_power
            );
            step.import_power
        };

        self.enable_remote_control(WorkMode::BackUp).await?;
        self.write_active_power(-import_power).await?;
        self.current_import_power = import_power;
        Ok(())
    }

    async fn update_discharge(&mut self) -> Result<()> {
        let Some(export_power) = self.power_cap(self.discharge_power) else {
            warn!(
                "Remote control: max discharge power has not been set and inverter capacity not \
                 available, so not discharging"
            );
            return self.disable_remote_control(None).await;
        };

        // Keep feeding in if we lose the connection
        self.enable_remote_control(WorkMode::FeedInFirst).await?;
        self.write_active_power(export_power).await
    }

    async fn enable_remote_control(&mut self, fallback_work_mode: WorkMode) -> Result<()> {
        if self.remote_control == RemoteControlState::Enabled {
            return Ok(());
        }

        let result = self.write_enable_sequence(fallback_work_mode).await;
        self.remote_control = match result {
            Ok(()) => {
                info!("Remote control enabled, fallback work mode {fallback_work_mode:?}");
                RemoteControlState::Enabled
            }
            Err(_) => RemoteControlState::Unknown,
        };
        result
    }

    async fn write_enable_sequence(&mut self, fallback_work_mode: WorkMode) -> Result<()> {
        let timeout = self.watchdog_timeout()?;

        // Work mode and timeout must be in place before remote control takes over
        self.write_work_mode(fallback_work_mode).await?;
        self.write(self.addresses.timeout_set, timeout).await?;
        self.write(self.addresses.remote_enable, 1).await
    }

    async fn disable_remote_control(&mut self, work_mode: Option<WorkMode>) -> Result<()> {
        if self.remote_control != RemoteControlState::Disabled {
            if let Err(e) = self.write(self.addresses.remote_enable, 0).await {
                self.remote_control = RemoteControlState::Unknown;
                return Err(e);
            }
            info!("Remote control disabled");
            self.remote_control = RemoteControlState::Disabled;
        }

        match work_mode {
            Some(work_mode) => self.write_work_mode(work_mode).await,
            None => Ok(()),
        }
    }

    /// Not every model exposes the work mode register.
    async fn write_work_mode(&mut self, work_mode: WorkMode) -> Result<()> {
        let Some(address) = self.addresses.work_mode else {
            return Ok(());
        };
        let current = self.gateway.read(address, false);
        if current == Some(work_mode.register_value() as i32) {
            return Ok(());
        }

        match current
            .and_then(|value| u16::try_from(value).ok())
            .map(WorkMode::try_from)
        {
            Some(Ok(current)) => info!("Work mode {current:?} -> {work_mode:?}"),
            Some(Err(e)) => info!("Work mode ({e}) -> {work_mode:?}"),
            None => info!("Work mode unknown -> {work_mode:?}"),
        }
        self.write(address, work_mode.register_value()).await
    }

    async fn write_active_power(&mut self, watts: i32) -> Result<()> {
        let address = self.addresses.active_power;
        let value = encode_register(address, watts, true)?;
        self.write(address, value).await
    }

    async fn write(&mut self, address: u16, value: u16) -> Result<()> {
        self.gateway
            .write_register(address, value)
            .await
            .map_err(|source| Error::Write {
                address,
                value,
                source,
            })
    }

    /// The inverter drops out of remote control if it hears nothing for this many seconds.
    /// Zero would switch the watchdog off.
    fn watchdog_timeout(&self) -> Result<u16> {
        let seconds = self.poll_rate.as_secs().saturating_mul(2);
        match u16::try_from(seconds) {
            Ok(seconds) if seconds > 0 => Ok(seconds),
            _ => Err(Error::ValueOutOfRange {
                address: self.addresses.timeout_set,
                value: i64::try_from(seconds).unwrap_or(i64::MAX),
            }),
        }
    }

    fn read(&self, address: Option<u16>, signed: bool) -> Option<i32> {
        address.and_then(|address| self.gateway.read(address, signed))
    }

    fn sum(&self, addresses: &[u16]) -> Option<i32> {
        addresses
            .iter()
            .map(|address| self.gateway.read(*address, true))
            .sum()
    }

    fn has_any_pv_voltage(&self) -> bool {
        // Units are 0.1V
        self.addresses
            .pv_voltages
            .iter()
            .filter_map(|address| self.gateway.read(*address, true))
            .any(|voltage| voltage > PV_VOLTAGE_THRESHOLD * 10)
    }

    fn inverter_capacity(&self) -> Option<i32> {
        match self.read(self.addresses.ac_power_limit_down, true) {
            Some(limit) if limit < 0 => Some(-limit),
            _ => None,
        }
    }

    /// The user's power setting, capped to what the inverter can do.
    fn power_cap(&self, requested: Option<i32>) -> Option<i32> {
        // A negative cap would reverse the direction of the power flow
        let requested = requested.map(|watts| watts.max(0));
        let capacity = self.inverter_capacity();
        match (requested, capacity) {
            (None, capacity) => capacity,
            (Some(requested), Some(capacity)) if requested > capacity => Some(capacity),
            (Some(requested), _) => Some(requested),
        }
    }
}
