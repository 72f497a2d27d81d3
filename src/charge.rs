//! Proportional controller which keeps force charge from clipping PV.
//!
//! During the day both PV and grid import bring power into the inverter. Import
//! first displaces PV, then the inverter starts limiting the input. We watch the
//! gap between the PV power limit register and the summed PV power: when the
//! limit drops to (or near) the PV power, PV is being clipped and the import
//! power has to come down.

/// Headroom to aim for while importing, in W.
const IMPORT_SETPOINT: i32 = 50;
/// Headroom to aim for while exporting, in W. The inverter needs more margin here.
const EXPORT_SETPOINT: i32 = 150;

const P_CUT_BACK: f64 = 1.2;
const P_RAISE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargeStep {
    pub error: i32,
    pub import_power: i32,
}

/// Compute the next import power from the current one. Positive values import
/// (charge), negative values export.
pub fn step(
    current_import_power: i32,
    max_import_power: i32,
    pv_power_sum: i32,
    pv_power_limit: i32,
) -> ChargeStep {
    let setpoint = if current_import_power > 0 {
        IMPORT_SETPOINT
    } else {
        EXPORT_SETPOINT
    };
    // Positive = not clipping, so there's room to raise the import
    let actual = pv_power_limit - pv_power_sum;
    let error = setpoint - actual;

    // Be quicker to stop clipping than to start importing more
    let p = if error > 0 { P_CUT_BACK } else { P_RAISE };
    let delta = -((error as f64) * p).round() as i32;

    let mut import_power = current_import_power + delta;

    // Exporting more than PV provides would mean draining the battery
    if current_import_power < 0
        && import_power < 0
        && pv_power_limit > 0
        && -import_power > pv_power_limit
    {
        import_power = -pv_power_limit;
    }

    // Never swing straight between import and export: rest at 0 for a cycle
    let crosses_zero = (current_import_power > 0 && import_power < 0)
        || (current_import_power < 0 && import_power > 0);
    if crosses_zero {
        import_power = 0;
    } else {
        import_power = import_power.min(max_import_power).max(-max_import_power);
    }

    ChargeStep {
        error,
        import_power,
    }
}
