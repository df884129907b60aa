//! Combines current handlers, force windows and voltage limits

use tracing::{debug, info, warn};

use crate::config::ProtectionConfig;
use crate::error::Result;
use crate::force::ForceWindow;

use super::current::{CurrentLimitHandler, ForceEffect};
use super::voltage::VoltageLimitHandler;
use super::{Direction, Limits, Telemetry};

#[derive(Debug, Clone)]
pub struct ProtectionEngine {
    charge: CurrentLimitHandler,
    discharge: CurrentLimitHandler,
    voltage: VoltageLimitHandler,
    /// Below on min cell voltage; blocks discharge
    force_charge: Option<ForceWindow>,
    /// Above on max cell voltage; blocks charge
    force_discharge: Option<ForceWindow>,
    force_charge_active: bool,
    force_discharge_active: bool,
}

fn effect(was_active: bool, active: bool, window: Option<&ForceWindow>) -> ForceEffect {
    match (was_active, active) {
        (_, true) => ForceEffect::Blocked,
        (true, false) => ForceEffect::Released {
            resume_reference: window.map_or(0.0, |w| w.params().resume_reference),
        },
        (false, false) => ForceEffect::None,
    }
}

impl ProtectionEngine {
    pub fn new(config: &ProtectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            charge: CurrentLimitHandler::new(Direction::Charge, &config.charge),
            discharge: CurrentLimitHandler::new(Direction::Discharge, &config.discharge),
            voltage: VoltageLimitHandler::new(config.max_voltage_change_per_second),
            force_charge: config.force_charge_window()?,
            force_discharge: config.force_discharge_window()?,
            force_charge_active: false,
            force_discharge_active: false,
        })
    }

    pub fn force_charge_active(&self) -> bool {
        self.force_charge_active
    }

    pub fn force_discharge_active(&self) -> bool {
        self.force_discharge_active
    }

    /// Compute this cycle's limits; never fails
    pub fn evaluate(&mut self, t: &Telemetry, dt: f64) -> Limits {
        let fc_was = self.force_charge_active;
        let fd_was = self.force_discharge_active;
        let fc = self
            .force_charge
            .as_ref()
            .is_some_and(|w| w.next_active(fc_was, t.min_cell_voltage));
        let fd = self
            .force_discharge
            .as_ref()
            .is_some_and(|w| w.next_active(fd_was, t.max_cell_voltage));

        match (fc_was, fc) {
            (false, true) => warn!(min_cell_voltage = ?t.min_cell_voltage, "Force charge activated"),
            (true, false) => info!(min_cell_voltage = ?t.min_cell_voltage, "Force charge released"),
            _ => {},
        }
        match (fd_was, fd) {
            (false, true) => warn!(max_cell_voltage = ?t.max_cell_voltage, "Force discharge activated"),
            (true, false) => info!(max_cell_voltage = ?t.max_cell_voltage, "Force discharge released"),
            _ => {},
        }
        self.force_charge_active = fc;
        self.force_discharge_active = fd;

        let charge = self
            .charge
            .evaluate(t, effect(fd_was, fd, self.force_discharge.as_ref()), dt);
        let discharge = self
            .discharge
            .evaluate(t, effect(fc_was, fc, self.force_charge.as_ref()), dt);
        let (charge_max_voltage, discharge_min_voltage) = self.voltage.evaluate(t, fc, fd, dt);

        let ready =
            t.is_complete() && charge_max_voltage.is_some() && discharge_min_voltage.is_some();

        debug!(
            charge = charge.result,
            discharge = discharge.result,
            charge_max_voltage = ?charge_max_voltage,
            discharge_min_voltage = ?discharge_min_voltage,
            ready,
            "Protection limits"
        );

        Limits {
            charge_max_current: charge.result,
            discharge_max_current: discharge.result,
            charge_max_voltage,
            discharge_min_voltage,
            force_charge_active: fc,
            force_discharge_active: fd,
            ready,
            charge,
            discharge,
        }
    }

    /// Back to the freshly built state
    pub fn reset(&mut self) {
        self.charge.reset();
        self.discharge.reset();
        self.voltage.reset();
        self.force_charge_active = false;
        self.force_discharge_active = false;
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::force::ForceParams;

    fn telemetry(min_mv: f64, max_mv: f64) -> Telemetry {
        Telemetry {
            min_cell_voltage: Some(min_mv),
            max_cell_voltage: Some(max_mv),
            min_cell_temperature: Some(25.0),
            max_cell_temperature: Some(27.0),
            soc: Some(50.0),
            pack_voltage: Some(700.0),
            bms_charge_limit: Some(80.0),
            bms_discharge_limit: Some(80.0),
            charge_max_voltage: Some(840.0),
            discharge_min_voltage: Some(680.0),
            started: true,
        }
    }

    #[test]
    fn test_defaults_allow_full_current_mid_range() {
        let mut config = ProtectionConfig::default();
        config.charge.max_increase_per_second = None;
        config.discharge.max_increase_per_second = None;
        let mut engine = ProtectionEngine::new(&config).unwrap();
        let limits = engine.evaluate(&telemetry(3300.0, 3320.0), 1.0);
        assert_eq!(limits.charge_max_current, 80.0);
        assert_eq!(limits.discharge_max_current, 80.0);
        assert!(limits.ready);
    }

    #[test]
    fn test_force_charge_blocks_discharge() {
        let mut config = ProtectionConfig::default();
        config.charge.max_increase_per_second = None;
        config.discharge.max_increase_per_second = None;
        config.force_charge = Some(ForceParams {
            enter: 2850.0,
            release: 2910.0,
            resume_reference: 0.0,
        });
        let mut engine = ProtectionEngine::new(&config).unwrap();

        let limits = engine.evaluate(&telemetry(2840.0, 2860.0), 1.0);
        assert!(limits.force_charge_active);
        assert_eq!(limits.discharge_max_current, 0.0);
        assert_eq!(limits.discharge.force, Some(0.0));
        // discharge-min-voltage pinned at pack voltage
        assert_eq!(limits.discharge_min_voltage, Some(700.0));
        assert!(!limits.force_discharge_active);
    }

    #[test]
    fn test_missing_telemetry_is_not_ready() {
        let mut engine = ProtectionEngine::new(&ProtectionConfig::default()).unwrap();
        let limits = engine.evaluate(&Telemetry::default(), 1.0);
        assert!(!limits.ready);
        assert_eq!(limits.charge_max_current, 0.0);
        assert_eq!(limits.discharge_max_current, 0.0);
    }

    #[test]
    fn test_reset_clears_force_state() {
        let mut engine = ProtectionEngine::new(&ProtectionConfig::default()).unwrap();
        engine.evaluate(&telemetry(3300.0, 3670.0), 1.0);
        assert!(engine.force_discharge_active());
        engine.reset();
        assert!(!engine.force_discharge_active());
    }
}
