//! Charge-max / discharge-min voltage limits
//!
//! Taken from the BMS channels as reported; no curve scales them. Only the
//! force clamp and the relax ramp apply.

use crate::slew::{RelaxDirection, SlewRateLimiter};

use super::Telemetry;

#[derive(Debug, Clone)]
pub struct VoltageLimitHandler {
    charge: SlewRateLimiter,
    discharge: SlewRateLimiter,
}

fn limit(limiter: &mut SlewRateLimiter, target: Option<f64>, dt: f64) -> Option<f64> {
    match target.filter(|v| v.is_finite()) {
        Some(v) => {
            // First known value applies as is
            if limiter.last().is_none() {
                limiter.reanchor(v);
            }
            Some(limiter.apply(v, dt))
        },
        None => {
            limiter.reset();
            None
        },
    }
}

impl VoltageLimitHandler {
    pub fn new(rate: Option<f64>) -> Self {
        Self {
            charge: SlewRateLimiter::new(rate),
            discharge: SlewRateLimiter::new(rate).with_direction(RelaxDirection::Downward),
        }
    }

    /// Returns (charge-max-voltage, discharge-min-voltage)
    ///
    /// Force discharge pins charge-max-voltage at the pack voltage; force
    /// charge pins discharge-min-voltage at the pack voltage.
    pub fn evaluate(
        &mut self,
        t: &Telemetry,
        force_charge_active: bool,
        force_discharge_active: bool,
        dt: f64,
    ) -> (Option<f64>, Option<f64>) {
        let mut charge_target = t.charge_max_voltage;
        let mut discharge_target = t.discharge_min_voltage;
        if let Some(pack) = t.pack_voltage {
            if force_discharge_active {
                charge_target = charge_target.map(|v| v.min(pack));
            }
            if force_charge_active {
                discharge_target = discharge_target.map(|v| v.max(pack));
            }
        }
        (
            limit(&mut self.charge, charge_target, dt),
            limit(&mut self.discharge, discharge_target, dt),
        )
    }

    pub fn reset(&mut self) {
        self.charge.reset();
        self.discharge.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telemetry() -> Telemetry {
        Telemetry {
            pack_voltage: Some(700.0),
            charge_max_voltage: Some(840.0),
            discharge_min_voltage: Some(680.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_pass_through_without_force() {
        let mut h = VoltageLimitHandler::new(Some(2.0));
        assert_eq!(h.evaluate(&telemetry(), false, false, 1.0), (Some(840.0), Some(680.0)));
    }

    #[test]
    fn test_derating_measurements_leave_voltages_alone() {
        let mut h = VoltageLimitHandler::new(None);
        let t = Telemetry {
            max_cell_voltage: Some(3620.0),
            min_cell_voltage: Some(2950.0),
            max_cell_temperature: Some(52.0),
            soc: Some(99.5),
            ..telemetry()
        };
        assert_eq!(h.evaluate(&t, false, false, 1.0), (Some(840.0), Some(680.0)));
    }

    #[test]
    fn test_force_clamps_and_ramps_back() {
        let mut h = VoltageLimitHandler::new(Some(50.0));
        h.evaluate(&telemetry(), false, false, 1.0);

        let (charge, _) = h.evaluate(&telemetry(), false, true, 1.0);
        assert_eq!(charge, Some(700.0));
        let (charge, _) = h.evaluate(&telemetry(), false, false, 1.0);
        assert_eq!(charge, Some(750.0));

        let (_, discharge) = h.evaluate(&telemetry(), true, false, 1.0);
        assert_eq!(discharge, Some(700.0));
        let (_, discharge) = h.evaluate(&telemetry(), false, false, 1.0);
        assert_eq!(discharge, Some(680.0));
    }

    #[test]
    fn test_unknown_limits() {
        let mut h = VoltageLimitHandler::new(None);
        let t = Telemetry::default();
        assert_eq!(h.evaluate(&t, true, true, 1.0), (None, None));
    }
}
