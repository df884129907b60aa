//! Per-direction current limit

use serde::Serialize;

use crate::config::DirectionConfig;
use crate::curve::PolyLine;
use crate::slew::SlewRateLimiter;

use super::{Direction, Telemetry};

/// Sub-limits of one evaluation in [A]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CurrentBreakdown {
    pub max_ever: f64,
    pub bms: Option<f64>,
    pub min_cell_voltage: f64,
    pub max_cell_voltage: f64,
    pub min_cell_temperature: f64,
    pub max_cell_temperature: f64,
    pub soc: f64,
    pub max_increase: Option<f64>,
    /// `Some(0.0)` while a force window blocks this direction
    pub force: Option<f64>,
    pub result: f64,
}

/// Force window influence on one direction for this cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) enum ForceEffect {
    None,
    Blocked,
    /// Window released this cycle; ramp restarts at `resume_reference * max_ever`
    Released { resume_reference: f64 },
}

#[derive(Debug, Clone)]
pub struct CurrentLimitHandler {
    direction: Direction,
    voltage_curve: PolyLine,
    temperature_curve: PolyLine,
    soc_curve: PolyLine,
    initial_max_ever: f64,
    max_ever: f64,
    limiter: SlewRateLimiter,
    min_voltage_hold: Option<f64>,
    max_voltage_hold: Option<f64>,
}

/// Voltage-curve limit that may only decrease while the curve derates
fn held_voltage_limit(
    curve: &PolyLine,
    hold: &mut Option<f64>,
    cell_voltage: Option<f64>,
    max_ever: f64,
) -> f64 {
    if cell_voltage.is_none() {
        return 0.0;
    }
    let fraction = curve.value(cell_voltage);
    let amps = fraction * max_ever;
    if fraction >= 1.0 {
        *hold = None;
        return amps;
    }
    let held = hold.map_or(amps, |h| h.min(amps));
    *hold = Some(held);
    held
}

impl CurrentLimitHandler {
    pub fn new(direction: Direction, config: &DirectionConfig) -> Self {
        Self {
            direction,
            voltage_curve: config.voltage_curve.clone(),
            temperature_curve: config.temperature_curve.clone(),
            soc_curve: config.soc_curve.clone(),
            initial_max_ever: config.initial_max_ever_current,
            max_ever: config.initial_max_ever_current,
            limiter: SlewRateLimiter::new(config.max_increase_per_second),
            min_voltage_hold: None,
            max_voltage_hold: None,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Highest current seen so far (configured or BMS-reported)
    pub fn max_ever(&self) -> f64 {
        self.max_ever
    }

    pub(super) fn evaluate(&mut self, t: &Telemetry, effect: ForceEffect, dt: f64) -> CurrentBreakdown {
        let bms = t.bms_limit(self.direction).filter(|v| v.is_finite());
        if let Some(b) = bms {
            self.max_ever = self.max_ever.max(b);
        }
        let max_ever = self.max_ever;

        let min_cell_voltage = held_voltage_limit(
            &self.voltage_curve,
            &mut self.min_voltage_hold,
            t.min_cell_voltage,
            max_ever,
        );
        let max_cell_voltage = held_voltage_limit(
            &self.voltage_curve,
            &mut self.max_voltage_hold,
            t.max_cell_voltage,
            max_ever,
        );
        let min_cell_temperature = self.temperature_curve.value(t.min_cell_temperature) * max_ever;
        let max_cell_temperature = self.temperature_curve.value(t.max_cell_temperature) * max_ever;
        let soc = self.soc_curve.value(t.soc) * max_ever;

        let mut smooth = [
            min_cell_voltage,
            max_cell_voltage,
            min_cell_temperature,
            max_cell_temperature,
            soc,
        ]
        .into_iter()
        .fold(max_ever, f64::min);
        if let Some(b) = bms {
            smooth = smooth.min(b);
        }

        let (target, force) = match effect {
            ForceEffect::Blocked => (0.0, Some(0.0)),
            ForceEffect::Released { resume_reference } => {
                self.limiter.reanchor(resume_reference * max_ever);
                (smooth, None)
            },
            ForceEffect::None => (smooth, None),
        };

        let max_increase = self.limiter.bound(dt);
        let mut result = self.limiter.apply(target, dt);

        // Not started, or no live limit from the BMS outside force mode
        if !t.started || (bms.is_none() && force.is_none()) {
            result = 0.0;
            self.limiter.reanchor(0.0);
        }

        CurrentBreakdown {
            max_ever,
            bms,
            min_cell_voltage,
            max_cell_voltage,
            min_cell_temperature,
            max_cell_temperature,
            soc,
            max_increase,
            force,
            result,
        }
    }

    pub fn reset(&mut self) {
        self.max_ever = self.initial_max_ever;
        self.limiter.reset();
        self.min_voltage_hold = None;
        self.max_voltage_hold = None;
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn handler(rate: Option<f64>) -> CurrentLimitHandler {
        let config = DirectionConfig {
            initial_max_ever_current: 80.0,
            max_increase_per_second: rate,
            voltage_curve: PolyLine::builder()
                .point(2900.0, 0.0)
                .point(2901.0, 0.01)
                .point(3000.0, 1.0)
                .point(3700.0, 1.0)
                .point(3701.0, 0.0)
                .build()
                .unwrap(),
            temperature_curve: PolyLine::empty(),
            soc_curve: PolyLine::empty(),
        };
        CurrentLimitHandler::new(Direction::Discharge, &config)
    }

    fn telemetry(cell_mv: f64) -> Telemetry {
        Telemetry {
            min_cell_voltage: Some(cell_mv),
            max_cell_voltage: Some(cell_mv),
            bms_discharge_limit: Some(80.0),
            started: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_unrestricted_reaches_max_ever() {
        let mut h = handler(None);
        let b = h.evaluate(&telemetry(3500.0), ForceEffect::None, 1.0);
        assert_eq!(b.result, 80.0);
        assert_eq!(b.min_cell_voltage, 80.0);
        assert_eq!(b.max_increase, None);
    }

    #[test]
    fn test_bms_raises_max_ever_and_caps() {
        let mut h = handler(None);
        let mut t = telemetry(3500.0);
        t.bms_discharge_limit = Some(120.0);
        let b = h.evaluate(&t, ForceEffect::None, 1.0);
        assert_eq!(b.max_ever, 120.0);
        assert_eq!(b.result, 120.0);

        t.bms_discharge_limit = Some(30.0);
        let b = h.evaluate(&t, ForceEffect::None, 1.0);
        assert_eq!(b.max_ever, 120.0, "max-ever never decreases");
        assert_eq!(b.result, 30.0);
    }

    #[test]
    fn test_missing_bms_blocks() {
        let mut h = handler(None);
        let mut t = telemetry(3500.0);
        t.bms_discharge_limit = None;
        assert_eq!(h.evaluate(&t, ForceEffect::None, 1.0).result, 0.0);
    }

    #[test]
    fn test_not_started_blocks() {
        let mut h = handler(None);
        let mut t = telemetry(3500.0);
        t.started = false;
        assert_eq!(h.evaluate(&t, ForceEffect::None, 1.0).result, 0.0);
    }

    #[test]
    fn test_voltage_hold_only_decreases() {
        let mut h = handler(None);
        // 2950.5 mV -> fraction 0.505 -> 40.4 A
        let first = h.evaluate(&telemetry(2950.5), ForceEffect::None, 1.0).result;
        assert!((first - 40.4).abs() < 1e-9);
        // Recovering to 2990 mV would allow more, but the hold keeps 40.4 A
        let held = h.evaluate(&telemetry(2990.0), ForceEffect::None, 1.0).result;
        assert!((held - 40.4).abs() < 1e-9);
        // Lower voltage decreases further
        let lower = h.evaluate(&telemetry(2920.0), ForceEffect::None, 1.0).result;
        assert!(lower < 40.4);
        // Back in the unrestricted zone releases the hold
        assert_eq!(h.evaluate(&telemetry(3100.0), ForceEffect::None, 1.0).result, 80.0);
    }

    #[test]
    fn test_blocked_and_released() {
        let mut h = handler(Some(20.0));
        for _ in 0..4 {
            h.evaluate(&telemetry(3500.0), ForceEffect::None, 1.0);
        }
        let blocked = h.evaluate(&telemetry(3500.0), ForceEffect::Blocked, 1.0);
        assert_eq!(blocked.result, 0.0);
        assert_eq!(blocked.force, Some(0.0));

        let resumed = h.evaluate(
            &telemetry(3500.0),
            ForceEffect::Released {
                resume_reference: 0.5,
            },
            1.0,
        );
        assert_eq!(resumed.result, 60.0);
    }

    #[test]
    fn test_reset_restores_initial() {
        let mut h = handler(None);
        let mut t = telemetry(3500.0);
        t.bms_discharge_limit = Some(150.0);
        h.evaluate(&t, ForceEffect::None, 1.0);
        h.reset();
        assert_eq!(h.max_ever(), 80.0);
    }
}
