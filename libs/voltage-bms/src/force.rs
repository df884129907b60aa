//! Force-charge / force-discharge hysteresis windows

use serde::{Deserialize, Serialize};

use crate::error::{BmsError, Result};

/// Thresholds of one force window
///
/// `resume_reference` is the fraction of the max-ever current the slew
/// limiter restarts from once the window releases.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForceParams {
    pub enter: f64,
    pub release: f64,
    #[serde(default)]
    pub resume_reference: f64,
}

/// Unsafe side of the measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Measurement rising to `enter` activates (max cell voltage)
    Above,
    /// Measurement falling to `enter` activates (min cell voltage)
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceWindow {
    params: ForceParams,
    trigger: Trigger,
}

impl ForceWindow {
    pub fn new(params: ForceParams, trigger: Trigger) -> Result<Self> {
        if !params.enter.is_finite() || !params.release.is_finite() {
            return Err(BmsError::config("force window thresholds must be finite"));
        }
        let ordered = match trigger {
            Trigger::Above => params.release < params.enter,
            Trigger::Below => params.release > params.enter,
        };
        if !ordered {
            return Err(BmsError::config(format!(
                "force window release {} must lie on the safe side of enter {}",
                params.release, params.enter
            )));
        }
        if !(0.0..=1.0).contains(&params.resume_reference) {
            return Err(BmsError::config(format!(
                "force window resume_reference {} outside [0, 1]",
                params.resume_reference
            )));
        }
        Ok(Self { params, trigger })
    }

    pub fn params(&self) -> &ForceParams {
        &self.params
    }

    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    /// Next force-active flag given the current one and the measurement
    ///
    /// A missing measurement keeps the current state.
    pub fn next_active(&self, active: bool, value: Option<f64>) -> bool {
        let value = match value {
            Some(v) if !v.is_nan() => v,
            _ => return active,
        };
        match (self.trigger, active) {
            (Trigger::Above, false) => value >= self.params.enter,
            (Trigger::Above, true) => value > self.params.release,
            (Trigger::Below, false) => value <= self.params.enter,
            (Trigger::Below, true) => value < self.params.release,
        }
    }
}
