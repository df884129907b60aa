//! Battery protection: charge/discharge current and voltage envelopes
//!
//! Each cycle the engine combines the derating curves, the BMS-reported
//! limits and the force windows into one set of [`Limits`], rate-limited so
//! the power converter never sees a step increase.

mod current;
mod engine;
mod voltage;

pub use current::{CurrentBreakdown, CurrentLimitHandler};
pub use engine::ProtectionEngine;
pub use voltage::VoltageLimitHandler;

use serde::Serialize;

use crate::channel::{ChannelId, ChannelStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Charge,
    Discharge,
}

/// Measurements consumed by one evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Telemetry {
    /// [mV]
    pub min_cell_voltage: Option<f64>,
    /// [mV]
    pub max_cell_voltage: Option<f64>,
    /// [°C]
    pub min_cell_temperature: Option<f64>,
    /// [°C]
    pub max_cell_temperature: Option<f64>,
    /// [%]
    pub soc: Option<f64>,
    /// Pack voltage [V]
    pub pack_voltage: Option<f64>,
    /// Live BMS charge limit [A]
    pub bms_charge_limit: Option<f64>,
    /// Live BMS discharge limit [A]
    pub bms_discharge_limit: Option<f64>,
    /// Charge-max-voltage before force clamping [V]
    pub charge_max_voltage: Option<f64>,
    /// Discharge-min-voltage before force clamping [V]
    pub discharge_min_voltage: Option<f64>,
    pub started: bool,
}

impl Telemetry {
    pub fn from_store(store: &ChannelStore, started: bool) -> Self {
        Self {
            min_cell_voltage: store.get(ChannelId::MinCellVoltage),
            max_cell_voltage: store.get(ChannelId::MaxCellVoltage),
            min_cell_temperature: store.get(ChannelId::MinCellTemperature),
            max_cell_temperature: store.get(ChannelId::MaxCellTemperature),
            soc: store.get(ChannelId::Soc),
            pack_voltage: store.get(ChannelId::Voltage),
            bms_charge_limit: store.get(ChannelId::BpChargeBms),
            bms_discharge_limit: store.get(ChannelId::BpDischargeBms),
            charge_max_voltage: store.get(ChannelId::ChargeMaxVoltage),
            discharge_min_voltage: store.get(ChannelId::DischargeMinVoltage),
            started,
        }
    }

    pub fn bms_limit(&self, direction: Direction) -> Option<f64> {
        match direction {
            Direction::Charge => self.bms_charge_limit,
            Direction::Discharge => self.bms_discharge_limit,
        }
    }

    /// Cell voltages and SoC are reported
    pub fn is_complete(&self) -> bool {
        self.min_cell_voltage.is_some() && self.max_cell_voltage.is_some() && self.soc.is_some()
    }
}

/// Envelope published for one cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Limits {
    /// [A]
    pub charge_max_current: f64,
    /// [A]
    pub discharge_max_current: f64,
    /// [V]
    pub charge_max_voltage: Option<f64>,
    /// [V]
    pub discharge_min_voltage: Option<f64>,
    pub force_charge_active: bool,
    pub force_discharge_active: bool,
    /// Essential telemetry present and voltage limits known
    pub ready: bool,
    pub charge: CurrentBreakdown,
    pub discharge: CurrentBreakdown,
}

impl Limits {
    /// Everything blocked; used before the first evaluation
    pub fn blocked() -> Self {
        Self {
            charge_max_current: 0.0,
            discharge_max_current: 0.0,
            charge_max_voltage: None,
            discharge_min_voltage: None,
            force_charge_active: false,
            force_discharge_active: false,
            ready: false,
            charge: CurrentBreakdown::default(),
            discharge: CurrentBreakdown::default(),
        }
    }

    pub fn max_current(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Charge => self.charge_max_current,
            Direction::Discharge => self.discharge_max_current,
        }
    }
}
