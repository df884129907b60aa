//! Battery driver configuration
//!
//! Plain serde structures; loading and layering happen in the service.

use serde::{Deserialize, Serialize};

use crate::coordinator::TargetMode;
use crate::curve::{PolyLine, EPSILON};
use crate::error::{BmsError, Result};
use crate::force::{ForceParams, ForceWindow, Trigger};
use crate::protocol;

// ============================================================================
// Defaults
// ============================================================================

/// Default number of series modules
pub const DEFAULT_NUMBER_OF_MODULES: u16 = 20;
/// Reference current for percentage curves until the BMS reports a higher one
pub const DEFAULT_INITIAL_MAX_EVER_CURRENT: f64 = 80.0;
/// Default current ramp in A/s
pub const DEFAULT_MAX_INCREASE_PER_SECOND: f64 = 0.5;
pub const DEFAULT_MAX_START_ATTEMPTS: u32 = 5;
pub const DEFAULT_MAX_STOP_ATTEMPTS: u32 = 5;

fn default_modules() -> u16 {
    DEFAULT_NUMBER_OF_MODULES
}

fn default_capacity_per_module() -> f64 {
    protocol::CAPACITY_PER_MODULE_KWH
}

fn default_max_voltage_per_module() -> f64 {
    protocol::MAX_VOLTAGE_PER_MODULE
}

fn default_min_voltage_per_module() -> f64 {
    protocol::MIN_VOLTAGE_PER_MODULE
}

fn default_initial_max_ever() -> f64 {
    DEFAULT_INITIAL_MAX_EVER_CURRENT
}

fn default_max_increase() -> Option<f64> {
    Some(DEFAULT_MAX_INCREASE_PER_SECOND)
}

fn default_max_start_attempts() -> u32 {
    DEFAULT_MAX_START_ATTEMPTS
}

fn default_max_stop_attempts() -> u32 {
    DEFAULT_MAX_STOP_ATTEMPTS
}

// Built-in curves are known to be valid
fn curve(points: &[(f64, f64)]) -> PolyLine {
    PolyLine::new(points.iter().map(|p| (*p).into()).collect()).unwrap_or_default()
}

// ============================================================================
// Structures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRatings {
    #[serde(default = "default_capacity_per_module")]
    pub capacity_kwh: f64,
    #[serde(default = "default_max_voltage_per_module")]
    pub max_voltage: f64,
    #[serde(default = "default_min_voltage_per_module")]
    pub min_voltage: f64,
}

impl Default for ModuleRatings {
    fn default() -> Self {
        Self {
            capacity_kwh: default_capacity_per_module(),
            max_voltage: default_max_voltage_per_module(),
            min_voltage: default_min_voltage_per_module(),
        }
    }
}

/// Current-limit settings of one direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionConfig {
    #[serde(default = "default_initial_max_ever")]
    pub initial_max_ever_current: f64,
    /// Ramp in A/s; `None` disables ramping
    #[serde(default = "default_max_increase")]
    pub max_increase_per_second: Option<f64>,
    /// Cell voltage [mV] to fraction
    #[serde(default)]
    pub voltage_curve: PolyLine,
    /// Cell temperature [°C] to fraction
    #[serde(default)]
    pub temperature_curve: PolyLine,
    /// SoC [%] to fraction
    #[serde(default)]
    pub soc_curve: PolyLine,
}

impl DirectionConfig {
    pub fn charge_defaults() -> Self {
        Self {
            initial_max_ever_current: DEFAULT_INITIAL_MAX_EVER_CURRENT,
            max_increase_per_second: default_max_increase(),
            voltage_curve: curve(&[
                (3000.0, 0.1),
                (3000.0 + EPSILON, 1.0),
                (3450.0, 1.0),
                (3600.0, 0.2),
                (3650.0, 0.01),
                (3651.0, 0.0),
            ]),
            temperature_curve: curve(&[
                (-10.0, 0.0),
                (0.0, 0.01),
                (5.0, 0.5),
                (10.0, 1.0),
                (45.0, 1.0),
                (50.0, 0.5),
                (55.0, 0.0),
            ]),
            soc_curve: curve(&[(0.0, 1.0), (95.0, 1.0), (99.0, 0.2), (100.0, 0.05)]),
        }
    }

    pub fn discharge_defaults() -> Self {
        Self {
            initial_max_ever_current: DEFAULT_INITIAL_MAX_EVER_CURRENT,
            max_increase_per_second: default_max_increase(),
            voltage_curve: curve(&[
                (2900.0, 0.0),
                (2901.0, 0.01),
                (3000.0, 1.0),
                (3700.0, 1.0),
                (3701.0, 0.0),
            ]),
            temperature_curve: curve(&[
                (-20.0, 0.0),
                (-15.0, 0.1),
                (-10.0, 1.0),
                (50.0, 1.0),
                (55.0, 0.5),
                (60.0, 0.0),
            ]),
            soc_curve: PolyLine::empty(),
        }
    }

    fn validate(&self, field: &str) -> Result<()> {
        if !self.initial_max_ever_current.is_finite() || self.initial_max_ever_current <= 0.0 {
            return Err(BmsError::config(format!(
                "{}.initial_max_ever_current must be positive, got {}",
                field, self.initial_max_ever_current
            )));
        }
        if let Some(rate) = self.max_increase_per_second {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(BmsError::config(format!(
                    "{}.max_increase_per_second must be positive, got {}",
                    field, rate
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectionConfig {
    #[serde(default = "DirectionConfig::charge_defaults")]
    pub charge: DirectionConfig,
    #[serde(default = "DirectionConfig::discharge_defaults")]
    pub discharge: DirectionConfig,
    /// Window on min cell voltage [mV]; blocks discharge while active
    #[serde(default)]
    pub force_charge: Option<ForceParams>,
    /// Window on max cell voltage [mV]; blocks charge while active
    #[serde(default)]
    pub force_discharge: Option<ForceParams>,
    /// Ramp for relaxing voltage limits in V/s; `None` applies them at once
    #[serde(default)]
    pub max_voltage_change_per_second: Option<f64>,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            charge: DirectionConfig::charge_defaults(),
            discharge: DirectionConfig::discharge_defaults(),
            force_charge: Some(ForceParams {
                enter: 2850.0,
                release: 2910.0,
                resume_reference: 0.2,
            }),
            force_discharge: Some(ForceParams {
                enter: 3660.0,
                release: 3640.0,
                resume_reference: 0.2,
            }),
            max_voltage_change_per_second: None,
        }
    }
}

impl ProtectionConfig {
    pub fn force_charge_window(&self) -> Result<Option<ForceWindow>> {
        self.force_charge
            .map(|p| ForceWindow::new(p, Trigger::Below))
            .transpose()
    }

    pub fn force_discharge_window(&self) -> Result<Option<ForceWindow>> {
        self.force_discharge
            .map(|p| ForceWindow::new(p, Trigger::Above))
            .transpose()
    }

    pub fn validate(&self) -> Result<()> {
        self.charge.validate("protection.charge")?;
        self.discharge.validate("protection.discharge")?;
        self.force_charge_window()
            .map_err(|e| BmsError::config(format!("protection.force_charge: {}", e)))?;
        self.force_discharge_window()
            .map_err(|e| BmsError::config(format!("protection.force_discharge: {}", e)))?;
        if let Some(rate) = self.max_voltage_change_per_second {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(BmsError::config(format!(
                    "protection.max_voltage_change_per_second must be positive, got {}",
                    rate
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencingConfig {
    #[serde(default = "default_max_start_attempts")]
    pub max_start_attempts: u32,
    #[serde(default = "default_max_stop_attempts")]
    pub max_stop_attempts: u32,
}

impl Default for SequencingConfig {
    fn default() -> Self {
        Self {
            max_start_attempts: DEFAULT_MAX_START_ATTEMPTS,
            max_stop_attempts: DEFAULT_MAX_STOP_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Release a stuck probe when the transport reconnects
    #[serde(default)]
    pub rearm_on_reconnect: bool,
}

/// Registers receiving the published current limits each cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitRegisters {
    pub charge_max_current: u16,
    pub discharge_max_current: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryConfig {
    #[serde(default = "default_modules", alias = "number_of_slaves")]
    pub number_of_modules: u16,
    #[serde(default)]
    pub module: ModuleRatings,
    #[serde(default)]
    pub start_stop: TargetMode,
    #[serde(default)]
    pub protection: ProtectionConfig,
    #[serde(default)]
    pub sequencing: SequencingConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub limit_registers: Option<LimitRegisters>,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            number_of_modules: DEFAULT_NUMBER_OF_MODULES,
            module: ModuleRatings::default(),
            start_stop: TargetMode::default(),
            protection: ProtectionConfig::default(),
            sequencing: SequencingConfig::default(),
            probe: ProbeConfig::default(),
            limit_registers: None,
        }
    }
}

impl BatteryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.number_of_modules == 0 {
            return Err(BmsError::config("number_of_modules must be at least 1"));
        }
        let m = &self.module;
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(m.capacity_kwh)
            || !positive(m.min_voltage)
            || !positive(m.max_voltage)
            || m.max_voltage <= m.min_voltage
        {
            return Err(BmsError::config(format!(
                "module ratings invalid: capacity {} kWh, voltage {}..{} V",
                m.capacity_kwh, m.min_voltage, m.max_voltage
            )));
        }
        self.protection.validate()?;
        if self.sequencing.max_start_attempts == 0 || self.sequencing.max_stop_attempts == 0 {
            return Err(BmsError::config(
                "sequencing.max_start_attempts and max_stop_attempts must be at least 1",
            ));
        }
        if let Some(regs) = &self.limit_registers {
            if regs.charge_max_current == regs.discharge_max_current {
                return Err(BmsError::config(format!(
                    "limit_registers use the same address 0x{:04X} twice",
                    regs.charge_max_current
                )));
            }
        }
        Ok(())
    }

    pub fn nominal_ratings(&self) -> protocol::NominalRatings {
        protocol::nominal_ratings(
            self.number_of_modules,
            self.module.max_voltage,
            self.module.min_voltage,
            self.module.capacity_kwh,
        )
    }
}
