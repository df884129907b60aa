//! Service configuration
//!
//! Loaded from serialized defaults, an optional YAML file and `BMSRV_`
//! environment variables (`__` separates nested keys, e.g.
//! `BMSRV_BATTERY__NUMBER_OF_MODULES=16`).

use std::path::Path;
use std::time::Duration;

use common::LogConfig;
use errors::{VoltageError, VoltageResult};
use serde::{Deserialize, Serialize};
use voltage_bms::BatteryConfig;

pub const SERVICE_NAME: &str = "bmsrv";
pub const ENV_PREFIX: &str = "BMSRV_";

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_CYCLE_MS: u64 = 1000;
/// LOW priority tasks are polled once every this many cycles
pub const DEFAULT_LOW_PRIORITY_EVERY: u32 = 10;

fn default_cycle_ms() -> u64 {
    DEFAULT_CYCLE_MS
}

fn default_low_priority_every() -> u32 {
    DEFAULT_LOW_PRIORITY_EVERY
}

fn default_initial_soc() -> u16 {
    50
}

fn default_cell_voltage_mv() -> u16 {
    3300
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_cycle_ms")]
    pub cycle_ms: u64,
    #[serde(default = "default_low_priority_every")]
    pub low_priority_every: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cycle_ms: DEFAULT_CYCLE_MS,
            low_priority_every: DEFAULT_LOW_PRIORITY_EVERY,
        }
    }
}

impl ServiceConfig {
    pub fn cycle(&self) -> Duration {
        Duration::from_millis(self.cycle_ms)
    }

    /// Cycle length as used by the protection slew limiters
    pub fn cycle_seconds(&self) -> f64 {
        self.cycle_ms as f64 / 1000.0
    }
}

/// Firmware generation answered by the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareRevision {
    /// No module block at 0x210D, no live voltage limits
    Legacy,
    #[default]
    Current,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    #[serde(default)]
    pub revision: HardwareRevision,
    /// [%]
    #[serde(default = "default_initial_soc")]
    pub initial_soc: u16,
    /// [mV], applied to every cell
    #[serde(default = "default_cell_voltage_mv")]
    pub cell_voltage_mv: u16,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            revision: HardwareRevision::default(),
            initial_soc: default_initial_soc(),
            cell_voltage_mv: default_cell_voltage_mv(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub logging: LogConfig,
    #[serde(default)]
    pub battery: BatteryConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            logging: LogConfig {
                service_name: SERVICE_NAME.to_string(),
                ..Default::default()
            },
            battery: BatteryConfig::default(),
            simulator: SimulatorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load and validate
    pub fn load(path: Option<&Path>) -> VoltageResult<Self> {
        let config: Self = common::load_layered(path, ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> VoltageResult<()> {
        if self.service.cycle_ms == 0 {
            return Err(VoltageError::InvalidConfig {
                field: "service.cycle_ms".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.service.low_priority_every == 0 {
            return Err(VoltageError::InvalidConfig {
                field: "service.low_priority_every".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.simulator.initial_soc > 100 {
            return Err(VoltageError::InvalidConfig {
                field: "simulator.initial_soc".to_string(),
                reason: format!("{} is above 100 %", self.simulator.initial_soc),
            });
        }
        self.battery.validate()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.logging.service_name, SERVICE_NAME);
        assert_eq!(config.service.cycle_seconds(), 1.0);
    }

    #[test]
    fn test_zero_cycle_rejected() {
        let mut config = AppConfig::default();
        config.service.cycle_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(VoltageError::InvalidConfig { field, .. }) if field == "service.cycle_ms"
        ));
    }
}
