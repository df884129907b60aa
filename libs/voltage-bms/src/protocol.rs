//! Register map of the BYD Battery-Box Commercial C130
//!
//! The baseline map exists on every hardware revision. Later firmware adds a
//! module block at 0x210D and live voltage limits at 0x216E, which are only
//! polled once the hardware prober has seen the indicator register answer.

use crate::alarms;
use crate::channel::ChannelId;
use crate::error::Result;
use crate::register::{Priority, RegisterBinding, Task, UpdateHook, MAX_READ_REGISTERS};
use crate::scaling::{DIRECT_1_TO_1, SCALE_FACTOR_2, SCALE_FACTOR_MINUS_1};

// ============================================================================
// Addresses and constants
// ============================================================================

pub const POWER_CIRCUIT_CONTROL_REGISTER: u16 = 0x2010;
pub const PACK_VOLTAGE_REGISTER: u16 = 0x2100;
pub const STATUS_BITS_REGISTER: u16 = 0x211D;
pub const ALARM_BLOCK_REGISTER: u16 = 0x2140;
pub const BMS_LIMITS_REGISTER: u16 = 0x216C;
pub const SLAVE_COMMUNICATION_REGISTER: u16 = 0x2183;
pub const FAILURE_REGISTER: u16 = 0x2185;

/// Register whose presence identifies the current hardware revision
pub const REVISION_INDICATOR_REGISTER: u16 = 0x210D;
pub const VOLTAGE_LIMITS_REGISTER: u16 = 0x216E;

pub const CELL_VOLTAGE_BASE: u16 = 0x2800;
pub const CELL_COUNT: u16 = 216;
/// The cell block is split after 119 registers
pub const CELL_VOLTAGE_SPLIT: u16 = 0x2877;
pub const CELL_TEMPERATURE_BASE: u16 = 0x2C00;
pub const TEMPERATURE_SENSOR_COUNT: u16 = 48;

pub const CAPACITY_PER_MODULE_KWH: f64 = 6.9;
pub const MAX_VOLTAGE_PER_MODULE: f64 = 42.0;
pub const MIN_VOLTAGE_PER_MODULE: f64 = 34.0;

/// Voltage limits assumed for hardware without the 0x216E block
pub const LEGACY_CHARGE_MAX_VOLTAGE: f64 = 820.0;
pub const LEGACY_DISCHARGE_MIN_VOLTAGE: f64 = 638.0;

/// Main contactor command and read-back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerCircuitControl {
    SwitchOff,
    SwitchOn,
}

impl PowerCircuitControl {
    pub fn raw(&self) -> u16 {
        match self {
            PowerCircuitControl::SwitchOff => 0,
            PowerCircuitControl::SwitchOn => 1,
        }
    }

    pub fn from_value(value: f64) -> Option<Self> {
        match value as i64 {
            0 => Some(PowerCircuitControl::SwitchOff),
            1 => Some(PowerCircuitControl::SwitchOn),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryWorkState {
    Initial,
    Stop,
    Starting,
    Running,
    Fault,
}

impl BatteryWorkState {
    pub fn from_value(value: f64) -> Option<Self> {
        match value as i64 {
            0 => Some(BatteryWorkState::Initial),
            1 => Some(BatteryWorkState::Stop),
            2 => Some(BatteryWorkState::Starting),
            3 => Some(BatteryWorkState::Running),
            4 => Some(BatteryWorkState::Fault),
            _ => None,
        }
    }
}

/// Nominal ratings for a bank of `modules` series modules
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NominalRatings {
    pub charge_max_voltage: f64,
    pub discharge_min_voltage: f64,
    /// Whole kWh, truncated
    pub capacity: f64,
}

pub fn nominal_ratings(
    modules: u16,
    max_voltage_per_module: f64,
    min_voltage_per_module: f64,
    capacity_per_module: f64,
) -> NominalRatings {
    let n = f64::from(modules);
    NominalRatings {
        charge_max_voltage: n * max_voltage_per_module,
        discharge_min_voltage: n * min_voltage_per_module,
        capacity: (n * capacity_per_module).trunc(),
    }
}

// ============================================================================
// Task builders
// ============================================================================

fn direct(address: u16, target: ChannelId) -> RegisterBinding {
    RegisterBinding::unsigned(address).map(target, DIRECT_1_TO_1)
}

/// Bit binding for an alarm word, bits taken from the alarm catalog
fn alarm_word(address: u16) -> RegisterBinding {
    alarms::catalog()
        .for_address(address)
        .iter()
        .fold(RegisterBinding::bits(address), |binding, def| {
            binding.bit(def.bit, def.channel())
        })
}

/// Consecutive single-register block split into read-size chunks
fn block_tasks(
    base: u16,
    count: u16,
    first_chunk: u16,
    target: fn(u8) -> ChannelId,
) -> Result<Vec<Task>> {
    let mut tasks = Vec::new();
    let mut offset = 0u16;
    let mut chunk = first_chunk.min(MAX_READ_REGISTERS);
    while offset < count {
        let len = chunk.min(count - offset);
        let start = base + offset;
        let bindings = (offset..offset + len)
            .map(|i| direct(base + i, target(i as u8)))
            .collect();
        tasks.push(Task::read(start, Priority::Low, bindings)?);
        offset += len;
        chunk = MAX_READ_REGISTERS;
    }
    Ok(tasks)
}

/// Tasks present on every hardware revision
pub fn build_initial_tasks() -> Result<Vec<Task>> {
    let mut tasks = vec![
        Task::read(
            POWER_CIRCUIT_CONTROL_REGISTER,
            Priority::High,
            vec![direct(POWER_CIRCUIT_CONTROL_REGISTER, ChannelId::PowerCircuitControl)],
        )?,
        Task::write_single(direct(
            POWER_CIRCUIT_CONTROL_REGISTER,
            ChannelId::PowerCircuitControl,
        ))?,
        Task::read(
            PACK_VOLTAGE_REGISTER,
            Priority::High,
            vec![
                RegisterBinding::unsigned(0x2100)
                    .map(ChannelId::Cluster1Voltage, SCALE_FACTOR_2)
                    .map(ChannelId::Voltage, SCALE_FACTOR_MINUS_1)
                    .on_update(UpdateHook::HardwareProbe),
                RegisterBinding::signed(0x2101)
                    .map(ChannelId::Cluster1Current, SCALE_FACTOR_2)
                    .map(ChannelId::Current, SCALE_FACTOR_MINUS_1),
                direct(0x2102, ChannelId::BatteryWorkState),
                direct(0x2103, ChannelId::Soc),
                RegisterBinding::unsigned(0x2104)
                    .map(ChannelId::Cluster1Soh, DIRECT_1_TO_1)
                    .map(ChannelId::Soh, DIRECT_1_TO_1),
                direct(0x2105, ChannelId::Cluster1MaxCellVoltageId),
                RegisterBinding::unsigned(0x2106)
                    .map(ChannelId::Cluster1MaxCellVoltage, DIRECT_1_TO_1)
                    .map(ChannelId::MaxCellVoltage, DIRECT_1_TO_1),
                direct(0x2107, ChannelId::Cluster1MinCellVoltageId),
                RegisterBinding::unsigned(0x2108)
                    .map(ChannelId::Cluster1MinCellVoltage, DIRECT_1_TO_1)
                    .map(ChannelId::MinCellVoltage, DIRECT_1_TO_1),
                direct(0x2109, ChannelId::Cluster1MaxCellTemperatureId),
                RegisterBinding::signed(0x210A)
                    .map(ChannelId::Cluster1MaxCellTemperature, DIRECT_1_TO_1)
                    .map(ChannelId::MaxCellTemperature, SCALE_FACTOR_MINUS_1),
                direct(0x210B, ChannelId::Cluster1MinCellTemperatureId),
                RegisterBinding::signed(0x210C)
                    .map(ChannelId::Cluster1MinCellTemperature, DIRECT_1_TO_1)
                    .map(ChannelId::MinCellTemperature, SCALE_FACTOR_MINUS_1),
            ],
        )?,
        Task::read(
            STATUS_BITS_REGISTER,
            Priority::High,
            vec![RegisterBinding::bits(STATUS_BITS_REGISTER).bit(1, ChannelId::NeedCharge)],
        )?,
        Task::read(
            ALARM_BLOCK_REGISTER,
            Priority::Low,
            vec![
                alarm_word(0x2140),
                alarm_word(0x2141),
                direct(0x2142, ChannelId::ClusterRunState),
                alarm_word(0x2143),
                alarm_word(0x2144),
                alarm_word(0x2145),
                alarm_word(0x2146),
                alarm_word(0x2147),
            ],
        )?,
        Task::read(
            BMS_LIMITS_REGISTER,
            Priority::High,
            vec![
                RegisterBinding::unsigned(0x216C).map(ChannelId::BpChargeBms, SCALE_FACTOR_MINUS_1),
                RegisterBinding::unsigned(0x216D).map(ChannelId::BpDischargeBms, SCALE_FACTOR_MINUS_1),
            ],
        )?,
        Task::read(
            SLAVE_COMMUNICATION_REGISTER,
            Priority::Low,
            vec![alarm_word(0x2183), alarm_word(0x2184)],
        )?,
        Task::read(FAILURE_REGISTER, Priority::Low, vec![alarm_word(FAILURE_REGISTER)])?,
    ];

    tasks.extend(block_tasks(
        CELL_VOLTAGE_BASE,
        CELL_COUNT,
        CELL_VOLTAGE_SPLIT - CELL_VOLTAGE_BASE,
        ChannelId::CellVoltage,
    )?);
    tasks.extend(block_tasks(
        CELL_TEMPERATURE_BASE,
        TEMPERATURE_SENSOR_COUNT,
        TEMPERATURE_SENSOR_COUNT,
        ChannelId::CellTemperature,
    )?);
    Ok(tasks)
}

/// Tasks added once the revision indicator register answers
pub fn revision_tasks() -> Result<Vec<Task>> {
    Ok(vec![
        Task::read(
            REVISION_INDICATOR_REGISTER,
            Priority::Low,
            vec![
                direct(0x210D, ChannelId::ModuleQty),
                direct(0x210E, ChannelId::TotalVoltageOfSingleModule),
            ],
        )?,
        Task::read(
            VOLTAGE_LIMITS_REGISTER,
            Priority::Low,
            vec![
                RegisterBinding::unsigned(0x216E)
                    .map(ChannelId::ChargeMaxVoltage, SCALE_FACTOR_MINUS_1),
                RegisterBinding::unsigned(0x216F)
                    .map(ChannelId::DischargeMinVoltage, SCALE_FACTOR_MINUS_1),
            ],
        )?,
    ])
}

/// Values installed when the indicator register is not implemented
pub fn legacy_defaults() -> Vec<(ChannelId, f64)> {
    vec![
        (ChannelId::ChargeMaxVoltage, LEGACY_CHARGE_MAX_VOLTAGE),
        (ChannelId::DischargeMinVoltage, LEGACY_DISCHARGE_MIN_VOLTAGE),
    ]
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::register::{FunctionCode, TaskSet};

    #[test]
    fn test_initial_tasks_layout() {
        let tasks = build_initial_tasks().unwrap();
        let starts: Vec<u16> = tasks.iter().map(|t| t.start()).collect();
        assert_eq!(
            starts,
            vec![0x2010, 0x2010, 0x2100, 0x211D, 0x2140, 0x216C, 0x2183, 0x2185, 0x2800, 0x2877, 0x2C00]
        );
        assert_eq!(tasks[1].function(), FunctionCode::WriteSingleRegister);
        assert_eq!(tasks[2].register_count(), 13);
        assert_eq!(tasks[8].register_count(), 119);
        assert_eq!(tasks[9].register_count(), 97);
        assert_eq!(tasks[9].end_address(), 0x28D7);
        assert_eq!(tasks[10].end_address(), 0x2C2F);

        // whole baseline is a valid task set
        assert!(TaskSet::new(tasks).is_ok());
    }

    #[test]
    fn test_probe_hook_on_pack_voltage() {
        let tasks = build_initial_tasks().unwrap();
        let hooked: Vec<u16> = tasks
            .iter()
            .flat_map(|t| t.bindings().iter())
            .filter(|b| b.hook().is_some())
            .map(|b| b.address())
            .collect();
        assert_eq!(hooked, vec![0x2100]);
    }

    #[test]
    fn test_pack_block_decode() {
        let tasks = build_initial_tasks().unwrap();
        let mut words = vec![0u16; 13];
        words[0] = 7424;
        words[1] = (-125i16) as u16;
        words[3] = 56;
        words[10] = 254;
        let decoded = tasks[2].decode(&words).unwrap();
        let get = |id: ChannelId| decoded.iter().find(|(c, _)| *c == id).map(|(_, v)| *v);
        assert!((get(ChannelId::Voltage).unwrap() - 742.4).abs() < 1e-9);
        assert_eq!(get(ChannelId::Cluster1Voltage), Some(742_400.0));
        assert_eq!(get(ChannelId::Current), Some(-12.5));
        assert_eq!(get(ChannelId::Cluster1Current), Some(-12_500.0));
        assert_eq!(get(ChannelId::Soc), Some(56.0));
        assert_eq!(get(ChannelId::Cluster1MaxCellTemperature), Some(254.0));
        assert!((get(ChannelId::MaxCellTemperature).unwrap() - 25.4).abs() < 1e-9);
    }

    #[test]
    fn test_revision_tasks_extend_baseline() {
        let set = TaskSet::new(build_initial_tasks().unwrap()).unwrap();
        let total = set.extend(revision_tasks().unwrap()).unwrap();
        assert_eq!(total, 13);
    }

    #[test]
    fn test_nominal_ratings() {
        let r = nominal_ratings(
            10,
            MAX_VOLTAGE_PER_MODULE,
            MIN_VOLTAGE_PER_MODULE,
            CAPACITY_PER_MODULE_KWH,
        );
        assert_eq!(r.charge_max_voltage, 420.0);
        assert_eq!(r.discharge_min_voltage, 340.0);
        assert_eq!(r.capacity, 69.0);

        let r = nominal_ratings(3, 42.0, 34.0, 6.9);
        assert_eq!(r.capacity, 20.0);
    }

    #[test]
    fn test_power_circuit_values() {
        assert_eq!(PowerCircuitControl::SwitchOn.raw(), 1);
        assert_eq!(
            PowerCircuitControl::from_value(0.0),
            Some(PowerCircuitControl::SwitchOff)
        );
        assert_eq!(PowerCircuitControl::from_value(7.0), None);
        assert_eq!(BatteryWorkState::from_value(4.0), Some(BatteryWorkState::Fault));
    }
}
