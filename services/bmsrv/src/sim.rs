//! Simulated C130 register bank
//!
//! Answers block reads, single-register probes and writes the way a BYD
//! cluster does on the Modbus link. The contactor follows writes to the
//! power-circuit register immediately.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};
use voltage_bms::protocol::{
    self, PowerCircuitControl, CELL_COUNT, CELL_TEMPERATURE_BASE, CELL_VOLTAGE_BASE,
    TEMPERATURE_SENSOR_COUNT,
};
use voltage_bms::{BmsError, OneShotReader, RegisterTransport, Result, WriteRequest};

use crate::config::{HardwareRevision, SimulatorConfig};

const WORK_STATE_REGISTER: u16 = 0x2102;
const SOC_REGISTER: u16 = 0x2103;
const MAX_CELL_VOLTAGE_REGISTER: u16 = 0x2106;
const MIN_CELL_VOLTAGE_REGISTER: u16 = 0x2108;

/// Raw work-state values
const WORK_STATE_STOP: u16 = 1;
const WORK_STATE_RUNNING: u16 = 3;

/// Total failure word, bit 0 is fault level
const FAILURE_BIT: u16 = 0x0001;

pub struct SimulatedBattery {
    registers: Mutex<BTreeMap<u16, u16>>,
    connected: AtomicBool,
}

impl std::fmt::Debug for SimulatedBattery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedBattery")
            .field("registers", &self.registers.lock().len())
            .field("connected", &self.connected.load(Ordering::Acquire))
            .finish()
    }
}

impl SimulatedBattery {
    pub fn new(config: &SimulatorConfig, modules: u16) -> Self {
        let mut r = BTreeMap::new();
        let cell = config.cell_voltage_mv;
        let pack_decivolts = u32::from(cell) * u32::from(CELL_COUNT) / 100;

        r.insert(protocol::POWER_CIRCUIT_CONTROL_REGISTER, PowerCircuitControl::SwitchOff.raw());

        // 0x2100..0x210C pack block
        r.insert(protocol::PACK_VOLTAGE_REGISTER, pack_decivolts.min(u32::from(u16::MAX)) as u16);
        r.insert(0x2101, 0);
        r.insert(WORK_STATE_REGISTER, WORK_STATE_STOP);
        r.insert(SOC_REGISTER, config.initial_soc);
        r.insert(0x2104, 100);
        r.insert(0x2105, 1);
        r.insert(MAX_CELL_VOLTAGE_REGISTER, cell);
        r.insert(0x2107, 2);
        r.insert(MIN_CELL_VOLTAGE_REGISTER, cell);
        r.insert(0x2109, 1);
        r.insert(0x210A, 250);
        r.insert(0x210B, 2);
        r.insert(0x210C, 240);

        r.insert(protocol::STATUS_BITS_REGISTER, 0);
        for address in protocol::ALARM_BLOCK_REGISTER..=0x2147 {
            r.insert(address, 0);
        }
        // 80.0 A both ways
        r.insert(protocol::BMS_LIMITS_REGISTER, 800);
        r.insert(protocol::BMS_LIMITS_REGISTER + 1, 800);
        for address in protocol::SLAVE_COMMUNICATION_REGISTER..=protocol::FAILURE_REGISTER {
            r.insert(address, 0);
        }
        for i in 0..CELL_COUNT {
            r.insert(CELL_VOLTAGE_BASE + i, cell);
        }
        for i in 0..TEMPERATURE_SENSOR_COUNT {
            r.insert(CELL_TEMPERATURE_BASE + i, 25);
        }

        if config.revision == HardwareRevision::Current {
            r.insert(protocol::REVISION_INDICATOR_REGISTER, modules);
            r.insert(protocol::REVISION_INDICATOR_REGISTER + 1, 420);
            r.insert(protocol::VOLTAGE_LIMITS_REGISTER, modules.saturating_mul(420));
            r.insert(protocol::VOLTAGE_LIMITS_REGISTER + 1, modules.saturating_mul(340));
        }

        info!(
            revision = ?config.revision,
            registers = r.len(),
            "Simulated battery ready"
        );
        Self {
            registers: Mutex::new(r),
            connected: AtomicBool::new(true),
        }
    }

    pub fn register(&self, address: u16) -> Option<u16> {
        self.registers.lock().get(&address).copied()
    }

    pub fn set_register(&self, address: u16, value: u16) {
        self.registers.lock().insert(address, value);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub fn contactor_closed(&self) -> bool {
        self.register(protocol::POWER_CIRCUIT_CONTROL_REGISTER)
            == Some(PowerCircuitControl::SwitchOn.raw())
    }

    /// Raise or clear the total failure bit
    pub fn set_failure(&self, active: bool) {
        let mut regs = self.registers.lock();
        let word = regs.entry(protocol::FAILURE_REGISTER).or_insert(0);
        if active {
            *word |= FAILURE_BIT;
        } else {
            *word &= !FAILURE_BIT;
        }
    }

    /// Set every cell and the min/max registers to `millivolts`
    pub fn set_cell_voltage(&self, millivolts: u16) {
        let mut regs = self.registers.lock();
        for i in 0..CELL_COUNT {
            regs.insert(CELL_VOLTAGE_BASE + i, millivolts);
        }
        regs.insert(MAX_CELL_VOLTAGE_REGISTER, millivolts);
        regs.insert(MIN_CELL_VOLTAGE_REGISTER, millivolts);
    }

    fn apply_write(&self, address: u16, value: u16) {
        let mut regs = self.registers.lock();
        regs.insert(address, value);
        if address == protocol::POWER_CIRCUIT_CONTROL_REGISTER {
            let state = if value == PowerCircuitControl::SwitchOn.raw() {
                WORK_STATE_RUNNING
            } else {
                WORK_STATE_STOP
            };
            regs.insert(WORK_STATE_REGISTER, state);
        }
    }
}

#[async_trait]
impl OneShotReader for SimulatedBattery {
    async fn read_once(&self, address: u16) -> Result<Option<u16>> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(BmsError::transport("simulator disconnected"));
        }
        Ok(self.register(address))
    }
}

#[async_trait]
impl RegisterTransport for SimulatedBattery {
    async fn read_holding(&self, start: u16, count: u16) -> Result<Option<Vec<u16>>> {
        if !self.connected.load(Ordering::Acquire) {
            return Ok(None);
        }
        let regs = self.registers.lock();
        // Any unimplemented address makes the device answer with an exception
        let words: Option<Vec<u16>> = (0..count)
            .map(|i| {
                start
                    .checked_add(i)
                    .and_then(|address| regs.get(&address).copied())
            })
            .collect();
        if words.is_none() {
            debug!(start = format!("0x{:04X}", start), count, "Illegal data address");
        }
        Ok(words)
    }

    async fn write(&self, request: &WriteRequest) -> Result<()> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(BmsError::transport("simulator disconnected"));
        }
        for (offset, word) in request.words.iter().enumerate() {
            let address = request
                .address
                .checked_add(offset as u16)
                .ok_or_else(|| BmsError::protocol("write past end of address space"))?;
            self.apply_write(address, *word);
        }
        debug!(
            address = format!("0x{:04X}", request.address),
            fc = request.function.code(),
            words = ?request.words,
            "Simulator write"
        );
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use voltage_bms::register::FunctionCode;

    fn sim(revision: HardwareRevision) -> SimulatedBattery {
        SimulatedBattery::new(
            &SimulatorConfig {
                revision,
                ..Default::default()
            },
            20,
        )
    }

    #[tokio::test]
    async fn test_block_reads_cover_initial_tasks() {
        let battery = sim(HardwareRevision::Legacy);
        for task in protocol::build_initial_tasks().unwrap() {
            if !task.function().is_read() {
                continue;
            }
            let words = battery
                .read_holding(task.start(), task.register_count())
                .await
                .unwrap();
            assert!(words.is_some(), "no data for 0x{:04X}", task.start());
        }
    }

    #[tokio::test]
    async fn test_revision_registers_follow_revision() {
        let legacy = sim(HardwareRevision::Legacy);
        let current = sim(HardwareRevision::Current);
        let indicator = protocol::REVISION_INDICATOR_REGISTER;
        assert_eq!(legacy.read_once(indicator).await.unwrap(), None);
        assert_eq!(current.read_once(indicator).await.unwrap(), Some(20));
        assert_eq!(
            current
                .read_holding(protocol::VOLTAGE_LIMITS_REGISTER, 2)
                .await
                .unwrap(),
            Some(vec![8400, 6800])
        );
    }

    #[tokio::test]
    async fn test_contactor_follows_write() {
        let battery = sim(HardwareRevision::Current);
        battery
            .write(&WriteRequest {
                address: protocol::POWER_CIRCUIT_CONTROL_REGISTER,
                function: FunctionCode::WriteSingleRegister,
                words: vec![1],
            })
            .await
            .unwrap();
        assert!(battery.contactor_closed());
        assert_eq!(battery.register(WORK_STATE_REGISTER), Some(WORK_STATE_RUNNING));
    }

    #[tokio::test]
    async fn test_disconnected_reads_have_no_data() {
        let battery = sim(HardwareRevision::Current);
        battery.set_connected(false);
        assert!(!battery.is_connected());
        assert_eq!(battery.read_holding(0x2100, 13).await.unwrap(), None);
        assert!(battery.read_once(0x210D).await.is_err());
    }
}
