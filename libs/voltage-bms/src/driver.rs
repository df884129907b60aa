//! Battery driver
//!
//! Owns the channel store, the task set, the hardware prober, the protection
//! engine and the start/stop coordinator, and sequences them per cycle:
//! reads are applied first, then `on_before_cycle` computes limits, then
//! `on_after_cycle` runs the coordinator. Queued writes are taken by the
//! transport at the end of the cycle.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::alarms;
use crate::channel::{ChannelId, ChannelStore};
use crate::config::BatteryConfig;
use crate::coordinator::{
    Context, CoordinatorReport, PowerCircuitWriter, StartStop, StartStopCoordinator, TargetMode,
};
use crate::error::Result;
use crate::probe::{HardwareProber, ProbeOutcome, RevisionPlan};
use crate::protection::{Limits, ProtectionEngine, Telemetry};
use crate::protocol::{self, BatteryWorkState, PowerCircuitControl};
use crate::register::{RegisterBinding, Task, TaskSet, UpdateHook, WriteRequest};
use crate::scaling::SCALE_FACTOR_MINUS_1;
use crate::transport::OneShotReader;

impl PowerCircuitWriter for TaskSet {
    fn write_power_circuit(&self, value: PowerCircuitControl) -> Result<()> {
        self.add_write(protocol::POWER_CIRCUIT_CONTROL_REGISTER, f64::from(value.raw()))
    }
}

pub struct BatteryDriver {
    config: BatteryConfig,
    store: Arc<ChannelStore>,
    tasks: Arc<TaskSet>,
    prober: Arc<HardwareProber>,
    engine: Mutex<ProtectionEngine>,
    coordinator: Mutex<StartStopCoordinator>,
    limits: ArcSwap<Limits>,
    report: ArcSwap<CoordinatorReport>,
}

impl std::fmt::Debug for BatteryDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatteryDriver")
            .field("modules", &self.config.number_of_modules)
            .field("tasks", &self.tasks.len())
            .field("probe", &self.prober.state())
            .field("state", &self.coordinator.lock().state())
            .finish()
    }
}

/// Write tasks for the configured limit registers, in 0.1 A
fn limit_register_tasks(config: &BatteryConfig) -> Result<Vec<Task>> {
    let Some(regs) = &config.limit_registers else {
        return Ok(Vec::new());
    };
    Ok(vec![
        Task::write_single(
            RegisterBinding::unsigned(regs.charge_max_current)
                .map(ChannelId::ChargeMaxCurrent, SCALE_FACTOR_MINUS_1),
        )?,
        Task::write_single(
            RegisterBinding::unsigned(regs.discharge_max_current)
                .map(ChannelId::DischargeMaxCurrent, SCALE_FACTOR_MINUS_1),
        )?,
    ])
}

impl BatteryDriver {
    pub fn new(config: BatteryConfig, reader: Arc<dyn OneShotReader>) -> Result<Self> {
        config.validate()?;

        let mut initial = protocol::build_initial_tasks()?;
        initial.extend(limit_register_tasks(&config)?);
        let tasks = Arc::new(TaskSet::new(initial)?);
        let store = Arc::new(ChannelStore::new());
        let prober = Arc::new(HardwareProber::new(
            RevisionPlan::c130()?,
            Arc::clone(&tasks),
            Arc::clone(&store),
            reader,
        ));
        let engine = ProtectionEngine::new(&config.protection)?;
        let coordinator = StartStopCoordinator::new(config.start_stop, &config.sequencing);

        Ok(Self {
            config,
            store,
            tasks,
            prober,
            engine: Mutex::new(engine),
            coordinator: Mutex::new(coordinator),
            limits: ArcSwap::from_pointee(Limits::blocked()),
            report: ArcSwap::from_pointee(CoordinatorReport::initial()),
        })
    }

    pub fn config(&self) -> &BatteryConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ChannelStore> {
        &self.store
    }

    pub fn tasks(&self) -> &Arc<TaskSet> {
        &self.tasks
    }

    pub fn prober(&self) -> &Arc<HardwareProber> {
        &self.prober
    }

    /// Publish nominal ratings and arm the hardware probe
    pub fn activate(&self) {
        let ratings = self.config.nominal_ratings();
        self.store
            .set(ChannelId::ChargeMaxVoltage, ratings.charge_max_voltage);
        self.store
            .set(ChannelId::DischargeMinVoltage, ratings.discharge_min_voltage);
        self.store.set(ChannelId::Capacity, ratings.capacity);
        self.prober.arm();
        info!(
            modules = self.config.number_of_modules,
            charge_max_voltage = ratings.charge_max_voltage,
            discharge_min_voltage = ratings.discharge_min_voltage,
            capacity = ratings.capacity,
            tasks = self.tasks.len(),
            "Battery driver activated"
        );
    }

    /// Read task starting at `start`
    pub fn read_task(&self, start: u16) -> Option<Arc<Task>> {
        self.tasks
            .snapshot()
            .iter()
            .find(|t| t.function().is_read() && t.start() == start)
            .cloned()
    }

    /// Apply the result of one read task
    ///
    /// `None` means no data (not connected, timeout) and invalidates every
    /// channel of the task. Returns the probe handle when this read started
    /// the hardware probe.
    pub fn apply_read(
        &self,
        task: &Task,
        words: Option<&[u16]>,
    ) -> Result<Option<JoinHandle<ProbeOutcome>>> {
        match words {
            Some(words) => {
                for (id, value) in task.decode(words)? {
                    self.store.set(id, value);
                }
            },
            None => {
                for id in task.targets() {
                    self.store.invalidate(id);
                }
            },
        }

        let mut probe = None;
        for event in task.hook_events(words) {
            match event.hook {
                UpdateHook::HardwareProbe => {
                    if let Some(handle) = self.prober.on_update(event.raw) {
                        probe = Some(handle);
                    }
                },
            }
        }
        Ok(probe)
    }

    /// Fault-level alarm active or the BMS reports the fault work state
    pub fn is_faulted(&self) -> bool {
        let work_state = self
            .store
            .get(ChannelId::BatteryWorkState)
            .and_then(BatteryWorkState::from_value);
        work_state == Some(BatteryWorkState::Fault) || alarms::catalog().has_active_fault(&self.store)
    }

    /// Compute and publish this cycle's limits
    pub fn on_before_cycle(&self, cycle_seconds: f64) -> Arc<Limits> {
        let started = self.coordinator.lock().is_started();
        let telemetry = Telemetry::from_store(&self.store, started);
        let limits = Arc::new(self.engine.lock().evaluate(&telemetry, cycle_seconds));

        self.store
            .set(ChannelId::ChargeMaxCurrent, limits.charge_max_current);
        self.store
            .set(ChannelId::DischargeMaxCurrent, limits.discharge_max_current);

        if let Some(regs) = &self.config.limit_registers {
            let writes = [
                (regs.charge_max_current, limits.charge_max_current),
                (regs.discharge_max_current, limits.discharge_max_current),
            ];
            for (address, value) in writes {
                if let Err(e) = self.tasks.add_write(address, value) {
                    warn!(address = format!("0x{:04X}", address), "Limit write rejected: {}", e);
                }
            }
        }

        self.limits.store(Arc::clone(&limits));
        limits
    }

    /// Run the coordinator and publish its report
    pub fn on_after_cycle(&self) -> Arc<CoordinatorReport> {
        let power_circuit = self
            .store
            .get(ChannelId::PowerCircuitControl)
            .and_then(PowerCircuitControl::from_value);
        let ctx = Context {
            power_circuit,
            faulted: self.is_faulted(),
            protection_ready: self.limits.load().ready,
            writer: self.tasks.as_ref(),
        };
        let report = Arc::new(self.coordinator.lock().run_cycle(&ctx));

        self.store
            .set(ChannelId::StateMachine, f64::from(report.state_before.value()));
        self.store.set_bool(ChannelId::RunFailed, report.run_failed);
        self.store
            .set_bool(ChannelId::MaxStartAttempts, report.max_start_attempts);
        self.store
            .set_bool(ChannelId::MaxStopAttempts, report.max_stop_attempts);
        self.store
            .set(ChannelId::StartStop, report.start_stop.value());

        self.report.store(Arc::clone(&report));
        report
    }

    /// Latest published limits
    pub fn limits(&self) -> Arc<Limits> {
        self.limits.load_full()
    }

    /// Latest coordinator report
    pub fn report(&self) -> Arc<CoordinatorReport> {
        self.report.load_full()
    }

    /// Operator or controller intent; returns true when it changed
    pub fn set_target(&self, intent: StartStop) -> bool {
        self.coordinator.lock().set_target(intent)
    }

    /// Returns true when the mode changed
    pub fn set_target_mode(&self, mode: TargetMode) -> bool {
        self.coordinator.lock().set_target_mode(mode)
    }

    /// Writes queued during this cycle, in queue order
    pub fn take_writes(&self) -> Vec<WriteRequest> {
        self.tasks.drain_writes()
    }

    /// Called by the transport after a reconnect
    pub fn on_transport_reconnected(&self) -> bool {
        if !self.config.probe.rearm_on_reconnect {
            return false;
        }
        self.prober.rearm()
    }

    /// Reset protection state; the next evaluation starts from zero
    pub fn reset_protection(&self) -> Result<()> {
        let mut engine = self.engine.lock();
        *engine = ProtectionEngine::new(&self.config.protection)?;
        self.limits.store(Arc::new(Limits::blocked()));
        debug!("Protection engine reset");
        Ok(())
    }

    /// One-line summary for the cycle debug log
    pub fn debug_log(&self) -> String {
        let limits = self.limits.load();
        let report = self.report.load();
        format!(
            "SoC:{}|Discharge:{};{}|Charge:{};{}|State:{}",
            fmt_opt(self.store.get(ChannelId::Soc), "%"),
            fmt_opt(limits.discharge_min_voltage, "V"),
            fmt_amps(limits.discharge_max_current),
            fmt_opt(limits.charge_max_voltage, "V"),
            fmt_amps(limits.charge_max_current),
            report.state,
        )
    }
}

fn fmt_opt(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{:.1}{}", v, unit),
        None => "-".to_string(),
    }
}

fn fmt_amps(value: f64) -> String {
    format!("{:.1}A", value)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::alarms::AlarmLevel;
    use crate::config::LimitRegisters;
    use crate::coordinator::State;
    use crate::probe::ProbeState;
    use async_trait::async_trait;

    struct FixedReader(Option<u16>);

    #[async_trait]
    impl OneShotReader for FixedReader {
        async fn read_once(&self, _address: u16) -> Result<Option<u16>> {
            Ok(self.0)
        }
    }

    fn driver(config: BatteryConfig, indicator: Option<u16>) -> BatteryDriver {
        BatteryDriver::new(config, Arc::new(FixedReader(indicator))).unwrap()
    }

    fn pack_words() -> Vec<u16> {
        // 700.0 V, 0 A, work state 3, 50 %, 98 %, cell 3300/3280 mV, 25/24 degC
        vec![7000, 0, 3, 50, 98, 1, 3300, 2, 3280, 3, 250, 4, 240]
    }

    #[test]
    fn test_activate_publishes_ratings() {
        let d = driver(BatteryConfig::default(), None);
        d.activate();
        assert_eq!(d.store().get(ChannelId::ChargeMaxVoltage), Some(840.0));
        assert_eq!(d.store().get(ChannelId::DischargeMinVoltage), Some(680.0));
        assert_eq!(d.store().get(ChannelId::Capacity), Some(138.0));
        assert_eq!(d.prober().state(), ProbeState::InFlight);
    }

    #[tokio::test]
    async fn test_first_pack_read_extends_tasks() {
        let d = driver(BatteryConfig::default(), Some(20));
        d.activate();
        assert_eq!(d.tasks().len(), 11);

        let task = d.read_task(protocol::PACK_VOLTAGE_REGISTER).unwrap();
        let handle = d.apply_read(&task, Some(&pack_words())).unwrap().unwrap();
        assert_eq!(handle.await.unwrap(), ProbeOutcome::Extended);
        assert_eq!(d.tasks().len(), 13);
        assert_eq!(d.store().get(ChannelId::Voltage), Some(700.0));
        assert_eq!(d.store().get(ChannelId::MaxCellTemperature), Some(25.0));

        // probe runs once
        assert!(d.apply_read(&task, Some(&pack_words())).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_read_invalidates_and_keeps_probe_waiting() {
        let d = driver(BatteryConfig::default(), None);
        d.activate();
        let task = d.read_task(protocol::PACK_VOLTAGE_REGISTER).unwrap();
        d.apply_read(&task, Some(&pack_words())).unwrap().unwrap().await.unwrap();
        assert_eq!(d.store().get(ChannelId::ChargeMaxVoltage), Some(820.0));

        assert!(d.apply_read(&task, None).unwrap().is_none());
        assert_eq!(d.store().get(ChannelId::Voltage), None);
        assert_eq!(d.store().get(ChannelId::Soc), None);
    }

    #[test]
    fn test_limit_registers_receive_limits() {
        let config = BatteryConfig {
            limit_registers: Some(LimitRegisters {
                charge_max_current: 0x3000,
                discharge_max_current: 0x3001,
            }),
            ..Default::default()
        };
        let d = driver(config, None);
        d.activate();
        let limits = d.on_before_cycle(1.0);
        // not started
        assert_eq!(limits.charge_max_current, 0.0);
        let writes = d.take_writes();
        assert_eq!(
            writes.iter().map(|w| w.address).collect::<Vec<_>>(),
            vec![0x3000, 0x3001]
        );
        assert_eq!(writes[0].words, vec![0]);
    }

    #[test]
    fn test_start_request_queues_switch_on() {
        let d = driver(BatteryConfig::default(), None);
        d.activate();
        assert!(d.set_target(StartStop::Start));
        assert!(!d.set_target(StartStop::Start));

        d.on_before_cycle(1.0);
        assert_eq!(d.on_after_cycle().state, State::Undefined);
        assert_eq!(d.on_after_cycle().state, State::GoingRunning);
        let report = d.on_after_cycle();
        assert_eq!(report.start_attempts, 1);
        assert_eq!(d.store().get(ChannelId::StateMachine), Some(1.0));

        let writes = d.take_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].address, protocol::POWER_CIRCUIT_CONTROL_REGISTER);
        assert_eq!(writes[0].words, vec![1]);
    }

    #[test]
    fn test_fault_alarm_marks_battery_faulted() {
        let d = driver(BatteryConfig::default(), None);
        assert!(!d.is_faulted());
        let fault = alarms::catalog()
            .iter()
            .find(|def| def.level == AlarmLevel::Fault)
            .unwrap();
        d.store().set_bool(fault.channel(), true);
        assert!(d.is_faulted());
    }

    #[test]
    fn test_rearm_on_reconnect_is_opt_in() {
        let d = driver(BatteryConfig::default(), None);
        d.activate();
        assert!(!d.on_transport_reconnected());
    }

    #[test]
    fn test_debug_log_line() {
        let d = driver(BatteryConfig::default(), None);
        d.activate();
        d.store().set(ChannelId::Soc, 55.0);
        d.on_before_cycle(1.0);
        d.on_after_cycle();
        let line = d.debug_log();
        assert!(line.starts_with("SoC:55.0%|Discharge:"));
        assert!(line.ends_with("|State:UNDEFINED"));
    }
}
