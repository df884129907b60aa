//! Start/stop sequencing state machine

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::SequencingConfig;
use crate::error::{BmsError, Result};
use crate::protocol::PowerCircuitControl;

use super::state::{StartStop, State, TargetMode};

/// Sink for main contactor commands
pub trait PowerCircuitWriter {
    fn write_power_circuit(&self, value: PowerCircuitControl) -> Result<()>;
}

/// Inputs of one coordinator run
pub struct Context<'a> {
    /// Read-back of the contactor register
    pub power_circuit: Option<PowerCircuitControl>,
    /// A fault-level alarm is active
    pub faulted: bool,
    /// Protection limits are computed from complete telemetry
    pub protection_ready: bool,
    pub writer: &'a dyn PowerCircuitWriter,
}

/// Published after every run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinatorReport {
    /// State at the start of the cycle
    pub state_before: State,
    pub state: State,
    pub start_stop: StartStop,
    pub run_failed: bool,
    pub max_start_attempts: bool,
    pub max_stop_attempts: bool,
    pub start_attempts: u32,
    pub stop_attempts: u32,
    pub error: Option<String>,
}

impl CoordinatorReport {
    pub fn initial() -> Self {
        Self {
            state_before: State::Undefined,
            state: State::Undefined,
            start_stop: StartStop::Undefined,
            run_failed: false,
            max_start_attempts: false,
            max_stop_attempts: false,
            start_attempts: 0,
            stop_attempts: 0,
            error: None,
        }
    }
}

/// Outcome of one transition, committed only when its write succeeded
#[derive(Debug, Clone, Copy)]
struct Step {
    next: State,
    start_attempts: u32,
    stop_attempts: u32,
    max_start_fault: bool,
    max_stop_fault: bool,
    write: Option<PowerCircuitControl>,
}

#[derive(Debug, Clone)]
pub struct StartStopCoordinator {
    state: State,
    target_mode: TargetMode,
    intent: StartStop,
    last_resolved: Option<StartStop>,
    force_reset: bool,
    start_attempts: u32,
    stop_attempts: u32,
    max_start_attempts: u32,
    max_stop_attempts: u32,
    max_start_fault: bool,
    max_stop_fault: bool,
}

impl StartStopCoordinator {
    pub fn new(target_mode: TargetMode, sequencing: &SequencingConfig) -> Self {
        Self {
            state: State::Undefined,
            target_mode,
            intent: StartStop::Undefined,
            last_resolved: None,
            force_reset: false,
            start_attempts: 0,
            stop_attempts: 0,
            max_start_attempts: sequencing.max_start_attempts,
            max_stop_attempts: sequencing.max_stop_attempts,
            max_start_fault: false,
            max_stop_fault: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn intent(&self) -> StartStop {
        self.intent
    }

    pub fn target_mode(&self) -> TargetMode {
        self.target_mode
    }

    /// Effective target after applying the target mode
    pub fn target(&self) -> StartStop {
        self.target_mode.resolve(self.intent)
    }

    pub fn start_attempts(&self) -> u32 {
        self.start_attempts
    }

    pub fn stop_attempts(&self) -> u32 {
        self.stop_attempts
    }

    pub fn max_start_attempts_fault(&self) -> bool {
        self.max_start_fault
    }

    pub fn max_stop_attempts_fault(&self) -> bool {
        self.max_stop_fault
    }

    /// Battery reported as started to the protection engine
    pub fn is_started(&self) -> bool {
        self.state == State::Running
    }

    /// Reflects only settled states
    pub fn start_stop(&self) -> StartStop {
        match self.state {
            State::Running => StartStop::Start,
            State::Stopped => StartStop::Stop,
            _ => StartStop::Undefined,
        }
    }

    /// Store a new intent; a changed value forces the next run to UNDEFINED
    pub fn set_target(&mut self, intent: StartStop) -> bool {
        if self.intent == intent {
            return false;
        }
        debug!(from = ?self.intent, to = ?intent, "Start/stop target changed");
        self.intent = intent;
        self.force_reset = true;
        true
    }

    /// Store a new target mode; a changed mode forces the next run to UNDEFINED
    pub fn set_target_mode(&mut self, mode: TargetMode) -> bool {
        if self.target_mode == mode {
            return false;
        }
        debug!(from = ?self.target_mode, to = ?mode, "Start/stop target mode changed");
        self.target_mode = mode;
        self.force_reset = true;
        true
    }

    fn reset_to_undefined(&mut self) {
        self.state = State::Undefined;
        self.start_attempts = 0;
        self.stop_attempts = 0;
        self.max_start_fault = false;
        self.max_stop_fault = false;
    }

    fn step(&self, next: State) -> Step {
        Step {
            next,
            start_attempts: self.start_attempts,
            stop_attempts: self.stop_attempts,
            max_start_fault: self.max_start_fault,
            max_stop_fault: self.max_stop_fault,
            write: None,
        }
    }

    fn transition(&self, target: StartStop, ctx: &Context<'_>) -> Result<Step> {
        let on = ctx.power_circuit == Some(PowerCircuitControl::SwitchOn);
        let off = ctx.power_circuit == Some(PowerCircuitControl::SwitchOff);

        let step = match self.state {
            State::Undefined => {
                let mut s = match target {
                    StartStop::Start => self.step(State::GoingRunning),
                    StartStop::Stop => self.step(State::GoingStopped),
                    StartStop::Undefined => self.step(State::Undefined),
                };
                s.start_attempts = 0;
                s.stop_attempts = 0;
                s
            },
            State::GoingRunning => {
                if target != StartStop::Start {
                    return Err(BmsError::sequencing(format!(
                        "GOING_RUNNING with target {:?}",
                        target
                    )));
                }
                if on && !ctx.faulted && ctx.protection_ready {
                    self.step(State::Running)
                } else {
                    let mut s = self.step(State::GoingRunning);
                    s.start_attempts += 1;
                    if s.start_attempts > self.max_start_attempts {
                        s.max_start_fault = true;
                        s.next = State::Error;
                    } else {
                        s.write = Some(PowerCircuitControl::SwitchOn);
                    }
                    s
                }
            },
            State::Running => {
                if ctx.faulted {
                    self.step(State::Error)
                } else if !on {
                    self.step(State::Undefined)
                } else {
                    self.step(State::Running)
                }
            },
            State::GoingStopped => {
                if target != StartStop::Stop {
                    return Err(BmsError::sequencing(format!(
                        "GOING_STOPPED with target {:?}",
                        target
                    )));
                }
                if off {
                    self.step(State::Stopped)
                } else {
                    let mut s = self.step(State::GoingStopped);
                    s.stop_attempts += 1;
                    if s.stop_attempts > self.max_stop_attempts {
                        s.max_stop_fault = true;
                        s.next = State::Error;
                    } else {
                        s.write = Some(PowerCircuitControl::SwitchOff);
                    }
                    s
                }
            },
            State::Stopped => {
                if off {
                    self.step(State::Stopped)
                } else {
                    self.step(State::Undefined)
                }
            },
            State::Error => {
                let mut s = self.step(State::Error);
                s.write = Some(PowerCircuitControl::SwitchOff);
                s
            },
        };
        Ok(step)
    }

    /// Run one cycle
    ///
    /// A changed target ends the cycle in UNDEFINED. On error nothing is
    /// committed.
    pub fn run(&mut self, ctx: &Context<'_>) -> Result<()> {
        let resolved = self.target();
        if self.force_reset || self.last_resolved != Some(resolved) {
            if self.state != State::Undefined {
                info!(state = %self.state, target = ?resolved, "Target changed, resetting state machine");
            }
            self.last_resolved = Some(resolved);
            self.force_reset = false;
            self.reset_to_undefined();
            return Ok(());
        }

        let step = self.transition(resolved, ctx)?;
        if let Some(value) = step.write {
            ctx.writer.write_power_circuit(value)?;
        }

        if step.max_start_fault && !self.max_start_fault {
            error!(attempts = step.start_attempts, "Max start attempts exceeded");
        }
        if step.max_stop_fault && !self.max_stop_fault {
            error!(attempts = step.stop_attempts, "Max stop attempts exceeded");
        }
        if step.next != self.state {
            if step.next == State::Error {
                warn!(from = %self.state, "State machine entered ERROR");
            } else {
                info!(from = %self.state, to = %step.next, "State transition");
            }
        }

        self.state = step.next;
        self.start_attempts = step.start_attempts;
        self.stop_attempts = step.stop_attempts;
        self.max_start_fault = step.max_start_fault;
        self.max_stop_fault = step.max_stop_fault;
        Ok(())
    }

    /// Run and convert the outcome into the published report
    pub fn run_cycle(&mut self, ctx: &Context<'_>) -> CoordinatorReport {
        let state_before = self.state;
        let result = self.run(ctx);
        if let Err(e) = &result {
            error!("State machine failed: {}", e);
        }
        CoordinatorReport {
            state_before,
            state: self.state,
            start_stop: self.start_stop(),
            run_failed: result.is_err(),
            max_start_attempts: self.max_start_fault,
            max_stop_attempts: self.max_stop_fault,
            start_attempts: self.start_attempts,
            stop_attempts: self.stop_attempts,
            error: result.err().map(|e| e.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        writes: Mutex<Vec<PowerCircuitControl>>,
        fail: bool,
    }

    impl PowerCircuitWriter for Recorder {
        fn write_power_circuit(&self, value: PowerCircuitControl) -> Result<()> {
            if self.fail {
                return Err(BmsError::transport("write queue unavailable"));
            }
            self.writes.lock().push(value);
            Ok(())
        }
    }

    fn ctx(writer: &Recorder, power: Option<PowerCircuitControl>) -> Context<'_> {
        Context {
            power_circuit: power,
            faulted: false,
            protection_ready: true,
            writer,
        }
    }

    fn coordinator(max: u32) -> StartStopCoordinator {
        StartStopCoordinator::new(
            TargetMode::Auto,
            &SequencingConfig {
                max_start_attempts: max,
                max_stop_attempts: max,
            },
        )
    }

    #[test]
    fn test_start_sequence() {
        let rec = Recorder::default();
        let mut c = coordinator(3);
        c.set_target(StartStop::Start);
        let off = Some(PowerCircuitControl::SwitchOff);
        let on = Some(PowerCircuitControl::SwitchOn);

        c.run(&ctx(&rec, off)).unwrap();
        assert_eq!(c.state(), State::Undefined);
        c.run(&ctx(&rec, off)).unwrap();
        assert_eq!(c.state(), State::GoingRunning);
        c.run(&ctx(&rec, off)).unwrap();
        assert_eq!(c.state(), State::GoingRunning);
        assert_eq!(c.start_attempts(), 1);
        assert_eq!(*rec.writes.lock(), vec![PowerCircuitControl::SwitchOn]);
        c.run(&ctx(&rec, on)).unwrap();
        assert_eq!(c.state(), State::Running);
        assert!(c.is_started());
        assert_eq!(c.start_stop(), StartStop::Start);
    }

    #[test]
    fn test_not_ready_keeps_going_running() {
        let rec = Recorder::default();
        let mut c = coordinator(3);
        c.set_target(StartStop::Start);
        let on = Some(PowerCircuitControl::SwitchOn);
        c.run(&ctx(&rec, on)).unwrap();
        c.run(&ctx(&rec, on)).unwrap();
        let mut not_ready = ctx(&rec, on);
        not_ready.protection_ready = false;
        c.run(&not_ready).unwrap();
        assert_eq!(c.state(), State::GoingRunning);
    }

    #[test]
    fn test_fault_in_running_enters_error_and_switches_off() {
        let rec = Recorder::default();
        let mut c = coordinator(3);
        c.set_target(StartStop::Start);
        let on = Some(PowerCircuitControl::SwitchOn);
        for _ in 0..3 {
            c.run(&ctx(&rec, on)).unwrap();
        }
        assert_eq!(c.state(), State::Running);

        let mut faulted = ctx(&rec, on);
        faulted.faulted = true;
        c.run(&faulted).unwrap();
        assert_eq!(c.state(), State::Error);
        c.run(&faulted).unwrap();
        assert_eq!(rec.writes.lock().last(), Some(&PowerCircuitControl::SwitchOff));
    }

    #[test]
    fn test_running_falls_back_on_hardware_off() {
        let rec = Recorder::default();
        let mut c = coordinator(3);
        c.set_target(StartStop::Start);
        let on = Some(PowerCircuitControl::SwitchOn);
        for _ in 0..3 {
            c.run(&ctx(&rec, on)).unwrap();
        }
        c.run(&ctx(&rec, Some(PowerCircuitControl::SwitchOff))).unwrap();
        assert_eq!(c.state(), State::Undefined);
    }

    #[test]
    fn test_stop_sequence() {
        let rec = Recorder::default();
        let mut c = coordinator(3);
        c.set_target(StartStop::Stop);
        let on = Some(PowerCircuitControl::SwitchOn);
        let off = Some(PowerCircuitControl::SwitchOff);
        c.run(&ctx(&rec, on)).unwrap();
        c.run(&ctx(&rec, on)).unwrap();
        assert_eq!(c.state(), State::GoingStopped);
        c.run(&ctx(&rec, on)).unwrap();
        assert_eq!(*rec.writes.lock(), vec![PowerCircuitControl::SwitchOff]);
        c.run(&ctx(&rec, off)).unwrap();
        assert_eq!(c.state(), State::Stopped);
        assert_eq!(c.start_stop(), StartStop::Stop);
        assert!(!c.is_started());
    }

    #[test]
    fn test_failed_write_commits_nothing() {
        let rec = Recorder {
            fail: true,
            ..Default::default()
        };
        let mut c = coordinator(3);
        c.set_target(StartStop::Start);
        let off = Some(PowerCircuitControl::SwitchOff);
        c.run(&ctx(&rec, off)).unwrap();
        c.run(&ctx(&rec, off)).unwrap();
        assert_eq!(c.state(), State::GoingRunning);

        let report = c.run_cycle(&ctx(&rec, off));
        assert!(report.run_failed);
        assert!(report.error.is_some());
        assert_eq!(report.state, State::GoingRunning);
        assert_eq!(c.start_attempts(), 0);
    }

    #[test]
    fn test_target_mode_overrides_intent() {
        let rec = Recorder::default();
        let mut c = StartStopCoordinator::new(TargetMode::ForceStop, &SequencingConfig::default());
        c.set_target(StartStop::Start);
        assert_eq!(c.target(), StartStop::Stop);
        let on = Some(PowerCircuitControl::SwitchOn);
        c.run(&ctx(&rec, on)).unwrap();
        c.run(&ctx(&rec, on)).unwrap();
        assert_eq!(c.state(), State::GoingStopped);
    }

    #[test]
    fn test_report_publishes_previous_state() {
        let rec = Recorder::default();
        let mut c = coordinator(3);
        c.set_target(StartStop::Start);
        let off = Some(PowerCircuitControl::SwitchOff);
        c.run_cycle(&ctx(&rec, off));
        let report = c.run_cycle(&ctx(&rec, off));
        assert_eq!(report.state_before, State::Undefined);
        assert_eq!(report.state, State::GoingRunning);
        assert!(!report.run_failed);
    }

    #[test]
    fn test_mode_change_forces_reset() {
        let rec = Recorder::default();
        let mut c = coordinator(3);
        c.set_target(StartStop::Stop);
        let off = Some(PowerCircuitControl::SwitchOff);
        c.run(&ctx(&rec, off)).unwrap();
        c.run(&ctx(&rec, off)).unwrap();
        c.run(&ctx(&rec, off)).unwrap();
        assert_eq!(c.state(), State::Stopped);

        assert!(c.set_target_mode(TargetMode::ForceStop));
        assert_eq!(c.target(), StartStop::Stop);
        c.run(&ctx(&rec, off)).unwrap();
        assert_eq!(c.state(), State::Undefined);
        assert!(!c.set_target_mode(TargetMode::ForceStop));
    }
}
