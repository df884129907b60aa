//! One-shot hardware revision probe
//!
//! Triggered by the first valid read of the pack-voltage register. Reads the
//! revision indicator once, then either extends the task set with the
//! revision registers or installs legacy voltage limits.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::channel::{ChannelId, ChannelStore};
use crate::error::Result;
use crate::protocol;
use crate::register::{Task, TaskSet};
use crate::transport::OneShotReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    NotStarted,
    InFlight,
    Completed,
}

impl ProbeState {
    fn as_u8(self) -> u8 {
        match self {
            ProbeState::NotStarted => 0,
            ProbeState::InFlight => 1,
            ProbeState::Completed => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ProbeState::InFlight,
            2 => ProbeState::Completed,
            _ => ProbeState::NotStarted,
        }
    }
}

/// What to do once the indicator register answers (or does not)
#[derive(Debug, Clone)]
pub struct RevisionPlan {
    pub indicator_register: u16,
    pub revision_tasks: Vec<Task>,
    pub legacy_defaults: Vec<(ChannelId, f64)>,
}

impl RevisionPlan {
    /// Plan for the C130 register map
    pub fn c130() -> Result<Self> {
        Ok(Self {
            indicator_register: protocol::REVISION_INDICATOR_REGISTER,
            revision_tasks: protocol::revision_tasks()?,
            legacy_defaults: protocol::legacy_defaults(),
        })
    }
}

/// Result of one probe run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Revision registers added to the task set
    Extended,
    /// Legacy defaults installed
    Legacy,
    /// Task set extension failed; the probe stays in flight
    ExtensionFailed,
    /// Indicator read failed at the transport
    ReadFailed,
}

pub struct HardwareProber {
    state: AtomicU8,
    claimed: AtomicBool,
    plan: RevisionPlan,
    tasks: Arc<TaskSet>,
    store: Arc<ChannelStore>,
    reader: Arc<dyn OneShotReader>,
}

impl std::fmt::Debug for HardwareProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareProber")
            .field("state", &self.state())
            .field("claimed", &self.claimed.load(Ordering::Acquire))
            .field("indicator_register", &self.plan.indicator_register)
            .finish()
    }
}

impl HardwareProber {
    pub fn new(
        plan: RevisionPlan,
        tasks: Arc<TaskSet>,
        store: Arc<ChannelStore>,
        reader: Arc<dyn OneShotReader>,
    ) -> Self {
        Self {
            state: AtomicU8::new(ProbeState::NotStarted.as_u8()),
            claimed: AtomicBool::new(false),
            plan,
            tasks,
            store,
            reader,
        }
    }

    pub fn state(&self) -> ProbeState {
        ProbeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Driver activated; wait for the first valid pack-voltage read
    pub fn arm(&self) {
        let _ = self.state.compare_exchange(
            ProbeState::NotStarted.as_u8(),
            ProbeState::InFlight.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Hook for reads of the pack-voltage register
    ///
    /// Spawns the probe at most once. Returns the handle of the spawned probe.
    pub fn on_update(self: &Arc<Self>, raw: Option<u16>) -> Option<JoinHandle<ProbeOutcome>> {
        if raw.is_none() {
            // No data yet; transport is not connected
            return None;
        }
        if self.state() != ProbeState::InFlight {
            return None;
        }
        if self.claimed.swap(true, Ordering::AcqRel) {
            return None;
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                error!("Cannot start hardware probe without a runtime: {}", e);
                self.claimed.store(false, Ordering::Release);
                return None;
            },
        };
        let prober = Arc::clone(self);
        debug!(
            register = format!("0x{:04X}", self.plan.indicator_register),
            "Hardware probe started"
        );
        Some(handle.spawn(async move { prober.probe().await }.instrument(Span::current())))
    }

    /// Read the indicator register and apply the plan
    pub async fn probe(&self) -> ProbeOutcome {
        match self.reader.read_once(self.plan.indicator_register).await {
            Ok(Some(value)) => match self.tasks.extend(self.plan.revision_tasks.clone()) {
                Ok(total) => {
                    self.complete();
                    info!(indicator = value, tasks = total, "Detected current hardware version");
                    ProbeOutcome::Extended
                },
                Err(e) => {
                    error!("Unable to add registers for detected hardware version: {}", e);
                    ProbeOutcome::ExtensionFailed
                },
            },
            Ok(None) => {
                info!("Detected old hardware version. Registers are not available. Setting default values.");
                for (id, value) in &self.plan.legacy_defaults {
                    self.store.set(*id, *value);
                }
                self.complete();
                ProbeOutcome::Legacy
            },
            Err(e) => {
                error!("Unable to detect hardware version: {}", e);
                ProbeOutcome::ReadFailed
            },
        }
    }

    fn complete(&self) {
        self.state
            .store(ProbeState::Completed.as_u8(), Ordering::Release);
    }

    /// Release a probe stuck in flight so the next valid read retries it
    pub fn rearm(&self) -> bool {
        if self.state() == ProbeState::InFlight && self.claimed.swap(false, Ordering::AcqRel) {
            warn!("Hardware probe re-armed");
            return true;
        }
        false
    }
}
