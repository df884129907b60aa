//! Start/stop coordination
//!
//! Turns the operator's start/stop intent into a supervised contactor
//! sequence with bounded retries.

mod machine;
mod state;

pub use machine::{Context, CoordinatorReport, PowerCircuitWriter, StartStopCoordinator};
pub use state::{StartStop, State, TargetMode};
