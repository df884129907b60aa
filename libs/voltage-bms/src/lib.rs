//! Battery storage control core
//!
//! Sits between a fixed-cycle scheduler and the Modbus register interface of
//! a BYD Battery-Box Commercial C130 cluster.
//!
//! # Key Components
//!
//! - **register / protocol**: register bindings, tasks and the C130 map
//! - **probe**: one-shot hardware revision detection
//! - **protection**: charge/discharge current and voltage envelopes
//! - **coordinator**: start/stop sequencing with bounded retries
//! - **driver**: per-cycle orchestration of all of the above

pub mod alarms;
pub mod channel;
pub mod config;
pub mod coordinator;
pub mod curve;
pub mod driver;
pub mod error;
pub mod force;
pub mod probe;
pub mod protection;
pub mod protocol;
pub mod register;
pub mod scaling;
pub mod slew;
pub mod transport;

// Re-exports
pub use channel::{ChannelId, ChannelStore, ChannelValue, Unit};
pub use config::BatteryConfig;
pub use coordinator::{CoordinatorReport, StartStop, StartStopCoordinator, State, TargetMode};
pub use curve::{CurvePoint, PolyLine, EPSILON};
pub use driver::BatteryDriver;
pub use error::{BmsError, Result};
pub use force::{ForceParams, ForceWindow, Trigger};
pub use probe::{HardwareProber, ProbeOutcome, ProbeState, RevisionPlan};
pub use protection::{Direction, Limits, ProtectionEngine, Telemetry};
pub use register::{Priority, Task, TaskSet, WriteRequest};
pub use scaling::ScalingConverter;
pub use slew::{RelaxDirection, SlewRateLimiter};
pub use transport::{OneShotReader, RegisterTransport};
