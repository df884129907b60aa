//! Battery management service (bmsrv)
//!
//! Runs the battery control core on a fixed cycle against a register
//! transport. Without hardware the built-in C130 simulator stands in for the
//! Modbus link.

pub mod config;
pub mod runtime;
pub mod sim;

pub use config::AppConfig;
pub use runtime::{BatteryService, CycleSummary};
pub use sim::SimulatedBattery;
