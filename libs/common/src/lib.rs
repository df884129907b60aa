//! `VoltageEMS` shared service library
//!
//! Provides the plumbing every battery service needs:
//! - logging bootstrap (console + daily rolling file)
//! - layered configuration loading (defaults, YAML, environment)
//! - graceful shutdown on Ctrl+C / SIGTERM

pub mod config_loader;
pub mod logging;
pub mod shutdown;

pub use config_loader::load_layered;
pub use logging::{init_logging, LogConfig};
pub use shutdown::{cancel_on_shutdown, wait_for_shutdown};

// Re-export common dependencies
pub use serde;
pub use tokio;
pub use tokio_util::sync::CancellationToken;
