//! Contracts with the Modbus transport
//!
//! The control core never frames bytes itself; it hands tasks to a
//! transport and receives raw register words back.

use async_trait::async_trait;

use crate::error::Result;
use crate::register::WriteRequest;

/// Single register read used by the hardware prober
///
/// @purpose Probe for an optional register without polling it every cycle
/// @contract `Ok(None)` when the device does not implement the register,
///           `Err` only for genuine transport failures
#[async_trait]
pub trait OneShotReader: Send + Sync {
    async fn read_once(&self, address: u16) -> Result<Option<u16>>;
}

/// Block reads and writes executed for the cycle driver
///
/// @lifecycle connect (transport-owned) → poll tasks → flush writes
#[async_trait]
pub trait RegisterTransport: Send + Sync {
    /// Read `count` holding registers; `Ok(None)` when no data is available
    /// (not connected or device timeout)
    async fn read_holding(&self, start: u16, count: u16) -> Result<Option<Vec<u16>>>;

    async fn write(&self, request: &WriteRequest) -> Result<()>;

    fn is_connected(&self) -> bool {
        true
    }
}
