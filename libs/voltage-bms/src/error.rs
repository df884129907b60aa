//! Battery control error types

use errors::{ErrorCategory, VoltageError, VoltageErrorTrait};
use thiserror::Error;

/// Errors raised by the battery control core
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BmsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid curve: {0}")]
    InvalidCurve(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Probe error: {0}")]
    Probe(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Value {value} out of range [{min}, {max}] for register 0x{address:04X}")]
    OutOfRange {
        address: u16,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Sequencing error: {0}")]
    Sequencing(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for voltage-bms operations
pub type Result<T> = std::result::Result<T, BmsError>;

impl BmsError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_curve(msg: impl Into<String>) -> Self {
        Self::InvalidCurve(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn probe(msg: impl Into<String>) -> Self {
        Self::Probe(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn sequencing(msg: impl Into<String>) -> Self {
        Self::Sequencing(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl VoltageErrorTrait for BmsError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "BMS_CONFIG",
            Self::InvalidCurve(_) => "BMS_INVALID_CURVE",
            Self::Protocol(_) => "BMS_PROTOCOL",
            Self::Probe(_) => "BMS_PROBE",
            Self::Transport(_) => "BMS_TRANSPORT",
            Self::OutOfRange { .. } => "BMS_OUT_OF_RANGE",
            Self::Sequencing(_) => "BMS_SEQUENCING",
            Self::Internal(_) => "BMS_INTERNAL",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) | Self::InvalidCurve(_) => ErrorCategory::Configuration,
            Self::Protocol(_) | Self::Probe(_) => ErrorCategory::Protocol,
            Self::Transport(_) => ErrorCategory::Connection,
            Self::OutOfRange { .. } => ErrorCategory::Validation,
            Self::Sequencing(_) => ErrorCategory::Sequencing,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }
}

impl From<BmsError> for VoltageError {
    fn from(err: BmsError) -> Self {
        match err {
            BmsError::Config(msg) => VoltageError::Configuration(msg),
            BmsError::InvalidCurve(msg) => VoltageError::InvalidConfig {
                field: "protection".to_string(),
                reason: msg,
            },
            BmsError::Protocol(msg) => VoltageError::Modbus(msg),
            BmsError::Probe(msg) => VoltageError::Probe(msg),
            BmsError::Transport(msg) => VoltageError::Communication(msg),
            BmsError::OutOfRange {
                value, min, max, ..
            } => VoltageError::OutOfRange {
                value: value.to_string(),
                min: min.to_string(),
                max: max.to_string(),
            },
            BmsError::Sequencing(msg) => VoltageError::Sequencing(msg),
            BmsError::Internal(msg) => VoltageError::Internal(msg),
        }
    }
}
