//! Unified error handling for VoltageEMS battery services
//!
//! Crates keep their own domain error types (for example `BmsError` in
//! `voltage-bms`) and convert into [`VoltageError`] at the service boundary.
//! [`VoltageErrorTrait`] gives every error type the same classification
//! surface: a stable code, a category and a retry hint.

use thiserror::Error;

// ============================================================================
// VoltageError - Main error type
// ============================================================================

/// Service-level error type
#[derive(Debug, Error)]
pub enum VoltageError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    // ======================================
    // Battery Link Errors
    // ======================================
    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Modbus error: {0}")]
    Modbus(String),

    #[error("Hardware probe failed: {0}")]
    Probe(String),

    #[error("Out of range: {value} not in [{min}, {max}]")]
    OutOfRange {
        value: String,
        min: String,
        max: String,
    },

    // ======================================
    // Start/Stop Errors
    // ======================================
    #[error("Sequencing error: {0}")]
    Sequencing(String),

    // ======================================
    // Service Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Service startup failed: {0}")]
    StartupFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using VoltageError
pub type VoltageResult<T> = Result<T, VoltageError>;

impl VoltageError {
    /// Process exit code used by service binaries
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::Configuration | ErrorCategory::Validation => 2,
            ErrorCategory::Protocol | ErrorCategory::Connection => 3,
            ErrorCategory::Sequencing => 4,
            ErrorCategory::Internal => 1,
        }
    }
}

impl From<serde_yaml::Error> for VoltageError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<figment::Error> for VoltageError {
    fn from(err: figment::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

// ============================================================================
// VoltageError implements VoltageErrorTrait
// ============================================================================

impl VoltageErrorTrait for VoltageError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::MissingConfig(_) => "MISSING_CONFIG",

            Self::Communication(_) => "COMMUNICATION_ERROR",
            Self::Modbus(_) => "MODBUS_ERROR",
            Self::Probe(_) => "PROBE_ERROR",
            Self::OutOfRange { .. } => "OUT_OF_RANGE",

            Self::Sequencing(_) => "SEQUENCING_ERROR",

            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::StartupFailed(_) => "STARTUP_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::InvalidConfig { .. } | Self::MissingConfig(_) => {
                ErrorCategory::Configuration
            },

            Self::Communication(_) => ErrorCategory::Connection,

            Self::Modbus(_) | Self::Probe(_) => ErrorCategory::Protocol,

            Self::OutOfRange { .. } => ErrorCategory::Validation,

            Self::Sequencing(_) => ErrorCategory::Sequencing,

            Self::Io(_) | Self::Serialization(_) | Self::StartupFailed(_) | Self::Internal(_) => {
                ErrorCategory::Internal
            },
        }
    }
}

// ============================================================================
// VoltageEMS Error Trait - Architectural layer
// ============================================================================

/// Error category enum - used for classification and log routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    /// Register value does not fit its encoding
    Validation,
    /// Device answered, but not as expected
    Protocol,
    /// Link to the battery lost or not established
    Connection,
    /// Contactor sequencing
    Sequencing,
    Internal,
}

/// VoltageEMS error capability trait
///
/// Domain error types keep their own variants and gain a common
/// outward-facing interface by implementing this trait.
pub trait VoltageErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Get error code (for logs and exit messages)
    fn error_code(&self) -> &'static str;

    /// Get error category
    fn category(&self) -> ErrorCategory;

    /// A later cycle may succeed without intervention
    fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Connection
    }
}
