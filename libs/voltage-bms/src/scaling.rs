//! Scaling converters between raw register integers and engineering values
//!
//! A converter is applied after the raw word has been decoded (sign and
//! width already resolved). Uplink (device to system) multiplies by the
//! power of ten, downlink divides and rounds to the nearest integer.

use crate::error::{BmsError, Result};

/// Lowest supported power-of-ten exponent
pub const MIN_SCALE_EXPONENT: i8 = -1;
/// Highest supported power-of-ten exponent
pub const MAX_SCALE_EXPONENT: i8 = 2;

/// Value transformation direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformDirection {
    /// Raw register value to engineering value (uplink)
    DeviceToSystem,
    /// Engineering value to raw register value (downlink)
    SystemToDevice,
}

/// Bidirectional raw ⇄ engineering mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScalingConverter {
    /// Value is used as-is
    #[default]
    Direct,
    /// Value is multiplied by `10^k` on uplink
    ScaleFactor(i8),
}

pub const DIRECT_1_TO_1: ScalingConverter = ScalingConverter::Direct;
pub const SCALE_FACTOR_MINUS_1: ScalingConverter = ScalingConverter::ScaleFactor(-1);
pub const SCALE_FACTOR_1: ScalingConverter = ScalingConverter::ScaleFactor(1);
pub const SCALE_FACTOR_2: ScalingConverter = ScalingConverter::ScaleFactor(2);

impl ScalingConverter {
    /// Build a `×10^k` converter; `k == 0` yields [`ScalingConverter::Direct`]
    pub fn scale_factor(exponent: i8) -> Result<Self> {
        if !(MIN_SCALE_EXPONENT..=MAX_SCALE_EXPONENT).contains(&exponent) {
            return Err(BmsError::config(format!(
                "Unsupported scale factor 10^{} (supported: 10^{}..10^{})",
                exponent, MIN_SCALE_EXPONENT, MAX_SCALE_EXPONENT
            )));
        }
        Ok(if exponent == 0 {
            Self::Direct
        } else {
            Self::ScaleFactor(exponent)
        })
    }

    /// Power-of-ten exponent of this converter
    pub fn exponent(&self) -> i8 {
        match self {
            Self::Direct => 0,
            Self::ScaleFactor(k) => *k,
        }
    }

    /// Transform a value in the given direction
    ///
    /// Negative exponents divide instead of multiplying by a fractional
    /// factor so that e.g. `3500 → 350.0` is exact.
    pub fn transform(&self, value: f64, direction: TransformDirection) -> f64 {
        let k = self.exponent();
        if k == 0 {
            return value;
        }
        let magnitude = 10f64.powi(i32::from(k.abs()));
        match (direction, k > 0) {
            (TransformDirection::DeviceToSystem, true) => value * magnitude,
            (TransformDirection::DeviceToSystem, false) => value / magnitude,
            (TransformDirection::SystemToDevice, true) => value / magnitude,
            (TransformDirection::SystemToDevice, false) => value * magnitude,
        }
    }

    /// Raw register integer to engineering value
    #[inline]
    pub fn to_value(&self, raw: i64) -> f64 {
        self.transform(raw as f64, TransformDirection::DeviceToSystem)
    }

    /// Engineering value to raw register integer, rounded to nearest
    #[inline]
    pub fn to_raw(&self, value: f64) -> i64 {
        self.transform(value, TransformDirection::SystemToDevice)
            .round() as i64
    }
}

impl std::fmt::Display for ScalingConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "DIRECT_1_TO_1"),
            Self::ScaleFactor(k) if *k < 0 => write!(f, "SCALE_FACTOR_MINUS_{}", k.unsigned_abs()),
            Self::ScaleFactor(k) => write!(f, "SCALE_FACTOR_{}", k),
        }
    }
}
