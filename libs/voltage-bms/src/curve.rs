//! Piecewise-linear fraction curves
//!
//! A [`PolyLine`] maps a measurement (cell voltage, temperature, SoC) to a
//! fraction in `[0, 1]` that scales the allowed current. Points are ordered
//! by `x`; two points with nearly equal `x` form a step.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{BmsError, Result};

/// Smallest meaningful measurement delta; also the width of a curve step
pub const EPSILON: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub x: f64,
    pub y: f64,
}

impl From<(f64, f64)> for CurvePoint {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Immutable, validated curve
///
/// An empty curve is valid and means "no restriction" (always 1.0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<CurvePoint>", into = "Vec<CurvePoint>")]
pub struct PolyLine {
    points: Arc<[CurvePoint]>,
}

impl PolyLine {
    /// Build from points, validating ordering and range
    pub fn new(points: Vec<CurvePoint>) -> Result<Self> {
        for (i, p) in points.iter().enumerate() {
            if !p.x.is_finite() || !p.y.is_finite() {
                return Err(BmsError::invalid_curve(format!(
                    "point {} is not finite ({}, {})",
                    i, p.x, p.y
                )));
            }
            if !(0.0..=1.0).contains(&p.y) {
                return Err(BmsError::invalid_curve(format!(
                    "point {} fraction {} outside [0, 1]",
                    i, p.y
                )));
            }
        }
        if let Some(w) = points.windows(2).find(|w| w[1].x < w[0].x) {
            return Err(BmsError::invalid_curve(format!(
                "x values must be ascending, got {} after {}",
                w[1].x, w[0].x
            )));
        }
        Ok(Self {
            points: points.into(),
        })
    }

    pub fn builder() -> PolyLineBuilder {
        PolyLineBuilder::default()
    }

    /// Curve that never restricts
    pub fn empty() -> Self {
        Self {
            points: Arc::from(Vec::new()),
        }
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Evaluate the curve
    ///
    /// - empty curve gives 1.0
    /// - no measurement (or NaN) gives 0.0
    /// - below the first point or above the last point the end value holds
    /// - between points the value is interpolated linearly
    pub fn value(&self, x: Option<f64>) -> f64 {
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some(f), Some(l)) => (f, l),
            _ => return 1.0,
        };
        let x = match x {
            Some(x) if !x.is_nan() => x,
            _ => return 0.0,
        };
        if x <= first.x {
            return first.y;
        }
        if x >= last.x {
            return last.y;
        }

        // Last point with p.x <= x; exists because x > first.x
        let lower_idx = self.points.partition_point(|p| p.x <= x) - 1;
        let lower = self.points[lower_idx];
        let upper = self.points[lower_idx + 1];
        let span = upper.x - lower.x;
        if span <= 0.0 {
            return upper.y;
        }
        lower.y + (upper.y - lower.y) * (x - lower.x) / span
    }
}

impl Default for PolyLine {
    fn default() -> Self {
        Self::empty()
    }
}

impl TryFrom<Vec<CurvePoint>> for PolyLine {
    type Error = BmsError;

    fn try_from(points: Vec<CurvePoint>) -> Result<Self> {
        Self::new(points)
    }
}

impl From<PolyLine> for Vec<CurvePoint> {
    fn from(line: PolyLine) -> Self {
        line.points.to_vec()
    }
}

#[derive(Debug, Default)]
pub struct PolyLineBuilder {
    points: Vec<CurvePoint>,
}

impl PolyLineBuilder {
    pub fn point(mut self, x: f64, y: f64) -> Self {
        self.points.push(CurvePoint { x, y });
        self
    }

    /// Step at `x`: `before` up to `x`, `after` from `x + EPSILON`
    pub fn jump(mut self, x: f64, before: f64, after: f64) -> Self {
        self.points.push(CurvePoint { x, y: before });
        self.points.push(CurvePoint {
            x: x + EPSILON,
            y: after,
        });
        self
    }

    pub fn build(self) -> Result<PolyLine> {
        PolyLine::new(self.points)
    }
}
