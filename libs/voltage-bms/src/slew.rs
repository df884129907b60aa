//! Rate limiting for published limits

/// Which direction of change is rate-limited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelaxDirection {
    /// Increases are bounded, decreases apply at once (current limits,
    /// charge-max-voltage)
    #[default]
    Upward,
    /// Decreases are bounded, increases apply at once (discharge-min-voltage)
    Downward,
}

/// Bounds the per-cycle relaxation of a limit
///
/// A limit may tighten instantly but relax by at most `rate * dt` per cycle.
/// Without a configured rate the target passes through unchanged.
#[derive(Debug, Clone)]
pub struct SlewRateLimiter {
    rate: Option<f64>,
    direction: RelaxDirection,
    initial: f64,
    last: Option<f64>,
}

impl SlewRateLimiter {
    pub fn new(rate: Option<f64>) -> Self {
        Self {
            rate,
            direction: RelaxDirection::Upward,
            initial: 0.0,
            last: None,
        }
    }

    pub fn with_direction(mut self, direction: RelaxDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Value the first ramp starts from
    pub fn with_initial(mut self, initial: f64) -> Self {
        self.initial = initial;
        self
    }

    pub fn rate(&self) -> Option<f64> {
        self.rate
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }

    /// Furthest value reachable this cycle, `None` when unlimited
    pub fn bound(&self, dt: f64) -> Option<f64> {
        let rate = self.rate?;
        let dt = if dt.is_nan() || dt < 0.0 { 0.0 } else { dt };
        let base = self.last.unwrap_or(self.initial);
        Some(match self.direction {
            RelaxDirection::Upward => base + rate * dt,
            RelaxDirection::Downward => base - rate * dt,
        })
    }

    /// Apply the limiter to `target` and remember the published value
    pub fn apply(&mut self, target: f64, dt: f64) -> f64 {
        let value = match self.bound(dt) {
            Some(bound) => match self.direction {
                RelaxDirection::Upward => target.min(bound),
                RelaxDirection::Downward => target.max(bound),
            },
            None => target,
        };
        self.last = Some(value);
        value
    }

    /// Restart ramping from `value`
    pub fn reanchor(&mut self, value: f64) {
        self.last = Some(value);
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
