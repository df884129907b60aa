//! Coordinator states and start/stop intent

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    #[default]
    Undefined,
    GoingRunning,
    Running,
    GoingStopped,
    Stopped,
    Error,
}

impl State {
    pub const ALL: [State; 6] = [
        State::Undefined,
        State::GoingRunning,
        State::Running,
        State::GoingStopped,
        State::Stopped,
        State::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Undefined => "UNDEFINED",
            State::GoingRunning => "GOING_RUNNING",
            State::Running => "RUNNING",
            State::GoingStopped => "GOING_STOPPED",
            State::Stopped => "STOPPED",
            State::Error => "ERROR",
        }
    }

    /// Numeric value published on the STATE_MACHINE channel
    pub fn value(&self) -> u8 {
        match self {
            State::Undefined => 0,
            State::GoingRunning => 1,
            State::Running => 2,
            State::GoingStopped => 3,
            State::Stopped => 4,
            State::Error => 5,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Start/stop intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StartStop {
    #[default]
    Undefined,
    Start,
    Stop,
}

impl StartStop {
    pub fn value(&self) -> f64 {
        match self {
            StartStop::Undefined => -1.0,
            StartStop::Start => 1.0,
            StartStop::Stop => 0.0,
        }
    }
}

/// Configured policy for the start/stop target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetMode {
    /// Follow the externally set intent
    #[default]
    Auto,
    #[serde(alias = "START")]
    ForceStart,
    #[serde(alias = "STOP")]
    ForceStop,
}

impl TargetMode {
    /// Resolve the effective target from the stored intent
    pub fn resolve(&self, intent: StartStop) -> StartStop {
        match self {
            TargetMode::Auto => intent,
            TargetMode::ForceStart => StartStop::Start,
            TargetMode::ForceStop => StartStop::Stop,
        }
    }
}
