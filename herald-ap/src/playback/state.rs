//! Controller state tags and preemption priority

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;

/// Controller state machine tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlState {
    Stopped,
    /// Started, no active session
    Running,
    ProgramPlaying,
    Paused,
    TempPlaying,
    InnerPlaying,
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControlState::Stopped => "stopped",
            ControlState::Running => "running",
            ControlState::ProgramPlaying => "program_playing",
            ControlState::Paused => "paused",
            ControlState::TempPlaying => "temp_playing",
            ControlState::InnerPlaying => "inner_playing",
        };
        f.write_str(s)
    }
}

/// Kind of priority-preemptible session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TempKind {
    /// Caller-supplied file
    Temp,
    /// Built-in clip
    Inner,
}

impl TempKind {
    /// State tag while a session of this kind is active
    pub fn state(self) -> ControlState {
        match self {
            TempKind::Temp => ControlState::TempPlaying,
            TempKind::Inner => ControlState::InnerPlaying,
        }
    }
}

/// Preemption priority, 1 (most urgent) to 9 (least urgent / idle)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Priority(u8);

impl Priority {
    pub const MOST_URGENT: Priority = Priority(1);

    /// Held while no temporary session is active
    pub const IDLE: Priority = Priority(9);

    pub fn new(level: i64) -> Result<Self> {
        if (1..=9).contains(&level) {
            Ok(Priority(level as u8))
        } else {
            Err(Error::Validation(format!(
                "priority {} must be between 1 and 9",
                level
            )))
        }
    }

    pub fn level(self) -> u8 {
        self.0
    }

    /// A request may replace the active session unless the active one is
    /// strictly more urgent
    pub fn can_preempt(self, active: Priority) -> bool {
        self.0 <= active.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::IDLE
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
