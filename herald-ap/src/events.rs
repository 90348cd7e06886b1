//! Controller events
//!
//! Published on a broadcast channel and streamed to SSE clients.

use crate::playback::engine::StopReason;
use crate::playback::state::{ControlState, TempKind};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Something observable happened inside the controller
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ControllerEvent {
    StateChanged {
        old: ControlState,
        new: ControlState,
        timestamp: DateTime<Utc>,
    },
    BillInstalled {
        name: String,
        version: String,
        slots: usize,
        timestamp: DateTime<Utc>,
    },
    TempStarted {
        kind: TempKind,
        priority: u8,
        timestamp: DateTime<Utc>,
    },
    TempEnded {
        kind: TempKind,
        reason: StopReason,
        timestamp: DateTime<Utc>,
    },
    ProgramStarted {
        start: String,
        end: String,
        timestamp: DateTime<Utc>,
    },
    ProgramEnded {
        start: String,
        end: String,
        timestamp: DateTime<Utc>,
    },
}

impl ControllerEvent {
    /// SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            ControllerEvent::StateChanged { .. } => "StateChanged",
            ControllerEvent::BillInstalled { .. } => "BillInstalled",
            ControllerEvent::TempStarted { .. } => "TempStarted",
            ControllerEvent::TempEnded { .. } => "TempEnded",
            ControllerEvent::ProgramStarted { .. } => "ProgramStarted",
            ControllerEvent::ProgramEnded { .. } => "ProgramEnded",
        }
    }
}
