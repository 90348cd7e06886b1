//! Playback control
//!
//! - [`engine`]: the playback-engine capability the controller drives
//! - [`cpal_player`]: the real engine on the system audio device
//! - [`controller`]: the state machine owning program and temporary sessions
//! - [`state`]: state tags and preemption priority

pub mod controller;
pub mod cpal_player;
pub mod engine;
pub mod state;

pub use controller::{Controller, ControllerConfig, ControllerStatus, Dependencies};
pub use cpal_player::CpalPlayer;
pub use engine::{AudioPlayer, AudioSession, FinishedCallback, StopReason};
pub use state::{ControlState, Priority, TempKind};
