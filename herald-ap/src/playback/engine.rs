//! Playback engine capability
//!
//! The controller never decodes audio itself. It starts sessions through an
//! [`AudioPlayer`] and drives them through the returned [`AudioSession`]
//! handle. Every session reports its end exactly once through the callback
//! passed to [`AudioPlayer::play`], possibly from an audio thread.

use crate::error::Result;
use serde::Serialize;
use std::path::Path;

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// All loops played through
    PlayOver,
    /// Duration limit elapsed
    TimeOver,
    /// Stopped by the controller
    ForceOver,
}

impl StopReason {
    /// True for the natural end of a session
    pub fn is_natural(self) -> bool {
        self == StopReason::PlayOver
    }
}

/// Completion notification, fired once per session
pub type FinishedCallback = Box<dyn FnOnce(StopReason) + Send + 'static>;

/// Handle to one live playback session
///
/// All methods are idempotent; calling them after the session ended is a
/// no-op.
pub trait AudioSession: Send + Sync {
    fn pause(&self);
    fn resume(&self);
    fn paused(&self) -> bool;

    /// Linear gain, 0.0..=1.0
    fn set_volume(&self, volume: f32);

    /// End the session, reporting `reason` to the finished callback
    fn stop(&self, reason: StopReason);
}

/// Something that can start playback sessions
pub trait AudioPlayer: Send + Sync {
    /// Start playing `path`
    ///
    /// `loop_count` is the number of passes; negative loops until stopped.
    /// `volume` is linear gain 0.0..=1.0.
    fn play(
        &self,
        path: &Path,
        loop_count: i32,
        volume: f32,
        on_finished: FinishedCallback,
    ) -> Result<Box<dyn AudioSession>>;
}
