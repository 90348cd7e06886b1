//! Playback engine on symphonia + rubato + cpal
//!
//! Each session owns a dedicated thread that holds the cpal stream (streams
//! are not `Send` on every platform). The thread waits for either the end of
//! the clip or a stop command, drops the stream and fires the finished
//! callback exactly once.
//!
//! `play` blocks until the clip is decoded and the stream is open, so the
//! controller calls it from the blocking pool.

use crate::audio::{decode_file, resample, OutputDevice, PlaybackCursor, CLIP_CHANNELS};
use crate::error::{Error, Result};
use crate::playback::engine::{AudioPlayer, AudioSession, FinishedCallback, StopReason};
use cpal::traits::StreamTrait;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, error};

enum SessionCommand {
    Stop(StopReason),
    Finished,
}

/// Real audio output
#[derive(Debug, Default)]
pub struct CpalPlayer;

impl CpalPlayer {
    pub fn new() -> Self {
        Self
    }
}

impl AudioPlayer for CpalPlayer {
    fn play(
        &self,
        path: &Path,
        loop_count: i32,
        volume: f32,
        on_finished: FinishedCallback,
    ) -> Result<Box<dyn AudioSession>> {
        let path = path.to_path_buf();
        let (command_tx, command_rx) = mpsc::channel::<SessionCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<Arc<PlaybackCursor>>>();
        let finished_tx = command_tx.clone();

        thread::Builder::new()
            .name("herald-session".to_string())
            .spawn(move || {
                session_thread(path, loop_count, volume, on_finished, command_rx, finished_tx, ready_tx)
            })
            .map_err(|e| Error::Playback(format!("Failed to spawn session thread: {}", e)))?;

        let cursor = ready_rx
            .recv()
            .map_err(|_| Error::Playback("Session thread exited during startup".to_string()))??;

        Ok(Box::new(CpalSession {
            cursor,
            commands: Mutex::new(command_tx),
        }))
    }
}

fn session_thread(
    path: PathBuf,
    loop_count: i32,
    volume: f32,
    on_finished: FinishedCallback,
    commands: mpsc::Receiver<SessionCommand>,
    finished_tx: mpsc::Sender<SessionCommand>,
    ready: mpsc::Sender<Result<Arc<PlaybackCursor>>>,
) {
    let opened = (|| -> Result<_> {
        let clip = decode_file(&path)?;
        let device = OutputDevice::open_default()?;
        let samples = resample(&clip.samples, clip.sample_rate, device.sample_rate(), CLIP_CHANNELS)?;
        let cursor = Arc::new(PlaybackCursor::new(samples, loop_count, volume));

        let stream = device.build_stream(cursor.clone(), move || {
            let _ = finished_tx.send(SessionCommand::Finished);
        })?;
        stream
            .play()
            .map_err(|e| Error::Playback(format!("Failed to start stream: {}", e)))?;
        Ok((stream, cursor))
    })();

    let (stream, cursor) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            error!("Cannot play {}: {}", path.display(), e);
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(cursor.clone()));
    debug!("Session started: {}", path.display());

    let reason = if cursor.is_finished() {
        StopReason::PlayOver
    } else {
        match commands.recv() {
            Ok(SessionCommand::Stop(reason)) => reason,
            Ok(SessionCommand::Finished) => StopReason::PlayOver,
            // Every handle dropped without an explicit stop
            Err(_) => StopReason::ForceOver,
        }
    };

    cursor.set_paused(true);
    drop(stream);
    debug!("Session ended ({:?}): {}", reason, path.display());
    on_finished(reason);
}

/// Handle for a session running on its own thread
struct CpalSession {
    cursor: Arc<PlaybackCursor>,
    commands: Mutex<mpsc::Sender<SessionCommand>>,
}

impl CpalSession {
    fn send(&self, command: SessionCommand) {
        if let Ok(tx) = self.commands.lock() {
            // Session thread already gone means the session already ended
            let _ = tx.send(command);
        }
    }
}

impl AudioSession for CpalSession {
    fn pause(&self) {
        self.cursor.set_paused(true);
    }

    fn resume(&self) {
        self.cursor.set_paused(false);
    }

    fn paused(&self) -> bool {
        self.cursor.is_paused()
    }

    fn set_volume(&self, volume: f32) {
        self.cursor.set_volume(volume);
    }

    fn stop(&self, reason: StopReason) {
        self.send(SessionCommand::Stop(reason));
    }
}

impl Drop for CpalSession {
    fn drop(&mut self) {
        self.send(SessionCommand::Stop(StopReason::ForceOver));
    }
}
