//! Program loop and the stop-program protocol

use super::{Controller, Inner, ProgramSession};
use crate::error::{Error, Result};
use crate::events::ControllerEvent;
use crate::fetch::fetch_file;
use crate::playback::engine::{FinishedCallback, StopReason};
use crate::playback::state::ControlState;
use chrono::Utc;
use herald_common::{next_file_index, Bill, PlayMode, Program};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// How long a cycling slot with nothing playable waits before retrying
const IDLE_RETRY: Duration = Duration::from_secs(5);

enum FileOutcome {
    Played,
    Skipped,
    Stopped,
}

impl Inner {
    fn program_should_stop(&self, loop_id: u64) -> bool {
        self.stop_barrier.is_some()
            || !self.started
            || !self.enabled
            || self.program_loop != Some(loop_id)
    }

    /// A temporary session or a user pause holds the next program file
    fn program_held(&self) -> bool {
        self.temp.is_some() || self.temp_pending > 0 || self.paused
    }
}

impl Controller {
    /// Play slot `slot_idx` of `bill` until the slot ends or is stopped
    ///
    /// Ignored when a program loop is already active, when the controller is
    /// not started, or when `bill` is no longer the installed bill.
    pub(super) async fn run_program(&self, bill: Arc<Bill>, slot_idx: usize) {
        let Some(program) = bill.slots.get(slot_idx) else {
            warn!("Slot {} does not exist in bill '{}'", slot_idx, bill.name);
            return;
        };

        let loop_id = {
            let mut inner = self.inner.lock().await;
            if !inner.enabled || !inner.started {
                debug!("Not started, slot {} ignored", program.window());
                return;
            }
            if !Arc::ptr_eq(&inner.bill, &bill) {
                debug!("Bill replaced, slot {} ignored", program.window());
                return;
            }
            if inner.program_loop.is_some() || inner.stop_barrier.is_some() {
                debug!("Program already active, slot {} ignored", program.window());
                return;
            }
            let id = inner.next_id();
            inner.program_loop = Some(id);
            let state = inner.settled_state();
            self.set_state(&mut inner, state);
            id
        };

        info!(
            "Program {} started ({} files, {:?}, {:?})",
            program.window(),
            program.files.len(),
            program.play_order,
            program.play_mode
        );
        self.emit(ControllerEvent::ProgramStarted {
            start: program.start().to_string(),
            end: program.end().to_string(),
            timestamp: Utc::now(),
        });

        let count = program.files.len();
        'slot: loop {
            let mut previous = None;
            let mut played = 0usize;

            for _ in 0..count {
                let idx = next_file_index(program.play_order, previous, count);
                previous = Some(idx);
                match self.play_program_file(loop_id, &bill, slot_idx, idx).await {
                    FileOutcome::Played => {
                        played += 1;
                        tokio::time::sleep(self.config.settle_delay).await;
                    }
                    FileOutcome::Skipped => {}
                    FileOutcome::Stopped => break 'slot,
                }
            }

            if program.play_mode == PlayMode::Once {
                break;
            }
            if played == 0 && !self.idle_wait(loop_id, IDLE_RETRY).await {
                break;
            }
            if self.inner.lock().await.program_should_stop(loop_id) {
                break;
            }
        }

        self.finish_program(loop_id, program).await;
    }

    /// Play one file to completion
    async fn play_program_file(
        &self,
        loop_id: u64,
        bill: &Arc<Bill>,
        slot_idx: usize,
        file_idx: usize,
    ) -> FileOutcome {
        let file = &bill.slots[slot_idx].files[file_idx];
        if file.is_downloading() {
            debug!("File [{}] still downloading, skipped", file.name);
            return FileOutcome::Skipped;
        }
        let path = match self.local_path(file) {
            Ok(path) => path,
            Err(e) => {
                warn!("File [{}] skipped: {}", file.name, e);
                return FileOutcome::Skipped;
            }
        };
        if !path.exists() {
            if file.url().is_some() {
                info!("File [{}] not present, downloading in background", file.name);
                self.spawn_background_fetch(bill.clone(), slot_idx, file_idx, path);
            } else {
                warn!("File {} missing, skipped", path.display());
            }
            return FileOutcome::Skipped;
        }

        // Wait out any temporary session or user pause, then start
        let (session_id, mut finished) = loop {
            let notified = self.changed.notified();
            let volume = {
                let inner = self.inner.lock().await;
                if inner.program_should_stop(loop_id) {
                    return FileOutcome::Stopped;
                }
                (!inner.program_held()).then_some(inner.volume)
            };
            let Some(volume) = volume else {
                notified.await;
                continue;
            };

            let (tx, rx) = oneshot::channel();
            let on_finished: FinishedCallback = Box::new(move |reason| {
                let _ = tx.send(reason);
            });
            let session = match self
                .open_session(path.clone(), file.effective_play_times(), volume, on_finished)
                .await
            {
                Ok(session) => session,
                Err(e) => {
                    error!("Failed to play {}: {}", path.display(), e);
                    return FileOutcome::Skipped;
                }
            };

            // Anything may have happened while the engine was opening
            let mut inner = self.inner.lock().await;
            if inner.program_should_stop(loop_id) {
                session.stop(StopReason::ForceOver);
                return FileOutcome::Stopped;
            }
            if inner.program_held() {
                debug!("Program file {} held while opening", path.display());
                session.stop(StopReason::ForceOver);
                continue;
            }
            session.set_volume(inner.volume);
            let id = inner.next_id();
            inner.program = Some(ProgramSession { id, session });
            self.set_state(&mut inner, ControlState::ProgramPlaying);
            break (id, rx);
        };
        debug!("Playing program file {}", path.display());

        loop {
            let notified = self.changed.notified();
            {
                let mut inner = self.inner.lock().await;
                if inner.program_should_stop(loop_id) {
                    if let Some(program) = inner.program.take() {
                        program.session.stop(StopReason::ForceOver);
                    }
                    return FileOutcome::Stopped;
                }
            }

            tokio::select! {
                reason = &mut finished => {
                    let reason = reason.unwrap_or(StopReason::ForceOver);
                    debug!("Program file {} ended: {:?}", path.display(), reason);
                    let mut inner = self.inner.lock().await;
                    if inner.program.as_ref().map(|p| p.id) == Some(session_id) {
                        inner.program = None;
                    }
                    return if inner.program_should_stop(loop_id) {
                        FileOutcome::Stopped
                    } else {
                        FileOutcome::Played
                    };
                }
                _ = notified => {}
            }
        }
    }

    /// Wait up to `timeout`; false when the loop should exit
    async fn idle_wait(&self, loop_id: u64, timeout: Duration) -> bool {
        let notified = self.changed.notified();
        if self.inner.lock().await.program_should_stop(loop_id) {
            return false;
        }
        debug!("Nothing playable in slot, retrying in {:?}", timeout);
        let _ = tokio::time::timeout(timeout, notified).await;
        !self.inner.lock().await.program_should_stop(loop_id)
    }

    async fn finish_program(&self, loop_id: u64, program: &Program) {
        {
            let mut inner = self.inner.lock().await;
            if let Some(session) = inner.program.take() {
                session.session.stop(StopReason::ForceOver);
            }
            if inner.program_loop == Some(loop_id) {
                inner.program_loop = None;
            }
            if inner.temp.is_none() {
                inner.paused = false;
            }
            match inner.stop_barrier.take() {
                Some(barrier) => {
                    let _ = barrier.send(());
                }
                None => {
                    let state = inner.settled_state();
                    self.set_state(&mut inner, state);
                }
            }
        }
        self.changed.notify_waiters();

        info!("Program {} ended", program.window());
        self.emit(ControllerEvent::ProgramEnded {
            start: program.start().to_string(),
            end: program.end().to_string(),
            timestamp: Utc::now(),
        });
    }

    fn spawn_background_fetch(
        &self,
        bill: Arc<Bill>,
        slot_idx: usize,
        file_idx: usize,
        dest: PathBuf,
    ) {
        let fetcher = self.fetcher.clone();
        self.runtime.spawn(async move {
            let file = &bill.slots[slot_idx].files[file_idx];
            if let Err(e) = fetch_file(fetcher.as_ref(), file, &dest).await {
                error!("Background download of [{}] failed: {}", file.name, e);
            }
        });
    }

    /// Stop the running program loop and wait until it has exited
    ///
    /// Returns immediately when no program is active. A second request
    /// while one is pending fails with [`Error::StopAlreadyInProgress`].
    pub async fn stop_program(&self) -> Result<()> {
        let barrier = {
            let mut inner = self.inner.lock().await;
            if inner.program_loop.is_none() {
                return Ok(());
            }
            if inner.stop_barrier.is_some() {
                return Err(Error::StopAlreadyInProgress);
            }
            let (tx, rx) = oneshot::channel();
            inner.stop_barrier = Some(tx);
            if let Some(program) = &inner.program {
                program.session.stop(StopReason::ForceOver);
            }
            rx
        };
        self.changed.notify_waiters();

        debug!("Waiting for program loop to exit");
        let _ = barrier.await;

        let mut inner = self.inner.lock().await;
        let state = inner.settled_state();
        self.set_state(&mut inner, state);
        info!("Program stopped");
        Ok(())
    }

    /// Stop the program, waiting out a stop already in flight
    pub(super) async fn stop_program_or_wait(&self) {
        loop {
            let notified = self.changed.notified();
            match self.stop_program().await {
                Err(Error::StopAlreadyInProgress) => {
                    if self.inner.lock().await.program_loop.is_none() {
                        return;
                    }
                    notified.await;
                }
                Err(e) => {
                    warn!("Stopping program: {}", e);
                    return;
                }
                Ok(()) => return,
            }
        }
    }
}
