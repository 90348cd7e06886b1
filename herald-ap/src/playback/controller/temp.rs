//! Temporary (caller-initiated) and built-in sessions
//!
//! A temporary session pauses the program session, plays, and on its natural
//! end resumes the program. Requests carry a priority level (1 most urgent);
//! a request may replace the active temporary session only when its level is
//! numerically less than or equal to the active one.

use super::{Controller, Inner, TempSession};
use crate::error::{Error, Result};
use crate::events::ControllerEvent;
use crate::fetch::fetch_file;
use crate::playback::engine::{FinishedCallback, StopReason};
use crate::playback::state::{Priority, TempKind};
use chrono::Utc;
use herald_common::MusicFile;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// File name of built-in clip `index`
pub fn inner_clip_name(index: u32) -> String {
    format!("inner_tip{}.mp3", index)
}

impl Inner {
    fn check_preemption(&self, requested: Priority) -> Result<()> {
        let active = self.temp.is_some() || self.temp_pending > 0;
        if active && !requested.can_preempt(self.priority) {
            return Err(Error::PreemptedByHigherPriority {
                active: self.priority.level(),
                requested: requested.level(),
            });
        }
        Ok(())
    }

    fn take_temp(&mut self, id: u64) -> Option<TempSession> {
        if self.temp.as_ref().map(|t| t.id) == Some(id) {
            self.temp.take()
        } else {
            None
        }
    }
}

impl Controller {
    /// Play a caller-supplied file, downloading it first when needed
    ///
    /// `limit` caps the session length; `None` or zero plays until the file
    /// has looped `play_times` times.
    pub async fn play_temp(
        &self,
        file: MusicFile,
        priority: i64,
        limit: Option<Duration>,
    ) -> Result<()> {
        file.local_file_name()?;
        self.start_temp(TempKind::Temp, file, priority, limit).await
    }

    /// Play built-in clip `index` once
    pub async fn play_inner(
        &self,
        priority: i64,
        index: i64,
        limit: Option<Duration>,
    ) -> Result<()> {
        let index = u32::try_from(index)
            .map_err(|_| Error::Validation(format!("clip index {} is out of range", index)))?;
        let file = MusicFile::local(inner_clip_name(index), -1);
        self.start_temp(TempKind::Inner, file, priority, limit).await
    }

    async fn start_temp(
        &self,
        kind: TempKind,
        file: MusicFile,
        priority: i64,
        limit: Option<Duration>,
    ) -> Result<()> {
        let priority = Priority::new(priority)?;
        {
            let inner = self.inner.lock().await;
            inner.check_enabled()?;
            inner.check_preemption(priority)?;
        }

        // Download outside the lock; the checks are repeated afterwards
        let path = self.ensure_local(&file).await?;

        // Reserve the slot, then open the engine without the lock
        let (id, volume, paused_program) = {
            let mut inner = self.inner.lock().await;
            inner.check_enabled()?;
            inner.check_preemption(priority)?;

            let paused_program = match &inner.program {
                Some(program) if !program.session.paused() => {
                    program.session.pause();
                    true
                }
                _ => false,
            };
            if let Some(old) = inner.temp.take() {
                info!(
                    "{:?} session (level {}) preempted by level {}",
                    old.kind, old.priority, priority
                );
                self.end_temp_forced(old, StopReason::ForceOver);
            }
            inner.temp_pending += 1;
            inner.priority = priority;
            (inner.next_id(), inner.volume, paused_program)
        };
        if paused_program {
            tokio::time::sleep(self.config.settle_delay).await;
        }

        let on_finished = self.temp_finished_callback(id);
        let opened = self
            .open_session(path.clone(), file.effective_play_times(), volume, on_finished)
            .await;

        let mut inner = self.inner.lock().await;
        inner.temp_pending -= 1;
        let checked = inner
            .check_enabled()
            .and_then(|_| inner.check_preemption(priority));
        let opened = match (opened, checked) {
            (Ok(session), Err(e)) => {
                // Completion of a session never installed is ignored
                session.stop(StopReason::ForceOver);
                Err(e)
            }
            (opened, _) => opened,
        };

        match opened {
            Ok(session) => {
                if let Some(old) = inner.temp.take() {
                    info!(
                        "{:?} session (level {}) preempted by level {}",
                        old.kind, old.priority, priority
                    );
                    self.end_temp_forced(old, StopReason::ForceOver);
                }
                session.set_volume(inner.volume);
                let timer = limit
                    .filter(|d| !d.is_zero())
                    .map(|d| self.spawn_expiry_timer(id, d));
                inner.temp = Some(TempSession {
                    id,
                    kind,
                    priority,
                    session,
                    timer,
                });
                inner.priority = priority;
                inner.paused = false;
                self.set_state(&mut inner, kind.state());

                info!(
                    "{:?} session started: {} (level {}, limit {:?})",
                    kind,
                    path.display(),
                    priority,
                    limit
                );
                self.emit(ControllerEvent::TempStarted {
                    kind,
                    priority: priority.level(),
                    timestamp: Utc::now(),
                });
                Ok(())
            }
            Err(e) => {
                error!("Failed to start {:?} session {}: {}", kind, path.display(), e);
                if inner.temp.is_none() && inner.temp_pending == 0 {
                    inner.priority = Priority::IDLE;
                    if paused_program && !inner.paused {
                        if let Some(program) = &inner.program {
                            program.session.resume();
                        }
                    }
                }
                let state = inner.settled_state();
                self.set_state(&mut inner, state);
                drop(inner);
                self.changed.notify_waiters();
                Err(e)
            }
        }
    }

    /// Local path for `file`, downloading it when absent
    async fn ensure_local(&self, file: &MusicFile) -> Result<PathBuf> {
        let path = self.local_path(file)?;
        if path.exists() {
            return Ok(path);
        }
        if file.url().is_none() {
            return Err(Error::Playback(format!(
                "file {} not found",
                path.display()
            )));
        }
        info!("Fetching [{}] before playback", file.name);
        fetch_file(self.fetcher.as_ref(), file, &path).await?;
        Ok(path)
    }

    fn temp_finished_callback(&self, id: u64) -> FinishedCallback {
        let weak = self.weak_self.clone();
        let runtime = self.runtime.clone();
        Box::new(move |reason| {
            if let Some(controller) = weak.upgrade() {
                runtime.spawn(async move { controller.on_temp_finished(id, reason).await });
            }
        })
    }

    fn spawn_expiry_timer(&self, id: u64, limit: Duration) -> JoinHandle<()> {
        let weak = self.weak_self.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(limit).await;
            if let Some(controller) = weak.upgrade() {
                controller.expire_temp(id).await;
            }
        })
    }

    /// Engine reported the end of temporary session `id`
    async fn on_temp_finished(&self, id: u64, reason: StopReason) {
        let resume = {
            let mut inner = self.inner.lock().await;
            let Some(mut temp) = inner.take_temp(id) else {
                debug!("Completion for replaced session {} ignored", id);
                return;
            };
            if let Some(timer) = temp.timer.take() {
                timer.abort();
            }
            if inner.temp_pending == 0 {
                inner.priority = Priority::IDLE;
            }
            info!("{:?} session ended: {:?}", temp.kind, reason);
            self.emit(ControllerEvent::TempEnded {
                kind: temp.kind,
                reason,
                timestamp: Utc::now(),
            });

            let resume = reason.is_natural()
                && inner
                    .program
                    .as_ref()
                    .map(|p| p.session.paused())
                    .unwrap_or(false);
            if !resume {
                let state = inner.settled_state();
                self.set_state(&mut inner, state);
            }
            resume
        };

        if resume {
            tokio::time::sleep(self.config.settle_delay).await;
            let mut inner = self.inner.lock().await;
            // A new temporary session or a user pause may have arrived
            if inner.temp.is_none() && inner.temp_pending == 0 && !inner.paused {
                if let Some(program) = &inner.program {
                    program.session.resume();
                    debug!("Program session resumed");
                }
            }
            let state = inner.settled_state();
            self.set_state(&mut inner, state);
        }
        self.changed.notify_waiters();
    }

    /// Duration limit of temporary session `id` elapsed
    ///
    /// The program session stays paused.
    async fn expire_temp(&self, id: u64) {
        {
            let mut inner = self.inner.lock().await;
            let Some(mut temp) = inner.take_temp(id) else {
                return;
            };
            // This task is the timer
            temp.timer = None;
            info!("{:?} session reached its duration limit", temp.kind);
            if inner.temp_pending == 0 {
                inner.priority = Priority::IDLE;
            }
            self.end_temp_forced(temp, StopReason::TimeOver);
            let state = inner.settled_state();
            self.set_state(&mut inner, state);
        }
        self.changed.notify_waiters();
    }

    /// End a session already removed from `Inner`
    pub(super) fn end_temp_forced(&self, mut temp: TempSession, reason: StopReason) {
        if let Some(timer) = temp.timer.take() {
            timer.abort();
        }
        temp.session.stop(reason);
        self.emit(ControllerEvent::TempEnded {
            kind: temp.kind,
            reason,
            timestamp: Utc::now(),
        });
    }
}
