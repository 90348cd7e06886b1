//! Playback controller
//!
//! Owns the installed bill, at most one program session and at most one
//! temporary (caller-initiated, priority-preemptible) session. Scheduler
//! triggers, inbound commands and engine completion callbacks all call in
//! concurrently; every transition happens under the single `inner` lock.
//!
//! Long waits (a program file playing, a stop barrier, the settle delay)
//! drop the lock and wait on a oneshot, a timer or the `changed` notifier.
//! Engine sessions are opened on the blocking pool without the lock; the
//! caller re-checks its preconditions before installing the new session. Lifecycle operations
//! (`set_bill`, `start`, `stop`, `reset`, `set_enable`) are additionally
//! serialized by the `lifecycle` lock so they never interleave while a stop
//! barrier is pending.

mod program;
mod temp;

use crate::db::SettingsStore;
use crate::error::{Error, Result};
use crate::events::ControllerEvent;
use crate::fetch::ContentFetch;
use crate::playback::engine::{AudioPlayer, AudioSession, FinishedCallback, StopReason};
use crate::playback::state::{ControlState, Priority, TempKind};
use crate::schedule::Scheduler;
use chrono::Utc;
use herald_common::{Bill, MusicFile};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot, Mutex, MutexGuard, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Pause before re-commanding a session that was just paused
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(50);

/// Controller tuning
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Directory holding local and downloaded audio files
    pub files_path: PathBuf,
    pub settle_delay: Duration,
    /// Startup volume, 0..=100
    pub default_volume: u8,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            files_path: PathBuf::from("."),
            settle_delay: DEFAULT_SETTLE_DELAY,
            default_volume: 100,
        }
    }
}

/// Collaborators the controller drives
pub struct Dependencies {
    pub player: Arc<dyn AudioPlayer>,
    pub scheduler: Arc<dyn Scheduler>,
    pub fetcher: Arc<dyn ContentFetch>,
    pub settings: SettingsStore,
}

/// Point-in-time view for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub state: ControlState,
    pub enabled: bool,
    pub started: bool,
    pub priority: u8,
    /// 0..=100
    pub volume: u8,
    pub temp: Option<TempKind>,
    pub bill_name: String,
    pub bill_version: String,
    pub slots: usize,
}

struct ProgramSession {
    id: u64,
    session: Box<dyn AudioSession>,
}

struct TempSession {
    id: u64,
    kind: TempKind,
    priority: Priority,
    session: Box<dyn AudioSession>,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    enabled: bool,
    started: bool,
    state: ControlState,
    bill: Arc<Bill>,
    /// Linear gain, 0.0..=1.0
    volume: f32,
    program: Option<ProgramSession>,
    /// Id of the running program loop
    program_loop: Option<u64>,
    temp: Option<TempSession>,
    /// Temporary sessions being opened by the engine outside the lock
    temp_pending: u32,
    /// Priority of the active or opening temporary session, IDLE when none
    priority: Priority,
    /// Set by `pause`, cleared by `resume`; holds the program between files
    paused: bool,
    /// Armed by the stop-program protocol, released by the program loop
    stop_barrier: Option<oneshot::Sender<()>>,
    next_id: u64,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// State implied by the live sessions
    fn settled_state(&self) -> ControlState {
        if let Some(temp) = &self.temp {
            return if temp.session.paused() {
                ControlState::Paused
            } else {
                temp.kind.state()
            };
        }
        if let Some(program) = &self.program {
            return if program.session.paused() {
                ControlState::Paused
            } else {
                ControlState::ProgramPlaying
            };
        }
        if self.program_loop.is_some() && self.stop_barrier.is_none() {
            return if self.paused {
                ControlState::Paused
            } else {
                ControlState::ProgramPlaying
            };
        }
        if self.started {
            ControlState::Running
        } else {
            ControlState::Stopped
        }
    }

    fn check_enabled(&self) -> Result<()> {
        if self.enabled {
            Ok(())
        } else {
            Err(Error::FeatureDisabled)
        }
    }
}

/// The playback control core
pub struct Controller {
    player: Arc<dyn AudioPlayer>,
    scheduler: Arc<dyn Scheduler>,
    fetcher: Arc<dyn ContentFetch>,
    settings: SettingsStore,
    config: ControllerConfig,
    inner: Mutex<Inner>,
    lifecycle: Mutex<()>,
    changed: Notify,
    events: broadcast::Sender<ControllerEvent>,
    runtime: Handle,
    weak_self: Weak<Controller>,
}

impl Controller {
    /// Build a controller with `bill` installed and its triggers registered
    ///
    /// The controller starts in `Stopped`; call [`Controller::start`] to run
    /// the schedule. Must be called from within a tokio runtime.
    pub fn new(
        deps: Dependencies,
        config: ControllerConfig,
        mut bill: Bill,
        enabled: bool,
    ) -> Result<Arc<Self>> {
        bill.validate()?;
        let bill = Arc::new(bill);
        let runtime = Handle::try_current()
            .map_err(|e| Error::Config(format!("controller requires a tokio runtime: {}", e)))?;
        let (events, _) = broadcast::channel(100);
        let volume = config.default_volume.min(100) as f32 / 100.0;

        let controller = Arc::new_cyclic(|weak_self| Controller {
            player: deps.player,
            scheduler: deps.scheduler,
            fetcher: deps.fetcher,
            settings: deps.settings,
            config,
            inner: Mutex::new(Inner {
                enabled,
                started: false,
                state: ControlState::Stopped,
                bill: bill.clone(),
                volume,
                program: None,
                program_loop: None,
                temp: None,
                temp_pending: 0,
                priority: Priority::IDLE,
                paused: false,
                stop_barrier: None,
                next_id: 0,
            }),
            lifecycle: Mutex::new(()),
            changed: Notify::new(),
            events,
            runtime,
            weak_self: weak_self.clone(),
        });

        controller.install_triggers(&bill);
        info!(
            "Controller ready with bill '{}' ({} slots), enabled={}",
            bill.name,
            bill.slots.len(),
            enabled
        );
        Ok(controller)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Validate, optionally persist, and install a new bill
    ///
    /// Returns only after any program session of the old bill has fully
    /// stopped.
    pub async fn set_bill(&self, mut bill: Bill, persist: bool) -> Result<()> {
        self.lock_enabled().await?;
        bill.validate()?;

        let _lifecycle = self.lifecycle.lock().await;
        if persist {
            self.settings.save_bill(&bill).await?;
        }
        self.install_bill(bill).await
    }

    /// Start running the schedule
    pub async fn start(&self) -> Result<()> {
        self.lock_enabled().await?;
        let _lifecycle = self.lifecycle.lock().await;
        self.start_locked().await
    }

    /// Stop the schedule and every session
    pub async fn stop(&self) -> Result<()> {
        self.lock_enabled().await?;
        let _lifecycle = self.lifecycle.lock().await;
        self.shutdown_locked().await
    }

    /// Stop regardless of the enable flag (process exit)
    pub async fn shutdown(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.shutdown_locked().await
    }

    /// Persist the enable flag and start or stop accordingly
    pub async fn set_enable(&self, enable: bool) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.settings.save_enable(enable).await?;
        self.inner.lock().await.enabled = enable;
        info!("Appliance {}", if enable { "enabled" } else { "disabled" });

        let result = if enable {
            self.start_locked().await
        } else {
            self.shutdown_locked().await
        };
        match result {
            Ok(()) | Err(Error::AlreadyRunning) | Err(Error::AlreadyStopped) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Stop the program, drop every trigger and install the empty bill
    pub async fn reset(&self) -> Result<()> {
        self.lock_enabled().await?;
        let _lifecycle = self.lifecycle.lock().await;

        let bill = Bill::empty();
        self.settings.save_bill(&bill).await?;
        self.install_bill(bill).await?;
        info!("Controller reset to the empty bill");
        Ok(())
    }

    async fn start_locked(&self) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            if inner.started {
                return Err(Error::AlreadyRunning);
            }
            inner.started = true;
            let state = inner.settled_state();
            self.set_state(&mut inner, state);
        }
        self.scheduler.start();
        info!("Controller started");
        self.spawn_current_program().await;
        Ok(())
    }

    async fn shutdown_locked(&self) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == ControlState::Stopped {
                return Err(Error::AlreadyStopped);
            }
            inner.started = false;
        }

        self.scheduler.stop();
        self.stop_program_or_wait().await;

        {
            let mut inner = self.inner.lock().await;
            if let Some(temp) = inner.temp.take() {
                self.end_temp_forced(temp, StopReason::ForceOver);
            }
            inner.priority = Priority::IDLE;
            inner.paused = false;
            self.set_state(&mut inner, ControlState::Stopped);
        }
        self.changed.notify_waiters();
        info!("Controller stopped");
        Ok(())
    }

    /// Swap in `bill`; lifecycle lock must be held
    async fn install_bill(&self, bill: Bill) -> Result<()> {
        self.scheduler.clear();
        self.stop_program_or_wait().await;

        let bill = Arc::new(bill);
        let started = {
            let mut inner = self.inner.lock().await;
            inner.bill = bill.clone();
            let state = inner.settled_state();
            self.set_state(&mut inner, state);
            inner.started
        };
        self.install_triggers(&bill);

        info!(
            "Installed bill '{}' version '{}' with {} slots",
            bill.name,
            bill.version,
            bill.slots.len()
        );
        self.emit(ControllerEvent::BillInstalled {
            name: bill.name.clone(),
            version: bill.version.clone(),
            slots: bill.slots.len(),
            timestamp: Utc::now(),
        });

        if started {
            self.scheduler.start();
            self.spawn_current_program().await;
        }
        Ok(())
    }

    /// One start trigger and one end trigger per slot
    fn install_triggers(&self, bill: &Arc<Bill>) {
        for (idx, program) in bill.slots.iter().enumerate() {
            let weak = self.weak_self.clone();
            let runtime = self.runtime.clone();
            self.scheduler.add_trigger_with(
                program.start(),
                idx,
                Arc::new(move |slot| {
                    if let Some(controller) = weak.upgrade() {
                        runtime.spawn(async move { controller.on_slot_start(slot).await });
                    }
                }),
            );

            let weak = self.weak_self.clone();
            let runtime = self.runtime.clone();
            self.scheduler.add_trigger(
                program.end(),
                Arc::new(move || {
                    if let Some(controller) = weak.upgrade() {
                        runtime.spawn(async move { controller.on_slot_end().await });
                    }
                }),
            );
        }
        debug!("Registered {} triggers", bill.slots.len() * 2);
    }

    async fn on_slot_start(&self, slot: usize) {
        let bill = {
            let inner = self.inner.lock().await;
            if !inner.enabled || !inner.started {
                return;
            }
            inner.bill.clone()
        };
        self.run_program(bill, slot).await;
    }

    async fn on_slot_end(&self) {
        debug!("Slot end trigger fired");
        if let Err(e) = self.stop_program().await {
            tracing::warn!("Slot end: {}", e);
        }
    }

    /// Start the slot covering "now", if any
    async fn spawn_current_program(&self) {
        let bill = self.inner.lock().await.bill.clone();
        let now = self.scheduler.now();
        match bill.current_program(now) {
            Some(idx) => {
                info!("Slot {} covers {}", bill.slots[idx].window(), now);
                self.spawn_program(bill, idx);
            }
            None => debug!("No slot covers {}", now),
        }
    }

    fn spawn_program(&self, bill: Arc<Bill>, slot: usize) {
        if let Some(controller) = self.weak_self.upgrade() {
            self.runtime
                .spawn(async move { controller.run_program(bill, slot).await });
        }
    }

    // ========================================================================
    // Session control
    // ========================================================================

    /// Pause the active session; temporary takes precedence over program
    pub async fn pause(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.check_enabled()?;
        if inner.state == ControlState::Paused {
            return Ok(());
        }

        if let Some(temp) = &inner.temp {
            temp.session.pause();
        } else if let Some(program) = &inner.program {
            program.session.pause();
        } else if inner.program_loop.is_some() && inner.stop_barrier.is_none() {
            debug!("Program between files, next file held");
        } else {
            debug!("Nothing playing, pause ignored");
            return Ok(());
        }
        inner.paused = true;
        self.set_state(&mut inner, ControlState::Paused);
        Ok(())
    }

    /// Resume whatever `pause` suspended; no-op unless paused
    pub async fn resume(&self) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            inner.check_enabled()?;
            if inner.state != ControlState::Paused {
                debug!("Not paused, resume ignored");
                return Ok(());
            }

            inner.paused = false;
            if let Some(temp) = &inner.temp {
                temp.session.resume();
            } else if let Some(program) = &inner.program {
                program.session.resume();
            }
            let state = inner.settled_state();
            self.set_state(&mut inner, state);
        }
        self.changed.notify_waiters();
        Ok(())
    }

    /// Set the volume in percent, clamped to 0..=100
    pub async fn set_volume(&self, percent: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.check_enabled()?;

        let percent = percent.clamp(0, 100);
        inner.volume = percent as f32 / 100.0;
        if let Some(program) = &inner.program {
            program.session.set_volume(inner.volume);
        }
        if let Some(temp) = &inner.temp {
            temp.session.set_volume(inner.volume);
        }
        info!("Volume set to {}%", percent);
        Ok(())
    }

    // ========================================================================
    // Observation
    // ========================================================================

    pub async fn state(&self) -> ControlState {
        self.inner.lock().await.state
    }

    pub async fn bill(&self) -> Arc<Bill> {
        self.inner.lock().await.bill.clone()
    }

    pub async fn status(&self) -> ControllerStatus {
        let inner = self.inner.lock().await;
        ControllerStatus {
            state: inner.state,
            enabled: inner.enabled,
            started: inner.started,
            priority: inner.priority.level(),
            volume: (inner.volume * 100.0).round() as u8,
            temp: inner.temp.as_ref().map(|t| t.kind),
            bill_name: inner.bill.name.clone(),
            bill_version: inner.bill.version.clone(),
            slots: inner.bill.slots.len(),
        }
    }

    /// Subscribe to controller events
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn lock_enabled(&self) -> Result<MutexGuard<'_, Inner>> {
        let inner = self.inner.lock().await;
        inner.check_enabled()?;
        Ok(inner)
    }

    fn set_state(&self, inner: &mut Inner, new: ControlState) {
        if inner.state == new {
            return;
        }
        let old = inner.state;
        inner.state = new;
        debug!("State {} -> {}", old, new);
        self.emit(ControllerEvent::StateChanged {
            old,
            new,
            timestamp: Utc::now(),
        });
    }

    fn emit(&self, event: ControllerEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn local_path(&self, file: &MusicFile) -> Result<PathBuf> {
        Ok(self.config.files_path.join(file.local_file_name()?))
    }

    /// Open an engine session on the blocking pool
    ///
    /// Engines may decode and open the device before returning, so this is
    /// never called with the `inner` lock held.
    async fn open_session(
        &self,
        path: PathBuf,
        loop_count: i32,
        volume: f32,
        on_finished: FinishedCallback,
    ) -> Result<Box<dyn AudioSession>> {
        let player = self.player.clone();
        tokio::task::spawn_blocking(move || player.play(&path, loop_count, volume, on_finished))
            .await
            .map_err(|e| Error::Playback(format!("engine task failed: {}", e)))?
    }
}
