//! Shared fixtures for controller and API integration tests
//!
//! - [`MockPlayer`]: records every session; tests end sessions by hand
//! - [`ManualScheduler`]: clock and triggers driven by the test
//! - [`MockFetcher`]: writes a placeholder file instead of downloading

#![allow(dead_code)]

use futures::future::BoxFuture;
use herald_ap::db::{initialize_database, SettingsStore};
use herald_ap::error::{Error, Result};
use herald_ap::fetch::ContentFetch;
use herald_ap::playback::{
    AudioPlayer, AudioSession, ControlState, Controller, ControllerConfig, Dependencies,
    FinishedCallback, StopReason,
};
use herald_ap::schedule::{Scheduler, TriggerCallback};
use herald_common::{Bill, TimeOfDay};
use sqlx::sqlite::SqlitePoolOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// Playback engine
// ============================================================================

/// Observable side of one scripted session
pub struct SessionState {
    pub path: PathBuf,
    pub loop_count: i32,
    paused: AtomicBool,
    volume: Mutex<f32>,
    callback: Mutex<Option<FinishedCallback>>,
    ended: Mutex<Option<StopReason>>,
}

impl SessionState {
    /// End the session with `reason`; false if it already ended
    pub fn finish(&self, reason: StopReason) -> bool {
        let callback = self.callback.lock().unwrap().take();
        match callback {
            Some(callback) => {
                *self.ended.lock().unwrap() = Some(reason);
                callback(reason);
                true
            }
            None => false,
        }
    }

    pub fn ended(&self) -> Option<StopReason> {
        *self.ended.lock().unwrap()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock().unwrap()
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

struct MockSession(Arc<SessionState>);

impl AudioSession for MockSession {
    fn pause(&self) {
        self.0.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.0.paused.store(false, Ordering::SeqCst);
    }

    fn paused(&self) -> bool {
        self.0.is_paused()
    }

    fn set_volume(&self, volume: f32) {
        *self.0.volume.lock().unwrap() = volume;
    }

    fn stop(&self, reason: StopReason) {
        self.0.finish(reason);
    }
}

#[derive(Default)]
pub struct MockPlayer {
    sessions: Mutex<Vec<Arc<SessionState>>>,
    fail: AtomicBool,
    open_delay: Mutex<Duration>,
}

impl MockPlayer {
    pub fn count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn session(&self, idx: usize) -> Arc<SessionState> {
        self.sessions.lock().unwrap()[idx].clone()
    }

    pub fn last(&self) -> Arc<SessionState> {
        self.sessions
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no session started")
    }

    /// Make subsequent `play` calls fail
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Block inside `play` like an engine decoding before it returns
    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock().unwrap() = delay;
    }
}

impl AudioPlayer for MockPlayer {
    fn play(
        &self,
        path: &Path,
        loop_count: i32,
        volume: f32,
        on_finished: FinishedCallback,
    ) -> Result<Box<dyn AudioSession>> {
        let delay = *self.open_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Playback(format!("cannot open {}", path.display())));
        }
        let state = Arc::new(SessionState {
            path: path.to_path_buf(),
            loop_count,
            paused: AtomicBool::new(false),
            volume: Mutex::new(volume),
            callback: Mutex::new(Some(on_finished)),
            ended: Mutex::new(None),
        });
        self.sessions.lock().unwrap().push(state.clone());
        Ok(Box::new(MockSession(state)))
    }
}

// ============================================================================
// Scheduler
// ============================================================================

pub struct ManualScheduler {
    now: Mutex<TimeOfDay>,
    triggers: Mutex<Vec<(TimeOfDay, TriggerCallback)>>,
    running: AtomicBool,
}

impl ManualScheduler {
    pub fn new(now: &str) -> Self {
        Self {
            now: Mutex::new(now.parse().unwrap()),
            triggers: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn set_now(&self, now: &str) {
        *self.now.lock().unwrap() = now.parse().unwrap();
    }

    pub fn trigger_times(&self) -> Vec<String> {
        self.triggers
            .lock()
            .unwrap()
            .iter()
            .map(|(at, _)| at.to_string())
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Advance the clock to `at` and fire the triggers registered there
    ///
    /// Returns how many fired; nothing fires while stopped.
    pub fn fire_at(&self, at: &str) -> usize {
        self.set_now(at);
        if !self.is_running() {
            return 0;
        }
        let at: TimeOfDay = at.parse().unwrap();
        let due: Vec<TriggerCallback> = self
            .triggers
            .lock()
            .unwrap()
            .iter()
            .filter(|(time, _)| *time == at)
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in &due {
            callback();
        }
        due.len()
    }
}

impl Scheduler for ManualScheduler {
    fn add_trigger(&self, at: TimeOfDay, on_fire: TriggerCallback) {
        self.triggers.lock().unwrap().push((at, on_fire));
    }

    fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn clear(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.triggers.lock().unwrap().clear();
    }

    fn now(&self) -> TimeOfDay {
        *self.now.lock().unwrap()
    }
}

// ============================================================================
// Fetcher
// ============================================================================

#[derive(Default)]
pub struct MockFetcher {
    calls: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl MockFetcher {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl ContentFetch for MockFetcher {
    fn fetch<'a>(&'a self, url: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(url.to_string());
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Fetch(format!("{} failed after 1 attempts", url)));
            }
            tokio::fs::write(dest, b"audio").await?;
            Ok(())
        })
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Cycle slot 08:00~09:00 playing a.mp3 then b.mp3
pub const MORNING_BILL: &str = r#"{
    "id": "b1", "appKey": "k", "ver": "1", "name": "morning",
    "slot": [
        {"sdt": "08:00", "edt": "09:00", "playOrd": 1, "playMode": 2,
         "files": [
            {"fId": "1", "fName": "a.mp3", "playTimes": 1},
            {"fId": "2", "fName": "b.mp3", "playTimes": 2}
         ]}
    ]
}"#;

/// Local files every harness provides
pub const LOCAL_FILES: &[&str] = &[
    "a.mp3",
    "b.mp3",
    "c.mp3",
    "alert.mp3",
    "inner_tip0.mp3",
    "inner_tip1.mp3",
    "inner_tip2.mp3",
];

pub struct Harness {
    pub controller: Arc<Controller>,
    pub player: Arc<MockPlayer>,
    pub scheduler: Arc<ManualScheduler>,
    pub fetcher: Arc<MockFetcher>,
    pub settings: SettingsStore,
    pub files: TempDir,
}

impl Harness {
    pub async fn new(bill_json: &str, now: &str) -> Self {
        Self::with_enabled(bill_json, now, true).await
    }

    pub async fn with_enabled(bill_json: &str, now: &str, enabled: bool) -> Self {
        Self::build(bill_json, now, enabled, Duration::from_millis(1)).await
    }

    pub async fn with_settle(bill_json: &str, now: &str, settle_delay: Duration) -> Self {
        Self::build(bill_json, now, true, settle_delay).await
    }

    async fn build(bill_json: &str, now: &str, enabled: bool, settle_delay: Duration) -> Self {
        let files = tempfile::tempdir().unwrap();
        for name in LOCAL_FILES {
            std::fs::write(files.path().join(name), b"audio").unwrap();
        }

        let player = Arc::new(MockPlayer::default());
        let scheduler = Arc::new(ManualScheduler::new(now));
        let fetcher = Arc::new(MockFetcher::default());
        let settings = memory_settings().await;

        let controller = Controller::new(
            Dependencies {
                player: player.clone(),
                scheduler: scheduler.clone(),
                fetcher: fetcher.clone(),
                settings: settings.clone(),
            },
            ControllerConfig {
                files_path: files.path().to_path_buf(),
                settle_delay,
                default_volume: 100,
            },
            Bill::from_json(bill_json).unwrap(),
            enabled,
        )
        .unwrap();

        Self {
            controller,
            player,
            scheduler,
            fetcher,
            settings,
            files,
        }
    }

    pub async fn wait_for_state(&self, expected: ControlState) {
        let mut last = self.controller.state().await;
        for _ in 0..400 {
            if last == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            last = self.controller.state().await;
        }
        panic!("expected state {}, still {}", expected, last);
    }

    /// Wait until `n` sessions have been started
    pub async fn wait_for_sessions(&self, n: usize) {
        wait_until(|| self.player.count() >= n).await;
    }
}

/// In-memory settings store with the schema applied
pub async fn memory_settings() -> SettingsStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    initialize_database(&pool).await.unwrap();
    SettingsStore::new(pool)
}

/// Poll `condition` for up to two seconds
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 2s");
}

/// Let spawned tasks run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
