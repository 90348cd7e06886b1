//! Daily time triggers
//!
//! The controller registers one start trigger and one end trigger per slot
//! and never does calendar math itself. [`ClockScheduler`] fires triggers on
//! the local wall clock.

use chrono::{DateTime, Duration as ChronoDuration, Local, TimeZone};
use herald_common::TimeOfDay;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Trigger callback; must not block
pub type TriggerCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Trigger callback receiving the payload it was registered with
pub type PayloadCallback = Arc<dyn Fn(usize) + Send + Sync + 'static>;

/// Time-trigger capability
pub trait Scheduler: Send + Sync {
    /// Register a daily trigger at `at`
    fn add_trigger(&self, at: TimeOfDay, on_fire: TriggerCallback);

    /// Register a daily trigger that hands `payload` to its callback
    fn add_trigger_with(&self, at: TimeOfDay, payload: usize, on_fire: PayloadCallback) {
        self.add_trigger(at, Arc::new(move || on_fire(payload)));
    }

    /// Begin firing registered triggers
    fn start(&self);

    /// Stop firing; the trigger set is kept
    fn stop(&self);

    /// Stop and discard every trigger
    fn clear(&self);

    /// Current local time of day
    fn now(&self) -> TimeOfDay;
}

struct Trigger {
    at: TimeOfDay,
    on_fire: TriggerCallback,
}

#[derive(Default)]
struct ClockInner {
    triggers: Vec<Arc<Trigger>>,
    tasks: Vec<JoinHandle<()>>,
    running: bool,
}

/// Wall-clock scheduler backed by one tokio task per trigger
pub struct ClockScheduler {
    runtime: Handle,
    inner: Mutex<ClockInner>,
}

impl ClockScheduler {
    /// Must be called from within a tokio runtime
    pub fn new() -> Self {
        Self::with_handle(Handle::current())
    }

    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            runtime,
            inner: Mutex::new(ClockInner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClockInner> {
        // A panicking trigger task never holds this lock
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn spawn_trigger(&self, trigger: Arc<Trigger>) -> JoinHandle<()> {
        self.runtime.spawn(async move {
            loop {
                let now = Local::now();
                let next = next_occurrence(now, trigger.at);
                let wait = (next - now).to_std().unwrap_or_default();
                debug!("Trigger {} fires in {:?}", trigger.at, wait);
                tokio::time::sleep(wait).await;
                (trigger.on_fire)();
                // Never fire twice within the same minute
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        })
    }
}

impl Default for ClockScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ClockScheduler {
    fn add_trigger(&self, at: TimeOfDay, on_fire: TriggerCallback) {
        let trigger = Arc::new(Trigger { at, on_fire });
        let mut inner = self.lock();
        if inner.running {
            let task = self.spawn_trigger(trigger.clone());
            inner.tasks.push(task);
        }
        inner.triggers.push(trigger);
    }

    fn start(&self) {
        let mut inner = self.lock();
        if inner.running {
            return;
        }
        let tasks: Vec<_> = inner
            .triggers
            .iter()
            .map(|t| self.spawn_trigger(t.clone()))
            .collect();
        inner.tasks = tasks;
        inner.running = true;
        debug!("Scheduler started with {} triggers", inner.triggers.len());
    }

    fn stop(&self) {
        let mut inner = self.lock();
        for task in inner.tasks.drain(..) {
            task.abort();
        }
        inner.running = false;
    }

    fn clear(&self) {
        let mut inner = self.lock();
        for task in inner.tasks.drain(..) {
            task.abort();
        }
        inner.triggers.clear();
        inner.running = false;
    }

    fn now(&self) -> TimeOfDay {
        TimeOfDay::now()
    }
}

/// Next instant strictly after `now` whose local time of day is `at`
pub fn next_occurrence<Tz: TimeZone>(now: DateTime<Tz>, at: TimeOfDay) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut date = now.date_naive();
    for _ in 0..3 {
        let naive = date.and_time(at.to_naive());
        match tz.from_local_datetime(&naive).earliest() {
            Some(candidate) if candidate > now => return candidate,
            Some(_) => {}
            None => warn!("Local time {} {} does not exist, skipping day", date, at),
        }
        date = date.succ_opt().unwrap_or(date);
    }
    // Only reachable across repeated clock gaps
    now + ChronoDuration::days(1)
}
