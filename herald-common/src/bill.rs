//! Program bill model
//!
//! A bill is the daily schedule document: up to four time slots, each with an
//! ordered playlist of up to ten files. Documents arrive as JSON (from the
//! command interface or the settings store) and must pass [`Bill::validate`]
//! before the derived slot times are meaningful.

use crate::time::TimeOfDay;
use crate::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Maximum number of slots in one bill
pub const MAX_SLOTS: usize = 4;

/// Maximum number of files in one slot
pub const MAX_FILES_PER_SLOT: usize = 10;

/// Built-in empty bill installed on first start and by reset
pub const DEFAULT_BILL_JSON: &str = r#"{"name":"default","slot":[]}"#;

/// File selection order within a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum PlayOrder {
    #[default]
    Sequential,
    Random,
}

impl From<u8> for PlayOrder {
    fn from(v: u8) -> Self {
        match v {
            2 => PlayOrder::Random,
            _ => PlayOrder::Sequential,
        }
    }
}

impl From<PlayOrder> for u8 {
    fn from(order: PlayOrder) -> Self {
        match order {
            PlayOrder::Sequential => 1,
            PlayOrder::Random => 2,
        }
    }
}

/// Whether a slot plays its playlist once or repeats until the slot ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum PlayMode {
    Once,
    #[default]
    Cycle,
}

impl From<u8> for PlayMode {
    fn from(v: u8) -> Self {
        match v {
            1 => PlayMode::Once,
            _ => PlayMode::Cycle,
        }
    }
}

impl From<PlayMode> for u8 {
    fn from(mode: PlayMode) -> Self {
        match mode {
            PlayMode::Once => 1,
            PlayMode::Cycle => 2,
        }
    }
}

/// Transient "download in flight" marker carried by each file
///
/// Never serialized. Cloning copies the current value.
#[derive(Debug, Default)]
pub struct DownloadFlag(AtomicBool);

impl DownloadFlag {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Set the flag; returns false if it was already set
    pub fn try_acquire(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn release(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Clone for DownloadFlag {
    fn clone(&self) -> Self {
        Self(AtomicBool::new(self.is_set()))
    }
}

/// One playable unit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MusicFile {
    #[serde(rename = "fId", default)]
    pub id: String,

    #[serde(rename = "fName", default)]
    pub name: String,

    /// Repeat count: 0 is treated as 1, negative loops indefinitely
    #[serde(rename = "playTimes", default)]
    pub play_times: i32,

    /// Remote source; empty string is the same as absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(rename = "fileOrd", default)]
    pub file_order: i32,

    #[serde(skip)]
    pub downloading: DownloadFlag,
}

impl MusicFile {
    /// Local-only file (built-in clips, pre-installed announcements)
    pub fn local(name: impl Into<String>, play_times: i32) -> Self {
        Self {
            name: name.into(),
            play_times,
            ..Default::default()
        }
    }

    /// Remote source, if any
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref().filter(|u| !u.is_empty())
    }

    /// Name of the file inside the local files directory
    ///
    /// Without a URL the file is stored under its own name. With a URL it is
    /// stored as `<id><ext>`, the extension taken from the URL's last path
    /// segment.
    pub fn local_file_name(&self) -> Result<String> {
        let url = match self.url() {
            None => {
                if self.name.is_empty() {
                    return Err(Error::Validation(
                        "local file has neither a name nor a url".to_string(),
                    ));
                }
                return Ok(self.name.clone());
            }
            Some(url) => url,
        };

        if self.id.is_empty() {
            return Err(Error::Validation(format!("file url [{}] has no file id", url)));
        }

        let path = url.split(['?', '#']).next().unwrap_or(url);
        let segment = path.rsplit('/').next().unwrap_or(path);
        match segment.rfind('.') {
            Some(idx) if idx + 1 < segment.len() => Ok(format!("{}{}", self.id, &segment[idx..])),
            _ => Err(Error::Validation(format!(
                "file url [{}] is missing an extension separator '.'",
                url
            ))),
        }
    }

    /// Repeat count handed to the playback engine
    pub fn effective_play_times(&self) -> i32 {
        if self.play_times == 0 {
            1
        } else {
            self.play_times
        }
    }

    pub fn is_downloading(&self) -> bool {
        self.downloading.is_set()
    }
}

/// One time slot with its playlist
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    /// `"HH:MM"`
    #[serde(rename = "sdt", default)]
    pub start_time: String,

    /// `"HH:MM"`
    #[serde(rename = "edt", default)]
    pub end_time: String,

    #[serde(rename = "playOrd", default)]
    pub play_order: PlayOrder,

    #[serde(rename = "playMode", default)]
    pub play_mode: PlayMode,

    #[serde(default)]
    pub files: Vec<MusicFile>,

    // Derived by Bill::validate
    #[serde(skip)]
    start: TimeOfDay,
    #[serde(skip)]
    end: TimeOfDay,
}

impl Program {
    pub fn new(start_time: &str, end_time: &str, files: Vec<MusicFile>) -> Self {
        Self {
            start_time: start_time.to_string(),
            end_time: end_time.to_string(),
            files,
            ..Default::default()
        }
    }

    pub fn start(&self) -> TimeOfDay {
        self.start
    }

    pub fn end(&self) -> TimeOfDay {
        self.end
    }

    pub fn start_hm(&self) -> u16 {
        self.start.hm()
    }

    pub fn end_hm(&self) -> u16 {
        self.end.hm()
    }

    /// True when the window wraps past midnight
    pub fn crosses_midnight(&self) -> bool {
        self.end_hm() < self.start_hm()
    }

    /// Human-readable `HH:MM~HH:MM` window for logs
    pub fn window(&self) -> String {
        format!("{}~{}", self.start_time, self.end_time)
    }

    fn parse_times(&mut self) -> Result<()> {
        self.start = self.start_time.parse().map_err(|e| {
            Error::Validation(format!("start time [{}] is invalid: {}", self.start_time, e))
        })?;
        self.end = self.end_time.parse().map_err(|e| {
            Error::Validation(format!("end time [{}] is invalid: {}", self.end_time, e))
        })?;

        if self.start == self.end {
            return Err(Error::Validation(format!(
                "slot [{}] start and end time must differ",
                self.window()
            )));
        }
        Ok(())
    }
}

/// The daily schedule document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bill {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "appKey", default)]
    pub app_key: String,

    #[serde(rename = "ver", default)]
    pub version: String,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "slot", default)]
    pub slots: Vec<Program>,
}

impl Bill {
    /// The built-in empty bill
    pub fn empty() -> Self {
        Self {
            name: "default".to_string(),
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Validation(format!("bill document is not valid JSON: {}", e)))
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::Validation(format!("bill document is malformed: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Validation(format!("bill cannot be serialized: {}", e)))
    }

    /// Check every rule a bill must satisfy before installation
    ///
    /// On success the slots carry parsed start/end times and are sorted by
    /// start time. Every file's download flag is cleared.
    pub fn validate(&mut self) -> Result<()> {
        if self.slots.len() > MAX_SLOTS {
            return Err(Error::Validation(format!(
                "a bill holds at most {} slots, got {}",
                MAX_SLOTS,
                self.slots.len()
            )));
        }

        for program in self.slots.iter_mut() {
            program.parse_times()?;

            if program.files.len() > MAX_FILES_PER_SLOT {
                return Err(Error::Validation(format!(
                    "slot [{}] holds at most {} files, got {}",
                    program.window(),
                    MAX_FILES_PER_SLOT,
                    program.files.len()
                )));
            }

            for file in &program.files {
                file.downloading.release();
                file.local_file_name()?;
            }
        }

        if self.slots.len() > 1 {
            self.sort_by_start_time();
            self.check_overlap()?;
        }
        Ok(())
    }

    /// Stable ascending sort by slot start time
    pub fn sort_by_start_time(&mut self) {
        self.slots.sort_by_key(|p| p.start_hm());
    }

    /// Slots must be disjoint; only the last one may wrap past midnight
    fn check_overlap(&self) -> Result<()> {
        let Some(last_idx) = self.slots.len().checked_sub(1) else {
            return Ok(());
        };
        if last_idx == 0 {
            return Ok(());
        }

        for pair in self.slots.windows(2) {
            let (current, next) = (&pair[0], &pair[1]);
            if current.start_hm() >= current.end_hm() {
                return Err(Error::Validation(format!(
                    "slot [{}] ends before it starts; only the last slot may cross midnight",
                    current.window()
                )));
            }
            if current.end_hm() >= next.start_hm() {
                return Err(Error::Validation(format!(
                    "slot [{}] overlaps slot [{}]",
                    current.window(),
                    next.window()
                )));
            }
        }

        let last = &self.slots[last_idx];
        let first = &self.slots[0];
        if last.crosses_midnight() && last.end_hm() >= first.start_hm() {
            return Err(Error::Validation(format!(
                "midnight-crossing slot [{}] must end before the first slot [{}] starts",
                last.window(),
                first.window()
            )));
        }
        Ok(())
    }

    /// Index of the slot covering `now`, if any
    pub fn current_program(&self, now: TimeOfDay) -> Option<usize> {
        let last_idx = self.slots.len().checked_sub(1)?;
        let hm = now.hm();

        if let Some(idx) = self
            .slots
            .iter()
            .position(|p| p.start_hm() <= hm && hm <= p.end_hm())
        {
            return Some(idx);
        }

        let last = &self.slots[last_idx];
        if last.crosses_midnight() && (hm >= last.start_hm() || hm <= last.end_hm()) {
            return Some(last_idx);
        }
        None
    }
}

/// Pick the next playlist position
///
/// `previous` is `None` before the first pick. Random order avoids repeating
/// the immediately previous pick but keeps no longer history.
pub fn next_file_index(order: PlayOrder, previous: Option<usize>, count: usize) -> usize {
    if count == 0 {
        return 0;
    }
    match order {
        PlayOrder::Sequential => previous.map_or(0, |p| (p + 1) % count),
        PlayOrder::Random => {
            let idx = rand::thread_rng().gen_range(0..count);
            if Some(idx) == previous {
                (idx + 1) % count
            } else {
                idx
            }
        }
    }
}
