//! # Herald Announcement Player (herald-ap)
//!
//! Scheduled program playback with priority-preemptible temporary
//! announcements.
//!
//! **Architecture:** a single Controller state machine driving a playback
//! engine (symphonia + rubato + cpal), a wall-clock scheduler and a content
//! fetcher, controlled over HTTP and persisted in SQLite.

pub mod api;
pub mod audio;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod fetch;
pub mod playback;
pub mod schedule;

pub use error::{Error, Result};
