//! Database access layer
//!
//! The only table is the `settings` key/value store holding the persisted
//! bill and enable flag.

pub mod init;
pub mod settings;

pub use init::{initialize_database, open_pool};
pub use settings::SettingsStore;
