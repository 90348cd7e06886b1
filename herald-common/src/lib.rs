//! # Herald Common Library
//!
//! Shared code for the Herald announcement appliance:
//! - Program bill model, validation and slot lookup
//! - Time-of-day type used by slots and the scheduler
//! - RPC wire envelope (command in, response out)
//! - Bootstrap configuration loading

pub mod bill;
pub mod config;
pub mod error;
pub mod rpc;
pub mod time;

pub use bill::{next_file_index, Bill, MusicFile, PlayMode, PlayOrder, Program};
pub use error::{Error, Result};
pub use time::TimeOfDay;
