//! HTTP command adapter
//!
//! Translates inbound `{"method", "params"}` commands into Controller calls
//! and streams controller events over SSE.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{router, run, AppContext};
