//! Shared utilities for curfewd
//!
//! This crate provides:
//! - ID types (SubjectId, ClientId)
//! - Wall-clock helpers in the configured timezone (time-of-day parsing,
//!   next occurrence across day boundaries, mock time for development)
//! - Error types
//! - Rate limiting and per-key cooldown helpers
//! - Default paths for socket, data, and config files

mod error;
mod ids;
mod paths;
mod rate_limit;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use rate_limit::*;
pub use time::*;
