//! Protocol types for the curfewd bridge socket
//!
//! This crate defines the stable API between curfewd and the transport bridge:
//! - Commands (administrative requests and state-change events from the bridge)
//! - Responses
//! - Events (daemon -> bridge: force exits, notifications)
//! - Versioning

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
