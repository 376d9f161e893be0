//! Outbound interfaces for curfewd
//!
//! This crate defines what the engine needs from the outside world: a
//! transport that can disconnect a subject and post notifications, and an
//! optional text generator. It contains no transport code itself.

mod mock;
mod traits;

pub use mock::*;
pub use traits::*;
