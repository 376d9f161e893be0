//! Restriction engine for curfewd
//!
//! This crate is the heart of curfewd, containing:
//! - Per-subject timers for reminders and enforcement, rebuilt from the store on restart
//! - Enforcement when a restricted subject enters the monitored state
//! - The appeal negotiation (guards, odds, extension schedule)
//! - Optional generated wording with a static fallback pool
//! - `CurfewEngine`, which owns all of the above and serializes work per subject

mod appeal;
mod enforcement;
mod engine;
mod locks;
mod narrative;
mod timers;

pub use appeal::*;
pub use enforcement::*;
pub use engine::*;
pub use locks::*;
pub use narrative::*;
pub use timers::*;
