//! Persistence layer for curfewd
//!
//! Provides durable storage of restriction windows, one per subject, so
//! pending restrictions survive restarts. Appeal state is deliberately not
//! stored here.

mod sqlite;
mod traits;

pub use sqlite::*;
pub use traits::*;

use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid window: {0}")]
    InvalidWindow(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<StoreError> for curfew_util::CurfewError {
    fn from(e: StoreError) -> Self {
        curfew_util::CurfewError::persistence(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
