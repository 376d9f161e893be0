//! Error types for curfewd

use chrono::DateTime;
use chrono_tz::Tz;
use std::time::Duration;
use thiserror::Error;

use crate::{format_clock_time, format_duration, SubjectId};

/// Coarse error classes; callers branch on these rather than on variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// User-visible rejection, nothing changed
    Validation,
    /// Durable store failed, nothing changed, retry is reasonable
    Persistence,
    /// External call ran out of time
    Timeout,
    /// Anything else
    Unexpected,
}

/// Core error type for curfewd operations
#[derive(Debug, Error)]
pub enum CurfewError {
    #[error("Invalid time format: {0}")]
    InvalidTime(String),

    #[error("Subject {0} is exempt from curfews")]
    Exempt(SubjectId),

    #[error("No curfew found for subject {0}")]
    NotFound(SubjectId),

    #[error("No active curfew to appeal")]
    NoActiveRestriction,

    #[error("Too early to appeal; appeals open at {}", format_clock_time(.opens_at))]
    AppealTooEarly { opens_at: DateTime<Tz> },

    #[error("Too late to appeal; the curfew has already started")]
    AppealTooLate,

    #[error("No appeals left for this curfew")]
    AppealsExhausted,

    #[error("Appeal rate limited; try again in {}", retry_hint(.retry_after))]
    AppealRateLimited { retry_after: Duration },

    #[error("Store error: {0}")]
    Persistence(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CurfewError {
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTime(_)
            | Self::Exempt(_)
            | Self::NotFound(_)
            | Self::NoActiveRestriction
            | Self::AppealTooEarly { .. }
            | Self::AppealTooLate
            | Self::AppealsExhausted
            | Self::AppealRateLimited { .. } => ErrorKind::Validation,
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Internal(_) => ErrorKind::Unexpected,
        }
    }
}

fn retry_hint(retry_after: &Duration) -> String {
    format_duration(*retry_after)
}

pub type Result<T> = std::result::Result<T, CurfewError>;
