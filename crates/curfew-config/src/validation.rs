//! Configuration validation

use crate::schema::{RawAppeals, RawConfig, RawNarrative, RawRestrictions};
use chrono_tz::Tz;
use thiserror::Error;

/// Longest duration any window, lead or cooldown setting may take
pub const MAX_DURATION_SECONDS: u64 = 24 * 60 * 60;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Unknown timezone '{0}' (expected an IANA name like US/Pacific)")]
    InvalidTimezone(String),

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("{field} must be at most {max_seconds} seconds")]
    DurationTooLong {
        field: &'static str,
        max_seconds: u64,
    },

    #[error("grant_probability {0} is outside 0.0..=1.0")]
    InvalidProbability(f64),

    #[error("extension_minutes must list at least one extension")]
    EmptyExtensionSchedule,

    #[error("extension_minutes[{index}] must be greater than zero")]
    ZeroExtension { index: usize },

    #[error("extension_minutes[{index}] must be at most {max_minutes} minutes")]
    ExtensionTooLong { index: usize, max_minutes: u64 },

    #[error("Invalid narrative endpoint '{0}': expected an http:// or https:// URL")]
    InvalidEndpoint(String),

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(tz) = &config.daemon.timezone
        && parse_timezone(tz).is_none()
    {
        errors.push(ValidationError::InvalidTimezone(tz.clone()));
    }

    errors.extend(validate_restrictions(&config.restrictions));
    errors.extend(validate_appeals(&config.appeals));

    if config.notifications.cooldown_seconds == Some(0) {
        errors.push(ValidationError::ZeroDuration {
            field: "notifications.cooldown_seconds",
        });
    }
    errors.extend(check_upper_bound(
        "notifications.cooldown_seconds",
        config.notifications.cooldown_seconds,
    ));

    errors.extend(validate_narrative(&config.narrative));

    errors
}

fn validate_restrictions(raw: &RawRestrictions) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if raw.grace_period_seconds == Some(0) {
        errors.push(ValidationError::ZeroDuration {
            field: "restrictions.grace_period_seconds",
        });
    }
    errors.extend(check_upper_bound(
        "restrictions.grace_period_seconds",
        raw.grace_period_seconds,
    ));
    errors.extend(check_upper_bound(
        "restrictions.reminder_lead_seconds",
        raw.reminder_lead_seconds,
    ));

    errors
}

fn validate_appeals(raw: &RawAppeals) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if raw.lead_seconds == Some(0) {
        errors.push(ValidationError::ZeroDuration {
            field: "appeals.lead_seconds",
        });
    }
    errors.extend(check_upper_bound("appeals.lead_seconds", raw.lead_seconds));
    errors.extend(check_upper_bound("appeals.cooldown_seconds", raw.cooldown_seconds));

    if let Some(p) = raw.grant_probability
        && !(0.0..=1.0).contains(&p)
    {
        errors.push(ValidationError::InvalidProbability(p));
    }

    if let Some(schedule) = &raw.extension_minutes {
        if schedule.is_empty() {
            errors.push(ValidationError::EmptyExtensionSchedule);
        }
        for (index, minutes) in schedule.iter().enumerate() {
            if *minutes == 0 {
                errors.push(ValidationError::ZeroExtension { index });
            } else if *minutes > MAX_DURATION_SECONDS / 60 {
                errors.push(ValidationError::ExtensionTooLong {
                    index,
                    max_minutes: MAX_DURATION_SECONDS / 60,
                });
            }
        }
    }

    errors
}

fn validate_narrative(raw: &RawNarrative) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(endpoint) = &raw.endpoint
        && !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
    {
        errors.push(ValidationError::InvalidEndpoint(endpoint.clone()));
    }

    if raw.timeout_ms == Some(0) {
        errors.push(ValidationError::ZeroDuration {
            field: "narrative.timeout_ms",
        });
    }

    if raw.max_input_chars == Some(0) || raw.max_output_chars == Some(0) {
        errors.push(ValidationError::GlobalError(
            "narrative character caps must be greater than zero".into(),
        ));
    }

    errors
}

fn check_upper_bound(field: &'static str, seconds: Option<u64>) -> Option<ValidationError> {
    match seconds {
        Some(s) if s > MAX_DURATION_SECONDS => Some(ValidationError::DurationTooLong {
            field,
            max_seconds: MAX_DURATION_SECONDS,
        }),
        _ => None,
    }
}

/// Parse an IANA zone name
pub fn parse_timezone(s: &str) -> Option<Tz> {
    s.trim().parse().ok()
}
