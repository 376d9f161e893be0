//! Shared types for the curfewd API

use chrono::{DateTime, FixedOffset};
use curfew_util::SubjectId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A subject as the transport last saw it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRef {
    pub id: SubjectId,
    pub display_name: String,
}

impl SubjectRef {
    pub fn new(id: impl Into<SubjectId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// View of a restriction window for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowView {
    pub subject_id: SubjectId,
    pub display_name: String,
    pub start_at: DateTime<FixedOffset>,
    pub end_at: DateTime<FixedOffset>,
    /// Start formatted in the configured zone ("11:30 PM PST")
    pub start_display: String,
    /// End formatted in the configured zone
    pub end_display: String,
}

/// Result of an appeal that passed every guard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum AppealVerdict {
    Granted {
        extension: Duration,
        window: WindowView,
    },
    Denied,
}

/// Appeal ruling returned to the bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppealView {
    pub subject_id: SubjectId,
    #[serde(flatten)]
    pub verdict: AppealVerdict,
    /// Text to show the subject (generated or from the fallback pool)
    pub ruling: String,
    pub attempts_remaining: u32,
}

impl AppealView {
    pub fn granted(&self) -> bool {
        matches!(self.verdict, AppealVerdict::Granted { .. })
    }
}

/// What happened when a subject entered the monitored state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EnforcementOutcome {
    /// No window for this subject, or the transition was not an entry
    NoRestriction,
    /// Window exists but has not started yet
    NotYetActive,
    /// Window had ended; it was deleted
    Expired,
    /// Subject was removed from the monitored state
    Enforced {
        /// False when the per-subject notification cooldown suppressed it
        notified: bool,
    },
    /// The store could not be read; nothing was done
    StoreUnavailable,
}

/// Summary of a recovery pass over persisted windows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// Windows that had already ended and were deleted
    pub expired: usize,
    /// Windows in progress whose subject was removed immediately
    pub enforced: usize,
    /// Windows in the future that got timers
    pub scheduled: usize,
}

/// Where the bridge should post a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelHint {
    /// The dedicated reminders channel, falling back to general
    Reminders,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Reminder,
    Violation,
}

/// Outbound message for the community.
///
/// `text` never carries platform mention syntax; the bridge renders
/// `subject` as a mention in front of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub channel: ChannelHint,
    pub kind: NotificationKind,
    pub subject: Option<SubjectId>,
    pub text: String,
}

/// Role for authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// Transport bridge - may mutate windows and deliver state changes
    Bridge,
    /// Read-only observer
    Observer,
}

impl ClientRole {
    pub fn can_administer(&self) -> bool {
        matches!(self, ClientRole::Bridge)
    }

    pub fn can_report_events(&self) -> bool {
        matches!(self, ClientRole::Bridge)
    }
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub live: bool,
    /// Bridge connected, recovery completed and store healthy
    pub ready: bool,
    pub bridge_connected: bool,
    pub recovered: bool,
    pub store_ok: bool,
    pub scheduled_timers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> WindowView {
        let start = DateTime::parse_from_rfc3339("2025-01-10T23:30:00-08:00").unwrap();
        WindowView {
            subject_id: SubjectId::new(7),
            display_name: "night owl".into(),
            start_at: start,
            end_at: start + chrono::TimeDelta::minutes(5),
            start_display: "11:30 PM PST".into(),
            end_display: "11:35 PM PST".into(),
        }
    }

    #[test]
    fn appeal_view_flattens_verdict() {
        let appeal = AppealView {
            subject_id: SubjectId::new(7),
            verdict: AppealVerdict::Granted {
                extension: Duration::from_secs(900),
                window: view(),
            },
            ruling: "Fine. Fifteen more minutes.".into(),
            attempts_remaining: 1,
        };

        let json = serde_json::to_value(&appeal).unwrap();
        assert_eq!(json["verdict"], "granted");
        assert_eq!(json["attempts_remaining"], 1);

        let parsed: AppealView = serde_json::from_value(json).unwrap();
        assert!(parsed.granted());
        assert_eq!(parsed, appeal);
    }

    #[test]
    fn enforcement_outcome_serialization() {
        let json = serde_json::to_string(&EnforcementOutcome::Enforced { notified: false }).unwrap();
        assert!(json.contains("\"outcome\":\"enforced\""));
        assert!(json.contains("\"notified\":false"));
    }

    #[test]
    fn only_bridge_can_administer() {
        assert!(ClientRole::Bridge.can_administer());
        assert!(ClientRole::Bridge.can_report_events());
        assert!(!ClientRole::Observer.can_administer());
        assert!(!ClientRole::Observer.can_report_events());
    }
}
