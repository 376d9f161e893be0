//! Command types for the curfewd protocol

use curfew_util::{ClientId, CurfewError, SubjectId};
use serde::{Deserialize, Serialize};

use crate::{
    AppealView, ClientRole, EnforcementOutcome, HealthStatus, RecoveryReport, SubjectRef,
    WindowView, API_VERSION,
};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// The command
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Response payload or error
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&CurfewError> for ErrorInfo {
    fn from(err: &CurfewError) -> Self {
        let code = match err {
            CurfewError::InvalidTime(_) => ErrorCode::InvalidTime,
            CurfewError::Exempt(_) => ErrorCode::Exempt,
            CurfewError::NotFound(_) => ErrorCode::NotFound,
            CurfewError::NoActiveRestriction => ErrorCode::NoActiveRestriction,
            CurfewError::AppealTooEarly { .. } => ErrorCode::AppealTooEarly,
            CurfewError::AppealTooLate => ErrorCode::AppealTooLate,
            CurfewError::AppealsExhausted => ErrorCode::AppealsExhausted,
            CurfewError::AppealRateLimited { .. } => ErrorCode::AppealRateLimited,
            CurfewError::Persistence(_) => ErrorCode::StoreError,
            CurfewError::Timeout(_) => ErrorCode::Timeout,
            CurfewError::Internal(_) => ErrorCode::InternalError,
        };

        // Store and internal details stay in the log
        let message = match err {
            CurfewError::Persistence(_) => "Could not save that right now, please try again".into(),
            CurfewError::Internal(_) => "Something went wrong".into(),
            other => other.to_string(),
        };

        Self { code, message }
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    InvalidTime,
    Exempt,
    NotFound,
    NoActiveRestriction,
    AppealTooEarly,
    AppealTooLate,
    AppealsExhausted,
    AppealRateLimited,
    PermissionDenied,
    RateLimited,
    StoreError,
    Timeout,
    InternalError,
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Set or replace a subject's window starting at the next `time`
    SetRestriction { subject: SubjectRef, time: String },

    /// Remove a subject's window and its timers
    RemoveRestriction { subject_id: SubjectId },

    /// Remove every window and timer
    ResetAll,

    /// List windows that have not ended yet
    ListActive,

    /// Subject asks to push their window back
    Appeal { subject: SubjectRef, reason: String },

    /// A subject's monitored location changed (`None` means not present)
    StateChanged {
        subject: SubjectRef,
        before: Option<String>,
        after: Option<String>,
    },

    /// Bridge (re)connected; carries who is currently in the monitored state
    BridgeReady { monitored: Vec<SubjectId> },

    /// Subscribe to events (returns immediately, events stream separately)
    SubscribeEvents,

    /// Unsubscribe from events
    UnsubscribeEvents,

    /// Get health status
    GetHealth,

    /// Ping for keepalive
    Ping,
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    RestrictionSet(WindowView),
    RestrictionRemoved { subject_id: SubjectId },
    ResetDone,
    Active { windows: Vec<WindowView> },
    AppealRuled(AppealView),
    StateHandled(EnforcementOutcome),
    Recovered(RecoveryReport),
    Subscribed { client_id: ClientId },
    Unsubscribed,
    Health(HealthStatus),
    Pong,
}

/// Client connection info (set by IPC layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: ClientId,
    pub role: ClientRole,
    /// Unix UID if available
    pub uid: Option<u32>,
}

impl ClientInfo {
    pub fn new(role: ClientRole) -> Self {
        Self {
            client_id: ClientId::new(),
            role,
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization() {
        let req = Request::new(
            1,
            Command::SetRestriction {
                subject: SubjectRef::new(42u64, "sleepy"),
                time: "11:30 PM".into(),
            },
        );
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"type\":\"set_restriction\""));

        let parsed: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.request_id, 1);
        assert!(matches!(
            parsed.command,
            Command::SetRestriction { ref time, .. } if time == "11:30 PM"
        ));
    }

    #[test]
    fn bridge_can_send_state_change_by_hand() {
        let raw = r#"{"request_id":9,"api_version":1,"command":{"type":"state_changed","subject":{"id":42,"display_name":"sleepy"},"before":null,"after":"lounge"}}"#;
        let parsed: Request = serde_json::from_str(raw).unwrap();
        match parsed.command {
            Command::StateChanged { subject, before, after } => {
                assert_eq!(subject.id, SubjectId::new(42));
                assert!(before.is_none());
                assert_eq!(after.as_deref(), Some("lounge"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn response_serialization() {
        let resp = Response::success(
            1,
            ResponsePayload::Recovered(RecoveryReport {
                expired: 1,
                enforced: 0,
                scheduled: 3,
            }),
        );

        let json = serde_json::to_string(&resp).unwrap();
        let parsed: Response = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.request_id, 1);
        assert!(matches!(
            parsed.result,
            ResponseResult::Ok(ResponsePayload::Recovered(RecoveryReport { scheduled: 3, .. }))
        ));
    }

    #[test]
    fn persistence_errors_hide_details() {
        let info = ErrorInfo::from(&CurfewError::persistence("database is locked"));
        assert_eq!(info.code, ErrorCode::StoreError);
        assert!(!info.message.contains("locked"));

        let info = ErrorInfo::from(&CurfewError::AppealsExhausted);
        assert_eq!(info.code, ErrorCode::AppealsExhausted);
        assert_eq!(info.message, CurfewError::AppealsExhausted.to_string());
    }
}
