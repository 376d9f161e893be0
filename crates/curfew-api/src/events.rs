//! Event types for curfewd -> bridge streaming

use chrono::{DateTime, Utc};
use curfew_util::SubjectId;
use serde::{Deserialize, Serialize};

use crate::{Notification, API_VERSION};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: curfew_util::now_utc(),
            payload,
        }
    }
}

/// All possible events from the daemon to the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Disconnect the subject from the monitored state
    ForceExit { subject_id: SubjectId },

    /// Post a message to the community
    Notify(Notification),

    /// Daemon is shutting down
    ShuttingDown,
}
