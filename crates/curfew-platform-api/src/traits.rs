//! Platform and text generator traits

use async_trait::async_trait;
use curfew_api::Notification;
use curfew_util::SubjectId;
use thiserror::Error;

/// Errors from outbound calls
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Transport not connected")]
    NotConnected,

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Text generation failed: {0}")]
    Generation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type PlatformResult<T> = Result<T, PlatformError>;

/// The messaging transport, as seen from the engine
#[async_trait]
pub trait Platform: Send + Sync {
    /// Remove the subject from the monitored state.
    ///
    /// Must be safe to call when the subject is not present.
    async fn force_exit(&self, subject: SubjectId) -> PlatformResult<()>;

    /// Post a notification to the community
    async fn notify(&self, notification: Notification) -> PlatformResult<()>;

    /// Whether the subject is currently in the monitored state
    fn is_in_monitored_state(&self, subject: SubjectId) -> bool;

    /// Optional: whether the transport is currently reachable
    fn is_connected(&self) -> bool {
        true
    }
}

/// Short-text generator behind the narrative client
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Produce a completion for `prompt` under the `system` instructions
    async fn generate(&self, system: &str, prompt: &str) -> PlatformResult<String>;
}
