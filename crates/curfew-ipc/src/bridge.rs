//! The connected transport bridge as a [`Platform`]

use async_trait::async_trait;
use curfew_api::{Event, EventPayload, Notification};
use curfew_platform_api::{Platform, PlatformError, PlatformResult};
use curfew_util::{ClientId, SubjectId};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Outbound actions become events on the socket; presence is whatever the
/// bridge last reported.
pub struct BridgePlatform {
    events: broadcast::Sender<Event>,
    presence: Mutex<HashSet<SubjectId>>,
    bridge: Mutex<Option<ClientId>>,
}

impl BridgePlatform {
    pub fn new(events: broadcast::Sender<Event>) -> Self {
        Self {
            events,
            presence: Mutex::new(HashSet::new()),
            bridge: Mutex::new(None),
        }
    }

    fn presence(&self) -> MutexGuard<'_, HashSet<SubjectId>> {
        self.presence.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bridge(&self) -> MutexGuard<'_, Option<ClientId>> {
        self.bridge.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A bridge announced itself; replaces any previous bridge and presence
    pub fn attach(&self, client_id: ClientId, monitored: impl IntoIterator<Item = SubjectId>) {
        let monitored: HashSet<SubjectId> = monitored.into_iter().collect();
        info!(client_id = %client_id, present = monitored.len(), "Bridge attached");
        *self.presence() = monitored;
        *self.bridge() = Some(client_id);
    }

    /// Forget the bridge if `client_id` is the attached one
    pub fn detach(&self, client_id: &ClientId) -> bool {
        let mut bridge = self.bridge();
        if bridge.as_ref() != Some(client_id) {
            return false;
        }
        *bridge = None;
        drop(bridge);

        self.presence().clear();
        info!(client_id = %client_id, "Bridge detached");
        true
    }

    pub fn bridge_client(&self) -> Option<ClientId> {
        self.bridge().clone()
    }

    pub fn record_state_change(&self, subject: SubjectId, present: bool) {
        let mut presence = self.presence();
        if present {
            presence.insert(subject);
        } else {
            presence.remove(&subject);
        }
    }

    fn publish(&self, payload: EventPayload) -> PlatformResult<()> {
        if !self.is_connected() {
            return Err(PlatformError::NotConnected);
        }

        self.events
            .send(Event::new(payload))
            .map(|receivers| debug!(receivers, "Event published"))
            .map_err(|_| PlatformError::Delivery("no listeners on the socket".into()))
    }
}

#[async_trait]
impl Platform for BridgePlatform {
    async fn force_exit(&self, subject: SubjectId) -> PlatformResult<()> {
        self.publish(EventPayload::ForceExit { subject_id: subject })?;
        // The bridge confirms with a state change; assume it worked meanwhile
        self.presence().remove(&subject);
        Ok(())
    }

    async fn notify(&self, notification: Notification) -> PlatformResult<()> {
        self.publish(EventPayload::Notify(notification))
    }

    fn is_in_monitored_state(&self, subject: SubjectId) -> bool {
        self.presence().contains(&subject)
    }

    fn is_connected(&self) -> bool {
        self.bridge().is_some()
    }
}
