//! Reaction to subjects entering the monitored state

use chrono::DateTime;
use chrono_tz::Tz;
use curfew_api::{ChannelHint, EnforcementOutcome, Notification, NotificationKind, SubjectRef};
use curfew_platform_api::Platform;
use curfew_store::{RestrictionStore, WindowPhase};
use curfew_util::{CooldownTracker, SubjectId};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{Category, NarrativeClient};

/// Classification of an entry against the subject's window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryVerdict {
    NoRestriction,
    NotYetActive,
    /// The window had ended and was deleted
    Expired,
    Enforce,
    StoreUnavailable,
}

pub struct EnforcementMonitor {
    store: Arc<dyn RestrictionStore>,
    platform: Arc<dyn Platform>,
    narrative: Arc<NarrativeClient>,
    throttle: Mutex<CooldownTracker<SubjectId>>,
}

impl EnforcementMonitor {
    pub fn new(
        store: Arc<dyn RestrictionStore>,
        platform: Arc<dyn Platform>,
        narrative: Arc<NarrativeClient>,
        notification_cooldown: Duration,
    ) -> Self {
        Self {
            store,
            platform,
            narrative,
            throttle: Mutex::new(CooldownTracker::new(notification_cooldown)),
        }
    }

    fn throttle(&self) -> MutexGuard<'_, CooldownTracker<SubjectId>> {
        self.throttle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide what an entry at `at` means, deleting the window if it has ended.
    ///
    /// Callers run this inside the subject's critical section so the delete
    /// cannot race a concurrent replacement.
    pub fn evaluate(&self, subject: SubjectId, at: &DateTime<Tz>) -> EntryVerdict {
        let window = match self.store.get(subject) {
            Ok(Some(window)) => window,
            Ok(None) => return EntryVerdict::NoRestriction,
            Err(e) => {
                warn!(subject_id = %subject, error = %e, "Could not read window, skipping enforcement");
                return EntryVerdict::StoreUnavailable;
            }
        };

        match window.phase(at) {
            WindowPhase::Pending => EntryVerdict::NotYetActive,
            WindowPhase::Active => EntryVerdict::Enforce,
            WindowPhase::Expired => {
                match self.store.remove(subject) {
                    Ok(_) => info!(subject_id = %subject, "Curfew expired, window removed"),
                    Err(e) => warn!(subject_id = %subject, error = %e, "Failed to remove expired window"),
                }
                EntryVerdict::Expired
            }
        }
    }

    /// Remove the subject and post a violation notice, at most once per
    /// cooldown per subject. Repeats the removal on every call.
    pub async fn enforce(&self, subject: &SubjectRef, at: &DateTime<Tz>) -> EnforcementOutcome {
        match self.platform.force_exit(subject.id).await {
            Ok(()) => info!(subject_id = %subject.id, "Removed subject during curfew"),
            Err(e) => warn!(subject_id = %subject.id, error = %e, "Force exit failed"),
        }

        let allowed = self.throttle().try_acquire(&subject.id, *at);
        if !allowed {
            debug!(subject_id = %subject.id, "Violation notice suppressed by cooldown");
            return EnforcementOutcome::Enforced { notified: false };
        }

        let flavor = self
            .narrative
            .flavor(Category::Violation, &subject.display_name, at)
            .await;
        let notification = Notification {
            channel: ChannelHint::General,
            kind: NotificationKind::Violation,
            subject: Some(subject.id),
            text: format!("tried to join voice chat during their curfew! {}", flavor),
        };

        let notified = match self.platform.notify(notification).await {
            Ok(()) => true,
            Err(e) => {
                warn!(subject_id = %subject.id, error = %e, "Failed to post violation notice");
                false
            }
        };

        EnforcementOutcome::Enforced { notified }
    }

    /// Evaluate and, if the window is active, enforce
    pub async fn on_entered(&self, subject: &SubjectRef, at: &DateTime<Tz>) -> EnforcementOutcome {
        match self.evaluate(subject.id, at) {
            EntryVerdict::NoRestriction => EnforcementOutcome::NoRestriction,
            EntryVerdict::NotYetActive => EnforcementOutcome::NotYetActive,
            EntryVerdict::Expired => EnforcementOutcome::Expired,
            EntryVerdict::StoreUnavailable => EnforcementOutcome::StoreUnavailable,
            EntryVerdict::Enforce => self.enforce(subject, at).await,
        }
    }

    pub fn forget(&self, subject: SubjectId) {
        self.throttle().forget(&subject);
    }

    pub fn clear(&self) {
        self.throttle().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use chrono_tz::US::Pacific;
    use curfew_platform_api::MockPlatform;
    use curfew_store::SqliteStore;

    struct Fixture {
        store: Arc<SqliteStore>,
        platform: Arc<MockPlatform>,
        monitor: EnforcementMonitor,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SqliteStore::in_memory(Pacific).unwrap());
        let platform = Arc::new(MockPlatform::new());
        let monitor = EnforcementMonitor::new(
            store.clone(),
            platform.clone(),
            Arc::new(NarrativeClient::disabled()),
            Duration::from_secs(300),
        );
        Fixture {
            store,
            platform,
            monitor,
        }
    }

    fn owl() -> SubjectRef {
        SubjectRef::new(7u64, "owl")
    }

    fn start() -> DateTime<Tz> {
        Pacific.with_ymd_and_hms(2025, 1, 10, 23, 30, 0).unwrap()
    }

    fn seed(f: &Fixture) {
        f.store
            .upsert(owl().id, "owl", start(), start() + TimeDelta::minutes(5))
            .unwrap();
    }

    #[tokio::test]
    async fn test_no_window_is_noop() {
        let f = fixture();
        let outcome = f.monitor.on_entered(&owl(), &start()).await;
        assert_eq!(outcome, EnforcementOutcome::NoRestriction);
        assert!(f.platform.exits().is_empty());
    }

    #[tokio::test]
    async fn test_before_start_is_noop() {
        let f = fixture();
        seed(&f);
        let outcome = f
            .monitor
            .on_entered(&owl(), &(start() - TimeDelta::seconds(1)))
            .await;
        assert_eq!(outcome, EnforcementOutcome::NotYetActive);
        assert!(f.platform.exits().is_empty());
        assert!(f.store.get(owl().id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_active_window_enforces_and_notifies_once() {
        let f = fixture();
        seed(&f);

        let outcome = f.monitor.on_entered(&owl(), &start()).await;
        assert_eq!(outcome, EnforcementOutcome::Enforced { notified: true });

        let notes = f.platform.notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].channel, ChannelHint::General);
        assert_eq!(notes[0].kind, NotificationKind::Violation);
        assert!(notes[0].text.starts_with("tried to join voice chat during their curfew!"));

        // Rejoin a minute later: removed again, no second notice
        let outcome = f
            .monitor
            .on_entered(&owl(), &(start() + TimeDelta::minutes(1)))
            .await;
        assert_eq!(outcome, EnforcementOutcome::Enforced { notified: false });
        assert_eq!(f.platform.exit_count(owl().id), 2);
        assert_eq!(f.platform.notifications().len(), 1);
    }

    #[tokio::test]
    async fn test_notice_allowed_again_after_cooldown() {
        let f = fixture();
        f.store
            .upsert(owl().id, "owl", start(), start() + TimeDelta::minutes(30))
            .unwrap();

        f.monitor.on_entered(&owl(), &start()).await;
        let outcome = f
            .monitor
            .on_entered(&owl(), &(start() + TimeDelta::minutes(5)))
            .await;

        assert_eq!(outcome, EnforcementOutcome::Enforced { notified: true });
        assert_eq!(f.platform.notifications().len(), 2);
    }

    #[tokio::test]
    async fn test_expired_window_is_deleted_lazily() {
        let f = fixture();
        seed(&f);

        let outcome = f
            .monitor
            .on_entered(&owl(), &(start() + TimeDelta::minutes(5)))
            .await;

        assert_eq!(outcome, EnforcementOutcome::Expired);
        assert!(f.platform.exits().is_empty());
        assert!(f.store.get(owl().id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_notify_failure_still_enforces() {
        let f = fixture();
        seed(&f);
        *f.platform.fail_notify.lock().unwrap() = true;

        let outcome = f.monitor.on_entered(&owl(), &start()).await;

        assert_eq!(outcome, EnforcementOutcome::Enforced { notified: false });
        assert_eq!(f.platform.exits(), vec![owl().id]);
    }
}
