//! Core engine: owns every piece of in-memory state and the store handle

use chrono::DateTime;
use chrono_tz::Tz;
use curfew_api::{AppealView, EnforcementOutcome, RecoveryReport, SubjectRef};
use curfew_config::EngineConfig;
use curfew_platform_api::Platform;
use curfew_store::{RestrictionStore, RestrictionWindow};
use curfew_util::{
    next_occurrence, now_in, parse_time_of_day, to_delta, CurfewError, Result, SubjectId,
};
use rand::rngs::StdRng;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{AppealEngine, EnforcementMonitor, EntryVerdict, NarrativeClient, SubjectLocks, TimerManager};

/// The curfew engine
///
/// Administrative commands, state-change events and appeals all go through
/// here. Work on one subject is serialized by [`SubjectLocks`]; the store is
/// always written before any timer or negotiation state is touched.
pub struct CurfewEngine {
    config: EngineConfig,
    store: Arc<dyn RestrictionStore>,
    timers: Arc<TimerManager>,
    monitor: EnforcementMonitor,
    appeals: AppealEngine,
    narrative: Arc<NarrativeClient>,
    locks: SubjectLocks,
}

impl CurfewEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn RestrictionStore>,
        platform: Arc<dyn Platform>,
        narrative: Arc<NarrativeClient>,
    ) -> Self {
        let timers = Arc::new(TimerManager::new(
            store.clone(),
            platform.clone(),
            narrative.clone(),
            config.reminder_lead,
            config.timezone,
        ));
        let monitor = EnforcementMonitor::new(
            store.clone(),
            platform,
            narrative.clone(),
            config.notification_cooldown,
        );
        let appeals = AppealEngine::new(
            store.clone(),
            timers.clone(),
            narrative.clone(),
            config.appeals.clone(),
            config.grace_period,
        );

        info!(
            timezone = %config.timezone,
            grace_secs = config.grace_period.as_secs(),
            exempt = config.exempt.len(),
            narrative = narrative.is_enabled(),
            "Curfew engine created"
        );

        Self {
            config,
            store,
            timers,
            monitor,
            appeals,
            narrative,
            locks: SubjectLocks::new(),
        }
    }

    /// Replace the appeal outcome source (seeded for tests)
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.appeals = self.appeals.with_rng(rng);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn timezone(&self) -> Tz {
        self.config.timezone
    }

    /// Current wall-clock time in the engine's zone
    pub fn now(&self) -> DateTime<Tz> {
        now_in(self.config.timezone)
    }

    pub fn timers(&self) -> &TimerManager {
        &self.timers
    }

    pub fn appeals(&self) -> &AppealEngine {
        &self.appeals
    }

    pub fn narrative(&self) -> &NarrativeClient {
        &self.narrative
    }

    pub fn store_healthy(&self) -> bool {
        self.store.is_healthy()
    }

    /// Create or replace the subject's window starting at the next occurrence
    /// of `time` (today if still ahead, otherwise tomorrow).
    pub async fn set_restriction(
        &self,
        subject: &SubjectRef,
        time: &str,
        now: &DateTime<Tz>,
    ) -> Result<RestrictionWindow> {
        if self.config.is_exempt(subject.id) {
            return Err(CurfewError::Exempt(subject.id));
        }

        let time_of_day = parse_time_of_day(time).map_err(CurfewError::InvalidTime)?;
        let start_at = next_occurrence(&self.config.timezone, time_of_day, now).ok_or_else(|| {
            CurfewError::InvalidTime(format!("{} does not exist in {}", time, self.config.timezone))
        })?;
        let end_at = start_at + to_delta(self.config.grace_period);

        let _guard = self.locks.lock(subject.id).await;

        self.store
            .upsert(subject.id, &subject.display_name, start_at, end_at)?;

        // A replaced row keeps its original creation time
        let created_at = self
            .store
            .get(subject.id)
            .ok()
            .flatten()
            .map(|stored| stored.created_at)
            .unwrap_or(*now);
        let window = RestrictionWindow {
            subject_id: subject.id,
            display_name: subject.display_name.clone(),
            start_at,
            end_at,
            created_at,
        };
        self.timers.schedule_window(&window, now);
        self.appeals.reset(subject.id);
        self.monitor.forget(subject.id);

        info!(
            subject_id = %subject.id,
            start_at = %start_at,
            end_at = %end_at,
            "Curfew set"
        );
        Ok(window)
    }

    /// Delete the subject's window and everything derived from it
    pub async fn remove_restriction(&self, subject: SubjectId) -> Result<()> {
        let _guard = self.locks.lock(subject).await;

        if !self.store.remove(subject)? {
            return Err(CurfewError::NotFound(subject));
        }

        self.timers.cancel(subject);
        self.appeals.reset(subject);
        self.monitor.forget(subject);

        info!(subject_id = %subject, "Curfew removed");
        Ok(())
    }

    /// Delete every window, cancel every timer, forget all negotiation state
    pub async fn reset_all(&self) -> Result<()> {
        let _all = self.locks.lock_all().await;

        self.store.clear_all()?;
        let cancelled = self.timers.cancel_all();
        self.appeals.clear();
        self.monitor.clear();

        info!(cancelled, "All curfews reset");
        Ok(())
    }

    /// Windows that have not ended yet, earliest start first
    pub fn list_active(&self, now: &DateTime<Tz>) -> Result<Vec<RestrictionWindow>> {
        let mut windows: Vec<_> = self
            .store
            .list_all()?
            .into_iter()
            .filter(|w| w.end_at > *now)
            .collect();
        windows.sort_by_key(|w| w.start_at);
        Ok(windows)
    }

    /// Handle a presence transition reported by the bridge.
    ///
    /// Only entries count: `after` is set and differs from `before`. Leaving
    /// or staying put is ignored.
    pub async fn on_state_changed(
        &self,
        subject: &SubjectRef,
        before: Option<&str>,
        after: Option<&str>,
        at: &DateTime<Tz>,
    ) -> EnforcementOutcome {
        let entered = after.is_some() && before != after;
        if !entered {
            debug!(subject_id = %subject.id, "State change is not an entry, ignoring");
            return EnforcementOutcome::NoRestriction;
        }

        let verdict = {
            let _guard = self.locks.lock(subject.id).await;
            let verdict = self.monitor.evaluate(subject.id, at);
            if verdict == EntryVerdict::Expired {
                self.timers.cancel(subject.id);
                self.appeals.reset(subject.id);
            }
            verdict
        };

        match verdict {
            EntryVerdict::NoRestriction => EnforcementOutcome::NoRestriction,
            EntryVerdict::NotYetActive => EnforcementOutcome::NotYetActive,
            EntryVerdict::Expired => EnforcementOutcome::Expired,
            EntryVerdict::StoreUnavailable => EnforcementOutcome::StoreUnavailable,
            EntryVerdict::Enforce => self.monitor.enforce(subject, at).await,
        }
    }

    /// Run an appeal and compose the ruling text
    pub async fn appeal(
        &self,
        subject: &SubjectRef,
        reason: &str,
        now: &DateTime<Tz>,
    ) -> Result<AppealView> {
        let decision = {
            let _guard = self.locks.lock(subject.id).await;
            self.appeals.decide(subject, now)?
        };

        let text = self.appeals.ruling_text(&decision, reason, now).await;
        Ok(decision.to_view(text))
    }

    /// Rebuild timers from the store; see [`TimerManager::recover`]
    pub async fn recover(&self, now: &DateTime<Tz>) -> Result<RecoveryReport> {
        let _all = self.locks.lock_all().await;

        self.timers.recover(now).await.map_err(|e| {
            warn!(error = %e, "Recovery could not read the store");
            CurfewError::from(e)
        })
    }

    /// Cancel all timers and drop ephemeral state. The store is untouched.
    pub async fn shutdown(&self) {
        let _all = self.locks.lock_all().await;

        let cancelled = self.timers.cancel_all();
        self.appeals.clear();
        self.monitor.clear();
        info!(cancelled, "Curfew engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use chrono_tz::US::Pacific;
    use curfew_api::{AppealVerdict, ChannelHint, NotificationKind};
    use curfew_platform_api::MockPlatform;
    use curfew_store::{SqliteStore, StoreError, StoreResult};
    use curfew_util::ErrorKind;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Wraps a real store and fails writes on demand
    struct FlakyStore {
        inner: SqliteStore,
        fail_writes: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: SqliteStore::in_memory(Pacific).unwrap(),
                fail_writes: AtomicBool::new(false),
            }
        }

        fn check(&self) -> StoreResult<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                Err(StoreError::Io(std::io::Error::other("disk unavailable")))
            } else {
                Ok(())
            }
        }
    }

    impl RestrictionStore for FlakyStore {
        fn upsert(
            &self,
            subject_id: SubjectId,
            display_name: &str,
            start_at: DateTime<Tz>,
            end_at: DateTime<Tz>,
        ) -> StoreResult<()> {
            self.check()?;
            self.inner.upsert(subject_id, display_name, start_at, end_at)
        }

        fn get(&self, subject_id: SubjectId) -> StoreResult<Option<RestrictionWindow>> {
            self.inner.get(subject_id)
        }

        fn remove(&self, subject_id: SubjectId) -> StoreResult<bool> {
            self.check()?;
            self.inner.remove(subject_id)
        }

        fn list_all(&self) -> StoreResult<Vec<RestrictionWindow>> {
            self.inner.list_all()
        }

        fn clear_all(&self) -> StoreResult<()> {
            self.check()?;
            self.inner.clear_all()
        }

        fn is_healthy(&self) -> bool {
            !self.fail_writes.load(Ordering::SeqCst)
        }
    }

    struct Fixture {
        store: Arc<FlakyStore>,
        platform: Arc<MockPlatform>,
        engine: CurfewEngine,
    }

    fn fixture_with(config: EngineConfig) -> Fixture {
        let store = Arc::new(FlakyStore::new());
        let platform = Arc::new(MockPlatform::new());
        let engine = CurfewEngine::new(
            config,
            store.clone(),
            platform.clone(),
            Arc::new(NarrativeClient::disabled()),
        )
        .with_rng(StdRng::seed_from_u64(7));

        Fixture {
            store,
            platform,
            engine,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(EngineConfig::default())
    }

    fn owl() -> SubjectRef {
        SubjectRef::new(7u64, "owl")
    }

    fn at(hour: u32, minute: u32) -> DateTime<Tz> {
        Pacific.with_ymd_and_hms(2025, 1, 10, hour, minute, 0).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_before_time_is_today() {
        let f = fixture();
        let window = f
            .engine
            .set_restriction(&owl(), "11:30PM", &at(20, 0))
            .await
            .unwrap();

        assert_eq!(window.start_at, at(23, 30));
        assert_eq!(window.end_at, at(23, 35));
        assert!(f.engine.timers().is_scheduled(owl().id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_after_time_is_tomorrow() {
        let f = fixture();
        let window = f
            .engine
            .set_restriction(&owl(), "11:30 pm", &at(23, 45))
            .await
            .unwrap();

        assert_eq!(window.start_at, at(23, 30) + TimeDelta::days(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_replaces_single_window() {
        let f = fixture();
        let first = f
            .engine
            .set_restriction(&owl(), "11:30PM", &at(20, 0))
            .await
            .unwrap();
        let second = f
            .engine
            .set_restriction(&SubjectRef::new(7u64, "night owl"), "10:00PM", &at(20, 5))
            .await
            .unwrap();

        let all = f.store.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].display_name, "night owl");
        assert_eq!(all[0].start_at, at(22, 0));
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.created_at, all[0].created_at);
        assert_eq!(f.engine.timers().scheduled_count(), 1);
    }

    #[tokio::test]
    async fn test_set_rejects_bad_time() {
        let f = fixture();
        let err = f
            .engine
            .set_restriction(&owl(), "half past eleven", &at(20, 0))
            .await
            .unwrap_err();

        assert!(matches!(err, CurfewError::InvalidTime(_)));
        assert!(f.store.list_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_rejects_exempt_subject() {
        let mut config = EngineConfig::default();
        config.exempt.insert(owl().id);
        let f = fixture_with(config);

        let err = f
            .engine
            .set_restriction(&owl(), "11:30PM", &at(20, 0))
            .await
            .unwrap_err();

        assert!(matches!(err, CurfewError::Exempt(_)));
        assert!(!f.engine.timers().is_scheduled(owl().id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_leaves_no_timer() {
        let f = fixture();
        f.store.fail_writes.store(true, Ordering::SeqCst);

        let err = f
            .engine
            .set_restriction(&owl(), "11:30PM", &at(20, 0))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert!(!f.engine.timers().is_scheduled(owl().id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_cancels_timers() {
        let f = fixture();
        f.engine
            .set_restriction(&owl(), "11:30PM", &at(20, 0))
            .await
            .unwrap();

        f.engine.remove_restriction(owl().id).await.unwrap();

        assert!(!f.engine.timers().is_scheduled(owl().id));
        assert!(f.store.get(owl().id).unwrap().is_none());

        let err = f.engine.remove_restriction(owl().id).await.unwrap_err();
        assert!(matches!(err, CurfewError::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_failure_keeps_timers() {
        let f = fixture();
        f.engine
            .set_restriction(&owl(), "11:30PM", &at(20, 0))
            .await
            .unwrap();
        f.store.fail_writes.store(true, Ordering::SeqCst);

        let err = f.engine.remove_restriction(owl().id).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert!(f.engine.timers().is_scheduled(owl().id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_all_clears_everything() {
        let f = fixture();
        f.engine
            .set_restriction(&owl(), "11:30PM", &at(20, 0))
            .await
            .unwrap();
        f.engine
            .set_restriction(&SubjectRef::new(8u64, "lark"), "9:00PM", &at(20, 0))
            .await
            .unwrap();

        f.engine.reset_all().await.unwrap();

        assert!(f.store.list_all().unwrap().is_empty());
        assert_eq!(f.engine.timers().scheduled_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_active_skips_ended_windows() {
        let f = fixture();
        f.engine
            .set_restriction(&owl(), "11:30PM", &at(20, 0))
            .await
            .unwrap();
        f.store
            .upsert(SubjectId::new(8), "lark", at(18, 0), at(18, 5))
            .unwrap();

        let active = f.engine.list_active(&at(20, 0)).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].subject_id, owl().id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_during_window_is_enforced() {
        let f = fixture();
        f.engine
            .set_restriction(&owl(), "11:30PM", &at(20, 0))
            .await
            .unwrap();

        let outcome = f
            .engine
            .on_state_changed(&owl(), None, Some("voice"), &at(23, 31))
            .await;

        assert_eq!(outcome, EnforcementOutcome::Enforced { notified: true });
        assert_eq!(f.platform.exits(), vec![owl().id]);
        let notes = f.platform.notifications();
        assert_eq!(notes[0].channel, ChannelHint::General);
        assert_eq!(notes[0].kind, NotificationKind::Violation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_and_mute_are_not_entries() {
        let f = fixture();
        f.engine
            .set_restriction(&owl(), "11:30PM", &at(20, 0))
            .await
            .unwrap();

        let left = f
            .engine
            .on_state_changed(&owl(), Some("voice"), None, &at(23, 31))
            .await;
        let muted = f
            .engine
            .on_state_changed(&owl(), Some("voice"), Some("voice"), &at(23, 31))
            .await;

        assert_eq!(left, EnforcementOutcome::NoRestriction);
        assert_eq!(muted, EnforcementOutcome::NoRestriction);
        assert!(f.platform.exits().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_after_window_expires_it() {
        let f = fixture();
        f.engine
            .set_restriction(&owl(), "11:30PM", &at(20, 0))
            .await
            .unwrap();

        let outcome = f
            .engine
            .on_state_changed(&owl(), None, Some("voice"), &at(23, 40))
            .await;

        assert_eq!(outcome, EnforcementOutcome::Expired);
        assert!(f.store.get(owl().id).unwrap().is_none());
        assert!(f.platform.exits().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_appeal_grant_keeps_grace_and_resets_on_set() {
        let mut config = EngineConfig::default();
        config.appeals.grant_probability = 1.0;
        let f = fixture_with(config);
        f.engine
            .set_restriction(&owl(), "11:30PM", &at(20, 0))
            .await
            .unwrap();

        let view = f
            .engine
            .appeal(&owl(), "one more game", &at(23, 20))
            .await
            .unwrap();

        assert!(view.granted());
        assert_eq!(view.attempts_remaining, 1);
        match view.verdict {
            AppealVerdict::Granted { extension, window } => {
                assert_eq!(extension, Duration::from_secs(15 * 60));
                assert_eq!(window.start_at, at(23, 45).fixed_offset());
                assert_eq!(window.end_at, at(23, 50).fixed_offset());
            }
            AppealVerdict::Denied => panic!("expected a grant"),
        }
        assert!(view.ruling.starts_with("Appeal granted! Your curfew now starts at 11:45 PM PST."));

        f.engine
            .set_restriction(&owl(), "11:30PM", &at(23, 21))
            .await
            .unwrap();
        assert_eq!(f.engine.appeals().state(owl().id).attempts_used, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_appeal_store_failure_commits_nothing() {
        let mut config = EngineConfig::default();
        config.appeals.grant_probability = 1.0;
        let f = fixture_with(config);
        f.engine
            .set_restriction(&owl(), "11:30PM", &at(20, 0))
            .await
            .unwrap();
        f.store.fail_writes.store(true, Ordering::SeqCst);

        let err = f
            .engine
            .appeal(&owl(), "please", &at(23, 20))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Persistence);
        assert_eq!(f.engine.appeals().state(owl().id).attempts_used, 0);
        assert_eq!(f.store.get(owl().id).unwrap().unwrap().start_at, at(23, 30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_is_idempotent() {
        let f = fixture();
        f.store
            .upsert(owl().id, "owl", at(23, 30), at(23, 35))
            .unwrap();
        f.store
            .upsert(SubjectId::new(8), "lark", at(18, 0), at(18, 5))
            .unwrap();

        let first = f.engine.recover(&at(20, 0)).await.unwrap();
        let second = f.engine.recover(&at(20, 0)).await.unwrap();

        assert_eq!(
            first,
            RecoveryReport {
                expired: 1,
                enforced: 0,
                scheduled: 1
            }
        );
        assert_eq!(second.scheduled, 1);
        assert_eq!(second.expired, 0);
        assert_eq!(f.engine.timers().scheduled_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_timers_and_keeps_store() {
        let f = fixture();
        f.engine
            .set_restriction(&owl(), "11:30PM", &at(20, 0))
            .await
            .unwrap();

        f.engine.shutdown().await;

        assert_eq!(f.engine.timers().scheduled_count(), 0);
        assert!(f.store.get(owl().id).unwrap().is_some());
    }
}
