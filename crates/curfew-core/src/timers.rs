//! Per-subject deferred actions
//!
//! Each scheduled window owns an enforce timer and an optional reminder timer.
//! Timers live only in memory; [`TimerManager::recover`] rebuilds them from
//! the store after a restart or a bridge reconnect.

use chrono::DateTime;
use chrono_tz::Tz;
use curfew_api::{ChannelHint, Notification, NotificationKind, RecoveryReport, SubjectRef};
use curfew_platform_api::Platform;
use curfew_store::{RestrictionStore, RestrictionWindow, StoreResult, WindowPhase};
use curfew_util::{now_in, saturating_until, SubjectId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{Category, NarrativeClient};

/// One-shot task that runs `action` after `delay` unless cancelled first
struct DeferredTask(JoinHandle<()>);

impl DeferredTask {
    fn spawn<F>(delay: Duration, action: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        }))
    }

    fn cancel(&self) {
        self.0.abort();
    }
}

struct TimerHandle {
    generation: u64,
    enforce: DeferredTask,
    reminder: Option<DeferredTask>,
}

impl TimerHandle {
    fn cancel(&self) {
        self.enforce.cancel();
        if let Some(reminder) = &self.reminder {
            reminder.cancel();
        }
    }
}

type TimerMap = Arc<Mutex<HashMap<SubjectId, TimerHandle>>>;

fn lock_map(
    map: &Mutex<HashMap<SubjectId, TimerHandle>>,
) -> MutexGuard<'_, HashMap<SubjectId, TimerHandle>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory scheduler of reminders and enforcement
pub struct TimerManager {
    store: Arc<dyn RestrictionStore>,
    platform: Arc<dyn Platform>,
    narrative: Arc<NarrativeClient>,
    reminder_lead: Duration,
    tz: Tz,
    timers: TimerMap,
    next_generation: AtomicU64,
}

impl TimerManager {
    pub fn new(
        store: Arc<dyn RestrictionStore>,
        platform: Arc<dyn Platform>,
        narrative: Arc<NarrativeClient>,
        reminder_lead: Duration,
        tz: Tz,
    ) -> Self {
        Self {
            store,
            platform,
            narrative,
            reminder_lead,
            tz,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Schedule enforcement after `delay_to_enforce` and, if non-zero, a
    /// reminder after `delay_to_remind`. Supersedes any existing timers.
    pub fn schedule(
        &self,
        subject: &SubjectRef,
        delay_to_enforce: Duration,
        delay_to_remind: Duration,
    ) {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let subject_id = subject.id;

        // Held across spawn so a zero-delay task cannot run before it is registered
        let mut timers = lock_map(&self.timers);

        let enforce = DeferredTask::spawn(
            delay_to_enforce,
            fire_enforce(
                self.timers.clone(),
                self.platform.clone(),
                subject_id,
                generation,
            ),
        );

        let reminder = (!delay_to_remind.is_zero()).then(|| {
            DeferredTask::spawn(
                delay_to_remind,
                fire_reminder(
                    self.timers.clone(),
                    self.platform.clone(),
                    self.narrative.clone(),
                    subject.clone(),
                    generation,
                    self.reminder_lead,
                    self.tz,
                ),
            )
        });

        let has_reminder = reminder.is_some();
        let previous = timers.insert(
            subject_id,
            TimerHandle {
                generation,
                enforce,
                reminder,
            },
        );
        drop(timers);
        if let Some(previous) = previous {
            previous.cancel();
        }

        debug!(
            subject_id = %subject_id,
            generation,
            enforce_in_secs = delay_to_enforce.as_secs(),
            reminder = has_reminder,
            "Timers scheduled"
        );
    }

    /// Schedule from absolute timestamps, measured from `now`
    pub fn schedule_window(&self, window: &RestrictionWindow, now: &DateTime<Tz>) {
        let delay_to_enforce = saturating_until(now, &window.start_at);
        let delay_to_remind = if self.reminder_lead.is_zero() {
            Duration::ZERO
        } else {
            delay_to_enforce.saturating_sub(self.reminder_lead)
        };

        let subject = SubjectRef::new(window.subject_id, window.display_name.clone());
        self.schedule(&subject, delay_to_enforce, delay_to_remind);
    }

    /// Cancel both timers for `subject`. No-op if none are scheduled.
    pub fn cancel(&self, subject: SubjectId) -> bool {
        match lock_map(&self.timers).remove(&subject) {
            Some(handle) => {
                handle.cancel();
                debug!(subject_id = %subject, "Timers cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every timer; returns how many subjects had timers
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<TimerHandle> = lock_map(&self.timers).drain().map(|(_, h)| h).collect();
        for handle in &drained {
            handle.cancel();
        }
        drained.len()
    }

    pub fn is_scheduled(&self, subject: SubjectId) -> bool {
        lock_map(&self.timers).contains_key(&subject)
    }

    pub fn scheduled_count(&self) -> usize {
        lock_map(&self.timers).len()
    }

    /// Rebuild timers from the store.
    ///
    /// Ended windows are deleted, windows in progress are enforced right away
    /// (no timer), and future windows get fresh timers. Safe to run repeatedly.
    pub async fn recover(&self, now: &DateTime<Tz>) -> StoreResult<RecoveryReport> {
        let windows = self.store.list_all()?;
        let mut report = RecoveryReport::default();

        for window in windows {
            let subject_id = window.subject_id;
            match window.phase(now) {
                WindowPhase::Expired => {
                    self.cancel(subject_id);
                    match self.store.remove(subject_id) {
                        Ok(_) => {
                            report.expired += 1;
                            info!(subject_id = %subject_id, "Expired window removed during recovery");
                        }
                        Err(e) => {
                            warn!(subject_id = %subject_id, error = %e, "Failed to remove expired window")
                        }
                    }
                }
                WindowPhase::Active => {
                    self.cancel(subject_id);
                    if self.platform.is_in_monitored_state(subject_id) {
                        match self.platform.force_exit(subject_id).await {
                            Ok(()) => {
                                report.enforced += 1;
                                info!(subject_id = %subject_id, "Enforced active window during recovery");
                            }
                            Err(e) => {
                                warn!(subject_id = %subject_id, error = %e, "Force exit failed during recovery")
                            }
                        }
                    }
                }
                WindowPhase::Pending => {
                    self.schedule_window(&window, now);
                    report.scheduled += 1;
                }
            }
        }

        info!(
            expired = report.expired,
            enforced = report.enforced,
            scheduled = report.scheduled,
            "Recovery complete"
        );
        Ok(report)
    }
}

/// Enforce timer body: claim the handle, then act
async fn fire_enforce(
    timers: TimerMap,
    platform: Arc<dyn Platform>,
    subject: SubjectId,
    generation: u64,
) {
    let claimed = {
        let mut map = lock_map(&timers);
        match map.get(&subject) {
            Some(handle) if handle.generation == generation => map.remove(&subject).is_some(),
            _ => false,
        }
    };
    if !claimed {
        debug!(subject_id = %subject, generation, "Stale enforce timer ignored");
        return;
    }

    if !platform.is_in_monitored_state(subject) {
        debug!(subject_id = %subject, "Curfew started, subject not present");
        return;
    }

    match platform.force_exit(subject).await {
        Ok(()) => info!(subject_id = %subject, "Curfew started, subject removed"),
        Err(e) => warn!(subject_id = %subject, error = %e, "Force exit failed at curfew start"),
    }
}

async fn fire_reminder(
    timers: TimerMap,
    platform: Arc<dyn Platform>,
    narrative: Arc<NarrativeClient>,
    subject: SubjectRef,
    generation: u64,
    lead: Duration,
    tz: Tz,
) {
    let current = lock_map(&timers)
        .get(&subject.id)
        .is_some_and(|h| h.generation == generation);
    if !current {
        return;
    }

    let flavor = narrative
        .flavor(Category::Reminder, &subject.display_name, &now_in(tz))
        .await;
    let notification = Notification {
        channel: ChannelHint::Reminders,
        kind: NotificationKind::Reminder,
        subject: Some(subject.id),
        text: format!("your curfew is in {}! {}", describe_lead(lead), flavor),
    };

    match platform.notify(notification).await {
        Ok(()) => info!(subject_id = %subject.id, "Curfew reminder sent"),
        Err(e) => warn!(subject_id = %subject.id, error = %e, "Failed to send curfew reminder"),
    }
}

/// "5 minutes", "1 minute", "90 seconds"
fn describe_lead(lead: Duration) -> String {
    let secs = lead.as_secs();
    match (secs / 60, secs % 60) {
        (1, 0) => "1 minute".to_string(),
        (m, 0) => format!("{} minutes", m),
        _ => format!("{} seconds", secs),
    }
}
