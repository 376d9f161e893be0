//! Appeal negotiation
//!
//! A subject may ask to push their window back during the lead-up to its
//! start. Guards run in a fixed order and the first failing guard rejects the
//! appeal without touching anything. An appeal that passes every guard draws
//! an outcome; a grant moves the window and reschedules its timers.
//!
//! Negotiation state is per window and in memory only.

use chrono::DateTime;
use chrono_tz::Tz;
use curfew_api::{AppealVerdict, AppealView, SubjectRef};
use curfew_config::AppealPolicy;
use curfew_store::{RestrictionStore, RestrictionWindow, WindowPhase};
use curfew_util::{
    format_clock_time, saturating_until, to_delta, CurfewError, Result, SubjectId,
};
use rand::distributions::{Bernoulli, Distribution};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::info;

use crate::{Category, NarrativeClient, TimerManager};

/// Ephemeral per-subject negotiation state
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AppealState {
    pub attempts_used: u32,
    pub last_attempt_at: Option<DateTime<Tz>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ruling {
    Granted { extension: Duration },
    Denied,
}

/// Outcome of an appeal that passed every guard
#[derive(Debug, Clone)]
pub struct AppealDecision {
    pub ruling: Ruling,
    /// The subject's window after the ruling
    pub window: RestrictionWindow,
    pub attempts_remaining: u32,
}

impl AppealDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self.ruling, Ruling::Granted { .. })
    }

    pub fn to_view(&self, ruling_text: String) -> AppealView {
        let verdict = match self.ruling {
            Ruling::Granted { extension } => AppealVerdict::Granted {
                extension,
                window: self.window.to_view(),
            },
            Ruling::Denied => AppealVerdict::Denied,
        };

        AppealView {
            subject_id: self.window.subject_id,
            verdict,
            ruling: ruling_text,
            attempts_remaining: self.attempts_remaining,
        }
    }
}

pub struct AppealEngine {
    store: Arc<dyn RestrictionStore>,
    timers: Arc<TimerManager>,
    narrative: Arc<NarrativeClient>,
    policy: AppealPolicy,
    grace_period: Duration,
    states: Mutex<HashMap<SubjectId, AppealState>>,
    rng: Mutex<StdRng>,
}

impl AppealEngine {
    pub fn new(
        store: Arc<dyn RestrictionStore>,
        timers: Arc<TimerManager>,
        narrative: Arc<NarrativeClient>,
        policy: AppealPolicy,
        grace_period: Duration,
    ) -> Self {
        Self {
            store,
            timers,
            narrative,
            policy,
            grace_period,
            states: Mutex::new(HashMap::new()),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replace the outcome source (seeded for tests)
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    fn states(&self) -> MutexGuard<'_, HashMap<SubjectId, AppealState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self, subject: SubjectId) -> AppealState {
        self.states().get(&subject).copied().unwrap_or_default()
    }

    /// Run the guards, draw an outcome and apply it.
    ///
    /// Must run inside the subject's critical section. Counters are committed
    /// only after the store accepted a granted window.
    pub fn decide(&self, subject: &SubjectRef, now: &DateTime<Tz>) -> Result<AppealDecision> {
        let window = self
            .store
            .get(subject.id)?
            .filter(|w| w.phase(now) != WindowPhase::Expired)
            .ok_or(CurfewError::NoActiveRestriction)?;

        let opens_at = window.start_at - to_delta(self.policy.lead);
        if *now < opens_at {
            return Err(CurfewError::AppealTooEarly { opens_at });
        }
        if *now >= window.start_at {
            return Err(CurfewError::AppealTooLate);
        }

        let state = self.state(subject.id);
        if state.attempts_used >= self.policy.max_attempts {
            return Err(CurfewError::AppealsExhausted);
        }

        if let Some(last) = state.last_attempt_at {
            let ready_at = last + to_delta(self.policy.cooldown);
            if *now < ready_at {
                return Err(CurfewError::AppealRateLimited {
                    retry_after: saturating_until(now, &ready_at),
                });
            }
        }

        let (ruling, window) = if self.roll()? {
            let extension = self.policy.extension_for(state.attempts_used);
            let start_at = window.start_at + to_delta(extension);
            let end_at = start_at + to_delta(self.grace_period);

            self.store
                .upsert(subject.id, &subject.display_name, start_at, end_at)?;

            let moved = RestrictionWindow {
                display_name: subject.display_name.clone(),
                start_at,
                end_at,
                ..window
            };
            self.timers.cancel(subject.id);
            self.timers.schedule_window(&moved, now);

            (Ruling::Granted { extension }, moved)
        } else {
            (Ruling::Denied, window)
        };

        let attempts_used = state.attempts_used + 1;
        self.states().insert(
            subject.id,
            AppealState {
                attempts_used,
                last_attempt_at: Some(*now),
            },
        );

        let attempts_remaining = self.policy.max_attempts.saturating_sub(attempts_used);
        info!(
            subject_id = %subject.id,
            granted = matches!(ruling, Ruling::Granted { .. }),
            attempts_remaining,
            start_at = %window.start_at,
            "Appeal ruled"
        );

        Ok(AppealDecision {
            ruling,
            window,
            attempts_remaining,
        })
    }

    /// Text shown to the subject: the facts, then generated or fallback flavor
    pub async fn ruling_text(
        &self,
        decision: &AppealDecision,
        reason: &str,
        now: &DateTime<Tz>,
    ) -> String {
        let (category, facts) = match decision.ruling {
            Ruling::Granted { .. } => (
                Category::AppealGranted,
                format!(
                    "Appeal granted! Your curfew now starts at {}.",
                    format_clock_time(&decision.window.start_at)
                ),
            ),
            Ruling::Denied => (
                Category::AppealDenied,
                format!(
                    "Appeal denied. Your curfew still starts at {}.",
                    format_clock_time(&decision.window.start_at)
                ),
            ),
        };

        let remaining = match decision.attempts_remaining {
            0 => "No appeals left.".to_string(),
            1 => "1 appeal left.".to_string(),
            n => format!("{} appeals left.", n),
        };

        let flavor = self.narrative.flavor(category, reason, now).await;
        format!("{} {} {}", facts, remaining, flavor)
    }

    /// Forget negotiation state, e.g. when the window is replaced
    pub fn reset(&self, subject: SubjectId) {
        self.states().remove(&subject);
    }

    pub fn clear(&self) {
        self.states().clear();
    }

    fn roll(&self) -> Result<bool> {
        let dist = Bernoulli::new(self.policy.grant_probability)
            .map_err(|e| CurfewError::internal(format!("invalid grant probability: {}", e)))?;
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(dist.sample(&mut *rng))
    }
}
