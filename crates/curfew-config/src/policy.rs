//! Validated policy structures

use crate::schema::{RawAppeals, RawConfig, RawDaemonConfig, RawNarrative, RawRestrictions};
use crate::validation::parse_timezone;
use chrono_tz::Tz;
use curfew_util::{data_dir_without_env, socket_path_without_env, SubjectId};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::US::Pacific;
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_REMINDER_LEAD: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_APPEAL_LEAD: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_APPEAL_COOLDOWN: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_APPEALS: u32 = 2;
pub const DEFAULT_GRANT_PROBABILITY: f64 = 0.60;
pub const DEFAULT_EXTENSION_MINUTES: [u64; 2] = [15, 10];
pub const DEFAULT_NOTIFICATION_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Validated policy ready for use by the daemon
#[derive(Debug, Clone)]
pub struct Policy {
    pub daemon: DaemonConfig,
    pub engine: EngineConfig,
    pub narrative: NarrativeConfig,
}

impl Policy {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let timezone = raw
            .daemon
            .timezone
            .as_deref()
            .and_then(parse_timezone)
            .unwrap_or(DEFAULT_TIMEZONE);

        Self {
            daemon: DaemonConfig::from_raw(raw.daemon),
            engine: EngineConfig::from_raw(
                timezone,
                raw.restrictions,
                raw.appeals,
                raw.notifications.cooldown_seconds,
            ),
            narrative: NarrativeConfig::from_raw(raw.narrative),
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::from_raw(RawConfig::default())
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
    pub health_host: String,
    /// 0 disables the HTTP health endpoint
    pub health_port: u16,
}

impl DaemonConfig {
    fn from_raw(raw: RawDaemonConfig) -> Self {
        Self {
            socket_path: raw.socket_path.unwrap_or_else(socket_path_without_env),
            data_dir: raw.data_dir.unwrap_or_else(data_dir_without_env),
            health_host: raw.health_host.unwrap_or_else(|| "127.0.0.1".into()),
            health_port: raw.health_port.unwrap_or(8080),
        }
    }
}

/// Everything the restriction engine needs, fixed for the process lifetime
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub timezone: Tz,
    /// `end_at = start_at + grace_period`
    pub grace_period: Duration,
    /// Zero disables reminders
    pub reminder_lead: Duration,
    pub exempt: HashSet<SubjectId>,
    pub appeals: AppealPolicy,
    pub notification_cooldown: Duration,
}

impl EngineConfig {
    fn from_raw(
        timezone: Tz,
        restrictions: RawRestrictions,
        appeals: RawAppeals,
        notification_cooldown_seconds: Option<u64>,
    ) -> Self {
        Self {
            timezone,
            grace_period: restrictions
                .grace_period_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_GRACE_PERIOD),
            reminder_lead: restrictions
                .reminder_lead_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_REMINDER_LEAD),
            exempt: restrictions
                .exempt_subjects
                .into_iter()
                .map(SubjectId::new)
                .collect(),
            appeals: AppealPolicy::from_raw(appeals),
            notification_cooldown: notification_cooldown_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_NOTIFICATION_COOLDOWN),
        }
    }

    pub fn is_exempt(&self, subject: SubjectId) -> bool {
        self.exempt.contains(&subject)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_raw(
            DEFAULT_TIMEZONE,
            RawRestrictions::default(),
            RawAppeals::default(),
            None,
        )
    }
}

/// Appeal negotiation limits
#[derive(Debug, Clone)]
pub struct AppealPolicy {
    /// Appeals open this long before the start
    pub lead: Duration,
    pub cooldown: Duration,
    pub max_attempts: u32,
    pub grant_probability: f64,
    /// Non-empty, indexed by attempt number
    pub extensions: Vec<Duration>,
}

impl AppealPolicy {
    fn from_raw(raw: RawAppeals) -> Self {
        let extensions = raw
            .extension_minutes
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_EXTENSION_MINUTES.to_vec())
            .into_iter()
            .map(|m| Duration::from_secs(m * 60))
            .collect();

        Self {
            lead: raw
                .lead_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_APPEAL_LEAD),
            cooldown: raw
                .cooldown_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_APPEAL_COOLDOWN),
            max_attempts: raw.max_attempts.unwrap_or(DEFAULT_MAX_APPEALS),
            grant_probability: raw
                .grant_probability
                .unwrap_or(DEFAULT_GRANT_PROBABILITY)
                .clamp(0.0, 1.0),
            extensions,
        }
    }

    /// Extension for the attempt at `index`; past the end, the last entry repeats.
    pub fn extension_for(&self, index: u32) -> Duration {
        self.extensions
            .get(index as usize)
            .or_else(|| self.extensions.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for AppealPolicy {
    fn default() -> Self {
        Self::from_raw(RawAppeals::default())
    }
}

/// Text generation settings
#[derive(Debug, Clone)]
pub struct NarrativeConfig {
    /// None disables generation; every line comes from the fallback pool
    pub endpoint: Option<String>,
    pub model: String,
    pub api_key_env: String,
    pub daily_quota: u32,
    pub timeout: Duration,
    pub max_input_chars: usize,
    pub max_output_chars: usize,
}

impl NarrativeConfig {
    fn from_raw(raw: RawNarrative) -> Self {
        Self {
            endpoint: raw.endpoint,
            model: raw.model.unwrap_or_else(|| "gpt-4o-mini".into()),
            api_key_env: raw.api_key_env.unwrap_or_else(|| "CURFEW_NARRATIVE_API_KEY".into()),
            daily_quota: raw.daily_quota.unwrap_or(200),
            timeout: Duration::from_millis(raw.timeout_ms.unwrap_or(3000)),
            max_input_chars: raw.max_input_chars.unwrap_or(200),
            max_output_chars: raw.max_output_chars.unwrap_or(280),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self::from_raw(RawNarrative::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = Policy::default();
        let engine = &policy.engine;

        assert_eq!(engine.timezone, chrono_tz::US::Pacific);
        assert_eq!(engine.grace_period, Duration::from_secs(300));
        assert_eq!(engine.reminder_lead, Duration::from_secs(300));
        assert_eq!(engine.appeals.lead, Duration::from_secs(900));
        assert_eq!(engine.appeals.cooldown, Duration::from_secs(60));
        assert_eq!(engine.appeals.max_attempts, 2);
        assert!((engine.appeals.grant_probability - 0.60).abs() < f64::EPSILON);
        assert_eq!(
            engine.appeals.extensions,
            vec![Duration::from_secs(900), Duration::from_secs(600)]
        );
        assert_eq!(engine.notification_cooldown, Duration::from_secs(300));

        assert!(!policy.narrative.is_enabled());
        assert_eq!(policy.narrative.daily_quota, 200);
        assert_eq!(policy.narrative.timeout, Duration::from_secs(3));
        assert_eq!(policy.narrative.max_input_chars, 200);
        assert_eq!(policy.narrative.max_output_chars, 280);

        assert_eq!(policy.daemon.health_host, "127.0.0.1");
        assert_eq!(policy.daemon.health_port, 8080);
    }

    #[test]
    fn test_extension_past_schedule_reuses_last() {
        let appeals = AppealPolicy::default();
        assert_eq!(appeals.extension_for(0), Duration::from_secs(900));
        assert_eq!(appeals.extension_for(1), Duration::from_secs(600));
        assert_eq!(appeals.extension_for(2), Duration::from_secs(600));
        assert_eq!(appeals.extension_for(7), Duration::from_secs(600));
    }

    #[test]
    fn test_exempt_subjects() {
        let raw: RawConfig = toml::from_str(
            r#"
            config_version = 1
            [restrictions]
            exempt_subjects = [427696914880790538]
            "#,
        )
        .unwrap();
        let policy = Policy::from_raw(raw);

        assert!(policy.engine.is_exempt(SubjectId::new(427696914880790538)));
        assert!(!policy.engine.is_exempt(SubjectId::new(1)));
    }
}
