//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Process-level settings
    #[serde(default)]
    pub daemon: RawDaemonConfig,

    /// Window timing and exemptions
    #[serde(default)]
    pub restrictions: RawRestrictions,

    /// Appeal negotiation
    #[serde(default)]
    pub appeals: RawAppeals,

    /// Enforcement notifications
    #[serde(default)]
    pub notifications: RawNotifications,

    /// Optional text generation service
    #[serde(default)]
    pub narrative: RawNarrative,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            config_version: crate::CURRENT_CONFIG_VERSION,
            daemon: RawDaemonConfig::default(),
            restrictions: RawRestrictions::default(),
            appeals: RawAppeals::default(),
            notifications: RawNotifications::default(),
            narrative: RawNarrative::default(),
        }
    }
}

/// Daemon-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawDaemonConfig {
    /// Bridge socket path (default: $XDG_RUNTIME_DIR/curfewd/curfewd.sock)
    pub socket_path: Option<PathBuf>,

    /// Data directory for the window database
    pub data_dir: Option<PathBuf>,

    /// IANA zone all wall-clock times are interpreted in (default: US/Pacific)
    pub timezone: Option<String>,

    /// Health endpoint bind address (default: 127.0.0.1)
    pub health_host: Option<String>,

    /// Health endpoint port (default: 8080, 0 disables)
    pub health_port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawRestrictions {
    /// How long after the start the window stays active
    pub grace_period_seconds: Option<u64>,

    /// Reminder lead before the start (0 disables reminders)
    pub reminder_lead_seconds: Option<u64>,

    /// Subjects that can never be restricted
    #[serde(default)]
    pub exempt_subjects: Vec<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawAppeals {
    /// How long before the start appeals open
    pub lead_seconds: Option<u64>,

    /// Minimum spacing between two attempts
    pub cooldown_seconds: Option<u64>,

    /// Attempts per window
    pub max_attempts: Option<u32>,

    /// Chance that an attempt is granted, 0.0..=1.0
    pub grant_probability: Option<f64>,

    /// Extension granted by attempt index, in minutes
    pub extension_minutes: Option<Vec<u64>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawNotifications {
    /// At most one violation notice per subject per cooldown
    pub cooldown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawNarrative {
    /// OpenAI-compatible chat completions URL; unset disables generation
    pub endpoint: Option<String>,

    pub model: Option<String>,

    /// Environment variable holding the API key
    pub api_key_env: Option<String>,

    pub daily_quota: Option<u32>,

    pub timeout_ms: Option<u64>,

    pub max_input_chars: Option<usize>,

    pub max_output_chars: Option<usize>,
}
