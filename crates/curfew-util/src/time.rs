//! Time utilities for curfewd
//!
//! All wall-clock reasoning happens in the configured timezone, not the host's
//! local zone, so a window set for "11:30 PM" means 11:30 PM where the
//! community lives regardless of where the daemon runs.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `CURFEW_MOCK_TIME` environment variable can be set
//! to override the system time for all time-sensitive operations. The value is
//! read as host-local time and then advances at the normal rate.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-12-25 23:25:00`)
//!
//! Example:
//! ```bash
//! CURFEW_MOCK_TIME="2025-12-25 23:25:00" curfewd
//! ```

use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "CURFEW_MOCK_TIME";

/// Display format used in every user-facing time ("11:30 PM PST")
pub const CLOCK_FORMAT: &str = "%I:%M %p %Z";

static MOCK_TIME_OFFSET: OnceLock<Option<TimeDelta>> = OnceLock::new();

#[allow(clippy::disallowed_methods)] // This is the internal implementation that wraps Utc::now()
fn get_mock_time_offset() -> Option<TimeDelta> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            if let Ok(mock_time_str) = std::env::var(MOCK_TIME_ENV_VAR) {
                match NaiveDateTime::parse_from_str(&mock_time_str, "%Y-%m-%d %H:%M:%S") {
                    Ok(naive_dt) => {
                        if let Some(mock_dt) = Local.from_local_datetime(&naive_dt).single() {
                            let offset = mock_dt.signed_duration_since(Utc::now());
                            tracing::info!(
                                mock_time = %mock_time_str,
                                offset_secs = offset.num_seconds(),
                                "Mock time enabled"
                            );
                            return Some(offset);
                        }
                        tracing::warn!(
                            mock_time = %mock_time_str,
                            "Failed to convert mock time to local timezone"
                        );
                    }
                    Err(_) => {
                        tracing::warn!(
                            mock_time = %mock_time_str,
                            expected_format = "%Y-%m-%d %H:%M:%S",
                            "Invalid mock time format"
                        );
                    }
                }
            }
            None
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Current instant, respecting mock time in debug builds.
#[allow(clippy::disallowed_methods)] // This is the wrapper that provides mock time support
pub fn now_utc() -> DateTime<Utc> {
    let real_now = Utc::now();
    match get_mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// Current instant expressed in `tz`.
pub fn now_in(tz: Tz) -> DateTime<Tz> {
    now_utc().with_timezone(&tz)
}

/// Parse an administrator-supplied time of day.
///
/// Accepts `11:30PM`, `11:30 PM`, `11:30 pm` and 24-hour `23:30`.
pub fn parse_time_of_day(input: &str) -> Result<NaiveTime, String> {
    let compact: String = input.split_whitespace().collect::<String>().to_uppercase();
    if compact.is_empty() {
        return Err("Expected a time like 11:30PM".into());
    }

    if compact.ends_with("AM") || compact.ends_with("PM") {
        return NaiveTime::parse_from_str(&compact, "%I:%M%p")
            .map_err(|_| format!("Invalid 12-hour time '{}'", input.trim()));
    }

    NaiveTime::parse_from_str(&compact, "%H:%M")
        .map_err(|_| format!("Invalid time '{}', use 11:30PM or 23:30", input.trim()))
}

/// Map a naive local datetime onto `tz`.
///
/// Ambiguous times (DST fall-back) resolve to the earlier instant; times that
/// fall in a DST gap are pushed forward by an hour.
pub fn resolve_local(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + TimeDelta::hours(1))).earliest())
}

/// Next instant strictly after `now` whose local time of day is `time`.
///
/// Today if `time` is still ahead, otherwise tomorrow.
pub fn next_occurrence(tz: &Tz, time: NaiveTime, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let today = now.date_naive();
    let candidate = resolve_local(tz, today.and_time(time))?;
    if candidate > *now {
        return Some(candidate);
    }

    let tomorrow = today.succ_opt()?;
    resolve_local(tz, tomorrow.and_time(time))
}

/// Convert a std duration to a chrono delta, saturating on overflow.
pub fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

/// Duration from `from` until `to`, or zero if `to` is not after `from`.
pub fn saturating_until(from: &DateTime<Tz>, to: &DateTime<Tz>) -> Duration {
    to.signed_duration_since(*from)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Format a DateTime the way users see it ("11:30 PM PST").
pub fn format_clock_time(dt: &DateTime<Tz>) -> String {
    dt.format(CLOCK_FORMAT).to_string()
}

/// Helper to format durations in human-readable form
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use chrono_tz::US::Pacific;

    fn pacific(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Tz> {
        Pacific.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_parse_time_of_day_formats() {
        let expected = NaiveTime::from_hms_opt(23, 30, 0).unwrap();
        assert_eq!(parse_time_of_day("11:30PM").unwrap(), expected);
        assert_eq!(parse_time_of_day("11:30 PM").unwrap(), expected);
        assert_eq!(parse_time_of_day("11:30pm").unwrap(), expected);
        assert_eq!(parse_time_of_day("23:30").unwrap(), expected);
        assert_eq!(
            parse_time_of_day("9:05AM").unwrap(),
            NaiveTime::from_hms_opt(9, 5, 0).unwrap()
        );
        assert_eq!(
            parse_time_of_day("12:00 AM").unwrap(),
            NaiveTime::from_hms_opt(0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_time_of_day_rejects_garbage() {
        for input in ["", "tonight", "25:00", "13:30PM", "11:61PM", "11PM"] {
            assert!(
                parse_time_of_day(input).is_err(),
                "Expected '{}' to be rejected",
                input
            );
        }
    }

    #[test]
    fn test_next_occurrence_later_today() {
        let now = pacific(2025, 3, 1, 20, 0);
        let time = NaiveTime::from_hms_opt(23, 30, 0).unwrap();
        let next = next_occurrence(&Pacific, time, &now).unwrap();
        assert_eq!(next, pacific(2025, 3, 1, 23, 30));
    }

    #[test]
    fn test_next_occurrence_rolls_to_tomorrow() {
        let time = NaiveTime::from_hms_opt(23, 30, 0).unwrap();

        let at_exact = pacific(2025, 3, 1, 23, 30);
        assert_eq!(
            next_occurrence(&Pacific, time, &at_exact).unwrap(),
            pacific(2025, 3, 2, 23, 30)
        );

        let after = pacific(2025, 3, 1, 23, 45);
        assert_eq!(
            next_occurrence(&Pacific, time, &after).unwrap(),
            pacific(2025, 3, 2, 23, 30)
        );
    }

    #[test]
    fn test_next_occurrence_crosses_month_boundary() {
        let now = pacific(2025, 1, 31, 23, 50);
        let time = NaiveTime::from_hms_opt(0, 15, 0).unwrap();
        let next = next_occurrence(&Pacific, time, &now).unwrap();
        assert_eq!(next, pacific(2025, 2, 1, 0, 15));
    }

    #[test]
    fn test_resolve_local_dst_gap_moves_forward() {
        // 2025-03-09 02:30 does not exist in US/Pacific
        let naive = chrono::NaiveDate::from_ymd_opt(2025, 3, 9)
            .unwrap()
            .and_hms_opt(2, 30, 0)
            .unwrap();
        let resolved = resolve_local(&Pacific, naive).unwrap();
        assert_eq!(resolved.hour(), 3);
        assert_eq!(resolved.minute(), 30);
    }

    #[test]
    fn test_saturating_until() {
        let a = pacific(2025, 3, 1, 20, 0);
        let b = pacific(2025, 3, 1, 20, 5);
        assert_eq!(saturating_until(&a, &b), Duration::from_secs(300));
        assert_eq!(saturating_until(&b, &a), Duration::ZERO);

        let utc = b.with_timezone(&chrono_tz::UTC);
        assert_eq!(saturating_until(&a, &utc), Duration::from_secs(300));
    }

    #[test]
    fn test_format_clock_time() {
        let dt = pacific(2025, 1, 10, 23, 30);
        assert_eq!(format_clock_time(&dt), "11:30 PM PST");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m 1s");
    }

    #[test]
    fn test_now_in_uses_requested_zone() {
        let now = now_in(Pacific);
        assert_eq!(now.timezone(), Pacific);
    }

    #[test]
    fn test_mock_time_env_var_name() {
        assert_eq!(MOCK_TIME_ENV_VAR, "CURFEW_MOCK_TIME");
        assert!(NaiveDateTime::parse_from_str("2025-12-25 23:25:00", "%Y-%m-%d %H:%M:%S").is_ok());
    }
}
