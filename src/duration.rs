//! Duration parsing and formatting
//!
//! Durations enter through configuration as human strings (`"1m"`, `"1h30m"`,
//! `"500ms"`), leave through the wake URL in the compact `1m0s` form the
//! orchestrator parses, and are shown to users in words on the loading page.

use std::time::Duration;

/// Parse a configuration duration string such as `"1m"` or `"90s"`
pub fn parse(value: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(value.trim())
}

/// Format a duration for the `timeout` query parameter of a wake call.
///
/// Produces `0s`, `500ms`, `45s`, `1m0s`, `1h30m0s`, `1.5s`.
pub fn wire_format(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }

    let total_secs = duration.as_secs();
    let nanos = duration.subsec_nanos();

    if total_secs == 0 {
        return if nanos % 1_000_000 == 0 {
            format!("{}ms", nanos / 1_000_000)
        } else if nanos % 1_000 == 0 {
            format!("{}µs", nanos / 1_000)
        } else {
            format!("{}ns", nanos)
        };
    }

    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    let seconds = if nanos == 0 {
        seconds.to_string()
    } else {
        let fraction = format!("{:09}", nanos);
        format!("{}.{}", seconds, fraction.trim_end_matches('0'))
    };

    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Render a duration in words for interstitial pages ("1 minute 30 seconds")
pub fn humanize(duration: Duration) -> String {
    let total = duration.as_secs();
    if total < 60 {
        return plural(total, "second");
    }

    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    [(days, "day"), (hours, "hour"), (minutes, "minute"), (seconds, "second")]
        .into_iter()
        .filter(|(count, _)| *count > 0)
        .map(|(count, unit)| plural(count, unit))
        .collect::<Vec<_>>()
        .join(" ")
}

fn plural(count: u64, unit: &str) -> String {
    if count == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", count, unit)
    }
}
