//! Lap time and pit duration normalization
//!
//! Upstream sources report the same quantity three ways: clock text
//! (`"1:23.456"`), decimal seconds (`"23.456"` or a JSON float) and raw
//! milliseconds (`"2345"`). Everything lands in integer milliseconds.

/// Unit of a bare (colon-free) numeric duration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
    Seconds,
    Millis,
}

/// Parse a duration in the given unit into milliseconds
///
/// Clock text (`m:ss.sss`, `h:mm:ss.sss`) is recognized regardless of
/// `unit`. Returns `None` for empty, negative, or unparseable input.
pub fn parse_duration_millis(text: &str, unit: DurationUnit) -> Option<i64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if text.contains(':') {
        return parse_clock_millis(text);
    }

    let value: f64 = text.parse().ok()?;
    match unit {
        DurationUnit::Seconds => seconds_to_millis(value),
        DurationUnit::Millis => {
            if value.is_finite() && value >= 0.0 {
                Some(value.round() as i64)
            } else {
                None
            }
        }
    }
}

/// Parse lap time text into milliseconds
///
/// Accepts clock text or bare decimal seconds.
pub fn parse_lap_time_millis(text: &str) -> Option<i64> {
    parse_duration_millis(text, DurationUnit::Seconds)
}

/// Parse `m:ss.sss` or `h:mm:ss.sss`
pub fn parse_clock_millis(text: &str) -> Option<i64> {
    let parts: Vec<&str> = text.trim().split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }

    let (seconds_part, whole_parts) = parts.split_last()?;
    let seconds: f64 = seconds_part.parse().ok()?;
    if !seconds.is_finite() || !(0.0..60.0).contains(&seconds) {
        return None;
    }

    let mut total_minutes: i64 = 0;
    for part in whole_parts {
        let value: i64 = part.parse().ok()?;
        if value < 0 {
            return None;
        }
        total_minutes = total_minutes * 60 + value;
    }

    Some(total_minutes * 60_000 + (seconds * 1000.0).round() as i64)
}

/// Convert float seconds to milliseconds
pub fn seconds_to_millis(seconds: f64) -> Option<i64> {
    if seconds.is_finite() && seconds >= 0.0 {
        Some((seconds * 1000.0).round() as i64)
    } else {
        None
    }
}

/// Format milliseconds as lap time text (`m:ss.sss`)
pub fn format_lap_time(millis: i64) -> String {
    let millis = millis.max(0);
    let minutes = millis / 60_000;
    let seconds = (millis % 60_000) / 1000;
    let fraction = millis % 1000;
    format!("{}:{:02}.{:03}", minutes, seconds, fraction)
}
