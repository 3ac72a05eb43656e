use chrono::{DateTime, Local, Utc};

/// Shown when a window has no reset time.
pub const NO_RESET_PLACEHOLDER: &str = "—";
/// Shown once the reset time has passed but no fresh snapshot arrived yet.
pub const RESET_IMMINENT: &str = "Any moment now";

/// Countdown from `now` to `until`: "2h 15m" when an hour or more remains,
/// otherwise "14m 5s".
pub fn format_time_remaining(until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(until) = until else {
        return NO_RESET_PLACEHOLDER.to_string();
    };
    let total_seconds = (until - now).num_seconds();
    if total_seconds <= 0 {
        return RESET_IMMINENT.to_string();
    }

    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m {}s", minutes, seconds)
    }
}

/// Returns the reset time in local time, e.g. "Dec 4, 7:15 PM".
pub fn format_reset_datetime(resets_at: Option<DateTime<Utc>>) -> String {
    match resets_at {
        Some(at) => at.with_timezone(&Local).format("%b %-d, %-I:%M %p").to_string(),
        None => NO_RESET_PLACEHOLDER.to_string(),
    }
}

/// Returns "{used}% used", rounded to the nearest integer.
pub fn format_used_percent(utilization: f64) -> String {
    format!("{}% used", utilization.max(0.0).round() as u64)
}

/// Returns "[████░░░░░░░░]" where █ = used portion, ░ = headroom.
/// Width is the number of block characters inside the brackets.
pub fn format_usage_bar(utilization: f64, width: usize) -> String {
    let utilization = utilization.clamp(0.0, 100.0);
    let used_blocks = ((utilization / 100.0) * width as f64).round() as usize;
    let free_blocks = width.saturating_sub(used_blocks);

    format!("[{}{}]", "█".repeat(used_blocks), "░".repeat(free_blocks))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtilizationLevel {
    Low,
    Elevated,
    High,
}

pub fn utilization_level(utilization: f64) -> UtilizationLevel {
    if utilization < 50.0 {
        UtilizationLevel::Low
    } else if utilization < 80.0 {
        UtilizationLevel::Elevated
    } else {
        UtilizationLevel::High
    }
}
