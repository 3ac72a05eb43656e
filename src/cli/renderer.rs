use chrono::{DateTime, Local, Utc};
use colored::{control, ColoredString, Colorize};

use crate::core::engine::PollingEngine;
use crate::core::formatter::{
    format_reset_datetime, format_usage_bar, format_used_percent, utilization_level,
    UtilizationLevel,
};
use crate::core::models::history::HistorySummary;
use crate::core::models::state::{ConnectionState, UsageAlert};
use crate::core::models::usage::{UsageSnapshot, UsageWindow, WindowKind};

const BAR_WIDTH: usize = 12;
const LABEL_WIDTH: usize = 10;

fn colorize(text: String, utilization: f64) -> ColoredString {
    match utilization_level(utilization) {
        UtilizationLevel::Low => text.green(),
        UtilizationLevel::Elevated => text.yellow(),
        UtilizationLevel::High => text.red(),
    }
}

fn render_window(
    kind: WindowKind,
    window: &UsageWindow,
    countdown: &impl Fn(Option<DateTime<Utc>>) -> String,
) -> Vec<String> {
    let usage = format!(
        "{} {}",
        format_used_percent(window.utilization),
        format_usage_bar(window.utilization, BAR_WIDTH)
    );
    let mut lines = vec![format!(
        "  {:<width$}{}",
        kind.label(),
        colorize(usage, window.utilization),
        width = LABEL_WIDTH
    )];
    if window.resets_at.is_some() {
        lines.push(format!(
            "  {:<width$}{}",
            "",
            format!(
                "Resets in {} ({})",
                countdown(window.resets_at),
                format_reset_datetime(window.resets_at)
            )
            .dimmed(),
            width = LABEL_WIDTH
        ));
    }
    lines
}

/// Render the engine's current state, counting down against its clock.
pub fn render_engine(engine: &PollingEngine, use_color: bool) -> String {
    render_state(
        &engine.connection_state(),
        engine.current_snapshot().as_ref(),
        engine.last_refreshed_at(),
        engine.is_limit_hit(),
        |until| engine.time_remaining(until),
        use_color,
    )
}

/// Render a connection state and snapshot as a colored (or plain) block.
///
/// Layout:
/// ```text
///  Claude (connected)
///   Session   28% used [███░░░░░░░░░]
///             Resets in 2h 15m (Dec 4, 7:15 PM)
///   Weekly    59% used [███████░░░░░]
///   Updated   2:03:11 PM
/// ```
pub fn render_state(
    connection: &ConnectionState,
    snapshot: Option<&UsageSnapshot>,
    last_refreshed_at: Option<DateTime<Utc>>,
    limit_hit: bool,
    countdown: impl Fn(Option<DateTime<Utc>>) -> String,
    use_color: bool,
) -> String {
    control::set_override(use_color);

    let mut lines: Vec<String> = Vec::new();
    let status = match connection {
        ConnectionState::Loading => "loading".yellow(),
        ConnectionState::Connected => "connected".green(),
        ConnectionState::Disconnected(_) => "disconnected".red(),
    };
    lines.push(format!(" {} ({})", "Claude".bold(), status));

    if let Some(reason) = connection.reason() {
        lines.push(format!("  {}", reason.red()));
    }

    if let Some(snapshot) = snapshot {
        for (kind, window) in snapshot.windows() {
            lines.extend(render_window(kind, window, &countdown));
        }
    }
    if limit_hit {
        lines.push(format!("  {}", "Session limit reached".red().bold()));
    }

    if let Some(at) = last_refreshed_at {
        lines.push(format!(
            "  {:<width$}{}",
            "Updated",
            at.with_timezone(&Local).format("%-I:%M:%S %p"),
            width = LABEL_WIDTH
        ));
    }

    lines.join("\n")
}

pub fn render_alert(
    alert: &UsageAlert,
    countdown: impl Fn(Option<DateTime<Utc>>) -> String,
    use_color: bool,
) -> String {
    control::set_override(use_color);
    let mut text = format!("\x07 {} {}", "⚠".yellow(), alert.message().yellow().bold());
    if alert.resets_at.is_some() {
        text.push_str(&format!(
            " Resets in {}.",
            countdown(alert.resets_at)
        ));
    }
    text
}

/// Render a trailing-window history report.
pub fn render_history(summary: &HistorySummary, use_color: bool) -> String {
    control::set_override(use_color);

    let mut lines: Vec<String> = Vec::new();
    lines.push(format!(" {}", format!("Usage history (last {} days)", summary.days).bold()));

    if summary.records.is_empty() {
        lines.push("  No usage recorded yet.".dimmed().to_string());
        return lines.join("\n");
    }

    let averages = &summary.averages;
    lines.push(format!(
        "  {:<14}{}",
        "Avg session",
        colorize(format!("{:.0}%", averages.five_hour), averages.five_hour)
    ));
    lines.push(format!(
        "  {:<14}{}",
        "Avg weekly",
        colorize(format!("{:.0}%", averages.seven_day), averages.seven_day)
    ));
    if let Some(opus) = averages.opus {
        lines.push(format!("  {:<14}{}", "Avg Opus", colorize(format!("{:.0}%", opus), opus)));
    }
    let limit_days = format!("{}d", summary.days_limit_hit);
    lines.push(format!(
        "  {:<14}{}",
        "Limit hit",
        if summary.days_limit_hit > 5 {
            limit_days.red()
        } else {
            limit_days.green()
        }
    ));

    lines.push(String::new());
    lines.push(format!(
        "  {:<12}{:>9}{:>9}{:>9}{:>8}{:>9}",
        "Date", "Session", "Weekly", "Opus", "Hits", "Samples"
    ).dimmed().to_string());
    for record in &summary.records {
        let opus = record
            .peak_opus
            .map(|o| format!("{:.0}%", o))
            .unwrap_or_else(|| "—".to_string());
        let row = format!(
            "  {:<12}{:>9}{:>9}{:>9}{:>8}{:>9}",
            record.date_key,
            format!("{:.0}%", record.peak_five_hour),
            format!("{:.0}%", record.peak_seven_day),
            opus,
            record.limit_hit_count,
            record.sample_count
        );
        lines.push(if record.limit_hit_count > 0 {
            row.red().to_string()
        } else {
            row
        });
    }

    lines.join("\n")
}
