use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The rolling rate-limit windows reported by the usage endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    FiveHour,
    SevenDay,
    SevenDayOpus,
    SevenDayOauthApps,
}

impl WindowKind {
    pub const ALL: [WindowKind; 4] = [
        WindowKind::FiveHour,
        WindowKind::SevenDay,
        WindowKind::SevenDayOpus,
        WindowKind::SevenDayOauthApps,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::FiveHour => "Session",
            Self::SevenDay => "Weekly",
            Self::SevenDayOpus => "Opus",
            Self::SevenDayOauthApps => "OAuth apps",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageWindow {
    /// Percentage of the window consumed. Can exceed 100 once the limit is hit.
    pub utilization: f64,
    /// When the window rolls over, if the provider reported it
    pub resets_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub five_hour: Option<UsageWindow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seven_day: Option<UsageWindow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seven_day_opus: Option<UsageWindow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seven_day_oauth_apps: Option<UsageWindow>,
    pub fetched_at: DateTime<Utc>,
}

impl UsageSnapshot {
    pub fn window(&self, kind: WindowKind) -> Option<&UsageWindow> {
        match kind {
            WindowKind::FiveHour => self.five_hour.as_ref(),
            WindowKind::SevenDay => self.seven_day.as_ref(),
            WindowKind::SevenDayOpus => self.seven_day_opus.as_ref(),
            WindowKind::SevenDayOauthApps => self.seven_day_oauth_apps.as_ref(),
        }
    }

    /// Windows present in this snapshot, in display order.
    pub fn windows(&self) -> impl Iterator<Item = (WindowKind, &UsageWindow)> {
        WindowKind::ALL
            .into_iter()
            .filter_map(move |kind| self.window(kind).map(|w| (kind, w)))
    }

    pub fn utilization(&self, kind: WindowKind) -> Option<f64> {
        self.window(kind).map(|w| w.utilization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(utilization: f64) -> UsageWindow {
        UsageWindow {
            utilization,
            resets_at: None,
        }
    }

    #[test]
    fn windows_skips_absent_kinds_in_display_order() {
        let snapshot = UsageSnapshot {
            five_hour: Some(window(10.0)),
            seven_day: None,
            seven_day_opus: Some(window(30.0)),
            seven_day_oauth_apps: None,
            fetched_at: Utc::now(),
        };
        let kinds: Vec<WindowKind> = snapshot.windows().map(|(k, _)| k).collect();
        assert_eq!(kinds, vec![WindowKind::FiveHour, WindowKind::SevenDayOpus]);
    }

    #[test]
    fn utilization_by_kind() {
        let snapshot = UsageSnapshot {
            five_hour: Some(window(42.5)),
            seven_day: None,
            seven_day_opus: None,
            seven_day_oauth_apps: None,
            fetched_at: Utc::now(),
        };
        assert_eq!(snapshot.utilization(WindowKind::FiveHour), Some(42.5));
        assert_eq!(snapshot.utilization(WindowKind::SevenDay), None);
    }
}
