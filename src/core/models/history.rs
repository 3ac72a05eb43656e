use serde::{Deserialize, Serialize};

/// Aggregated usage for a single calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyRecord {
    /// Local calendar date, "YYYY-MM-DD"
    pub date_key: String,
    pub peak_five_hour: f64,
    pub peak_seven_day: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak_opus: Option<f64>,
    /// Samples taken that day with the five-hour window saturated
    pub limit_hit_count: u32,
    pub sample_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct UtilizationAverages {
    pub five_hour: f64,
    pub seven_day: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opus: Option<f64>,
}

/// Trailing-window report over the history store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySummary {
    pub days: u32,
    pub averages: UtilizationAverages,
    pub days_limit_hit: usize,
    pub records: Vec<DailyRecord>,
}
