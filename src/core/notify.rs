/// Five-hour utilization (percent) at which a usage alert fires.
pub const ALERT_THRESHOLD: f64 = 80.0;

/// Edge detector for the alert threshold.
///
/// Fires at most once per continuous run of samples at or above
/// [`ALERT_THRESHOLD`]; a sample below the threshold re-arms it.
#[derive(Debug, Default)]
pub struct NotificationTracker {
    armed: bool,
}

impl NotificationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one sample. Returns `true` when an alert should be emitted.
    pub fn evaluate(&mut self, utilization: f64, threshold_enabled: bool) -> bool {
        if utilization < ALERT_THRESHOLD {
            self.armed = false;
            return false;
        }
        if threshold_enabled && !self.armed {
            self.armed = true;
            return true;
        }
        false
    }

    /// True while an alert has fired for the current above-threshold episode.
    #[cfg(test)]
    pub fn is_armed(&self) -> bool {
        self.armed
    }
}
