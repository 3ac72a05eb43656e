use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::models::usage::UsageSnapshot;

/// Connection status as seen by the polling engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ConnectionState {
    Loading,
    Connected,
    Disconnected(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Disconnected(reason) => Some(reason),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Loading => write!(f, "Loading"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected(_) => write!(f, "Disconnected"),
        }
    }
}

/// Everything the engine publishes to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub connection: ConnectionState,
    pub snapshot: Option<UsageSnapshot>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Loading,
            snapshot: None,
            last_refreshed_at: None,
        }
    }
}

/// Raised once per above-threshold episode of the five-hour window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageAlert {
    pub utilization: f64,
    pub resets_at: Option<DateTime<Utc>>,
}

impl UsageAlert {
    pub fn message(&self) -> String {
        format!(
            "Session usage at {:.0}%. Consider pacing your usage.",
            self.utilization
        )
    }
}
