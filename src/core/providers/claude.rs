use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

use crate::core::models::usage::{UsageSnapshot, UsageWindow};
use crate::core::providers::fetch::{validate_endpoint, FetchError, SnapshotFetcher};

pub const USAGE_URL: &str = "https://api.anthropic.com/api/oauth/usage";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct ClaudeWindowRaw {
    utilization: f64,
    resets_at: Option<String>,
}

#[derive(Deserialize)]
struct ClaudeUsageResponse {
    five_hour: Option<ClaudeWindowRaw>,
    seven_day: Option<ClaudeWindowRaw>,
    seven_day_opus: Option<ClaudeWindowRaw>,
    seven_day_oauth_apps: Option<ClaudeWindowRaw>,
}

fn parse_window(raw: ClaudeWindowRaw) -> UsageWindow {
    let resets_at = raw
        .resets_at
        .as_deref()
        .and_then(|s| s.parse::<DateTime<Utc>>().ok());
    // Utilization is already a percentage here, never a fraction.
    UsageWindow {
        utilization: raw.utilization,
        resets_at,
    }
}

fn parse_response(body: &[u8], fetched_at: DateTime<Utc>) -> Result<UsageSnapshot, FetchError> {
    let data: ClaudeUsageResponse =
        serde_json::from_slice(body).map_err(|e| FetchError::Decode(e.to_string()))?;
    Ok(UsageSnapshot {
        five_hour: data.five_hour.map(parse_window),
        seven_day: data.seven_day.map(parse_window),
        seven_day_opus: data.seven_day_opus.map(parse_window),
        seven_day_oauth_apps: data.seven_day_oauth_apps.map(parse_window),
        fetched_at,
    })
}

/// Fetches usage from the Claude OAuth usage endpoint.
pub struct ClaudeApiFetcher {
    client: reqwest::Client,
    endpoint: String,
}

impl ClaudeApiFetcher {
    pub fn new(endpoint: Option<String>) -> Result<Self, FetchError> {
        let endpoint = endpoint.unwrap_or_else(|| USAGE_URL.to_string());
        validate_endpoint(&endpoint)?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl SnapshotFetcher for ClaudeApiFetcher {
    async fn fetch(&self, token: &str) -> Result<UsageSnapshot, FetchError> {
        let response = self
            .client
            .get(&self.endpoint)
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .header("anthropic-beta", "oauth-2025-04-20")
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    FetchError::InvalidEndpoint(e.to_string())
                } else {
                    FetchError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            log::debug!("[fetch] usage endpoint returned HTTP {}", status.as_u16());
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let body = response.bytes().await.map_err(|_| FetchError::BadResponse)?;
        parse_response(&body, Utc::now())
    }
}
