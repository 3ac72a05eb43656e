use async_trait::async_trait;
use thiserror::Error;

use crate::core::models::usage::UsageSnapshot;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Invalid API URL: {0}")]
    InvalidEndpoint(String),
    #[error("Invalid response from Anthropic API.")]
    BadResponse,
    #[error("{}", http_status_message(*.0))]
    HttpStatus(u16),
    #[error("Failed to decode API response: {0}")]
    Decode(String),
    #[error("Network error: {0}")]
    Transport(String),
}

fn http_status_message(code: u16) -> String {
    if code == 401 {
        "Authentication failed (401). Re-login with: claude login".to_string()
    } else {
        format!("HTTP error {} from Anthropic API.", code)
    }
}

impl FetchError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::HttpStatus(401))
    }
}

/// Fetches one usage snapshot with a bearer token.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch(&self, token: &str) -> Result<UsageSnapshot, FetchError>;
}

/// Validate that a resolved endpoint URL uses HTTPS.
///
/// Endpoint overrides must pass this before a token is sent, to prevent
/// exfiltration over plain HTTP or other schemes.
pub fn validate_endpoint(url: &str) -> Result<(), FetchError> {
    if !url.starts_with("https://") {
        return Err(FetchError::InvalidEndpoint(format!(
            "endpoint must use HTTPS, got: {}",
            url
        )));
    }
    Ok(())
}
