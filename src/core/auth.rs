use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::core::process::{run_command, which, CommandError};

/// Keychain item Claude Code stores its OAuth credentials under.
const KEYCHAIN_SERVICE: &str = "Claude Code-credentials";
const KEYCHAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Claude Code credentials not found ({0}). Make sure Claude Code is installed and you're logged in.")]
    NotFound(String),
    #[error("Unable to read Claude Code credentials: {0}")]
    Unreadable(String),
    #[error("Failed to parse OAuth token from Claude Code credentials: {0}")]
    ParseFailed(String),
}

/// Source of the bearer token used against the usage endpoint.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_credential(&self) -> Result<String, CredentialError>;
}

#[derive(Deserialize)]
struct ClaudeCredentialsFile {
    #[serde(rename = "claudeAiOauth")]
    claude_ai_oauth: Option<ClaudeOAuthEntry>,
}

#[derive(Deserialize)]
struct ClaudeOAuthEntry {
    #[serde(rename = "accessToken")]
    access_token: Option<String>,
}

/// Extract `claudeAiOauth.accessToken` from a credentials JSON blob.
fn parse_access_token(content: &str) -> Result<String, CredentialError> {
    let file: ClaudeCredentialsFile = serde_json::from_str(content)
        .map_err(|e| CredentialError::ParseFailed(e.to_string()))?;
    let token = file
        .claude_ai_oauth
        .ok_or_else(|| CredentialError::ParseFailed("missing 'claudeAiOauth'".to_string()))?
        .access_token
        .ok_or_else(|| CredentialError::ParseFailed("missing 'accessToken'".to_string()))?;
    if token.is_empty() {
        return Err(CredentialError::ParseFailed("empty access token".to_string()));
    }
    Ok(token)
}

/// Reads the token from Claude Code's credentials file.
pub struct FileCredentialProvider {
    path: PathBuf,
}

impl FileCredentialProvider {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `$CLAUDE_CONFIG_DIR/.credentials.json`, falling back to `~/.claude/.credentials.json`
    pub fn default_path() -> PathBuf {
        std::env::var("CLAUDE_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("~"))
                    .join(".claude")
            })
            .join(".credentials.json")
    }
}

#[async_trait]
impl CredentialProvider for FileCredentialProvider {
    async fn get_credential(&self) -> Result<String, CredentialError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CredentialError::NotFound(self.path.display().to_string()));
            }
            Err(e) => {
                return Err(CredentialError::Unreadable(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )));
            }
        };
        parse_access_token(&content)
    }
}

/// Reads the token from the macOS login keychain via `security`.
pub struct KeychainCredentialProvider {
    service: String,
}

impl Default for KeychainCredentialProvider {
    fn default() -> Self {
        Self {
            service: KEYCHAIN_SERVICE.to_string(),
        }
    }
}

impl KeychainCredentialProvider {
    pub fn is_available() -> bool {
        cfg!(target_os = "macos") && which("security").is_some()
    }
}

#[async_trait]
impl CredentialProvider for KeychainCredentialProvider {
    async fn get_credential(&self) -> Result<String, CredentialError> {
        let args = ["find-generic-password", "-s", self.service.as_str(), "-w"];
        let content = match run_command("security", &args, KEYCHAIN_TIMEOUT).await {
            Ok(content) => content,
            Err(CommandError::Failed { .. }) | Err(CommandError::Spawn { .. }) => {
                return Err(CredentialError::NotFound(format!("keychain item '{}'", self.service)));
            }
            Err(e) => return Err(CredentialError::Unreadable(e.to_string())),
        };
        parse_access_token(&content)
    }
}

/// Tries each provider in order; the first token wins.
pub struct ChainedCredentialProvider {
    providers: Vec<Arc<dyn CredentialProvider>>,
}

impl ChainedCredentialProvider {
    pub fn new(providers: Vec<Arc<dyn CredentialProvider>>) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl CredentialProvider for ChainedCredentialProvider {
    async fn get_credential(&self) -> Result<String, CredentialError> {
        let mut last_err = CredentialError::NotFound("no credential sources configured".to_string());
        for provider in &self.providers {
            match provider.get_credential().await {
                Ok(token) => return Ok(token),
                Err(e) => {
                    log::debug!("[auth] credential source failed: {}", e);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Result<String, CredentialError>);

    #[async_trait]
    impl CredentialProvider for Fixed {
        async fn get_credential(&self) -> Result<String, CredentialError> {
            self.0.clone()
        }
    }

    #[test]
    fn parse_access_token_happy_path() {
        let json = r#"{ "claudeAiOauth": { "accessToken": "tok_abc123" } }"#;
        assert_eq!(parse_access_token(json).unwrap(), "tok_abc123");
    }

    #[test]
    fn parse_access_token_missing_oauth_key() {
        let err = parse_access_token("{}").unwrap_err();
        assert!(matches!(err, CredentialError::ParseFailed(_)));
        assert!(err.to_string().contains("claudeAiOauth"));
    }

    #[test]
    fn parse_access_token_rejects_empty_token() {
        let json = r#"{ "claudeAiOauth": { "accessToken": "" } }"#;
        assert!(matches!(parse_access_token(json), Err(CredentialError::ParseFailed(_))));
    }

    #[test]
    fn parse_access_token_rejects_garbage() {
        assert!(matches!(parse_access_token("not json"), Err(CredentialError::ParseFailed(_))));
    }

    #[tokio::test]
    async fn file_provider_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileCredentialProvider::new(dir.path().join("missing.json"));
        let err = provider.get_credential().await.unwrap_err();
        assert!(matches!(err, CredentialError::NotFound(_)));
    }

    #[tokio::test]
    async fn file_provider_reads_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".credentials.json");
        std::fs::write(&path, r#"{"claudeAiOauth":{"accessToken":"tok_file"}}"#).unwrap();
        let provider = FileCredentialProvider::new(path);
        assert_eq!(provider.get_credential().await.unwrap(), "tok_file");
    }

    #[tokio::test]
    async fn file_provider_directory_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileCredentialProvider::new(dir.path().to_path_buf());
        let err = provider.get_credential().await.unwrap_err();
        assert!(matches!(err, CredentialError::Unreadable(_)));
    }

    #[tokio::test]
    async fn chained_provider_falls_through_to_first_success() {
        let chain = ChainedCredentialProvider::new(vec![
            Arc::new(Fixed(Err(CredentialError::NotFound("keychain".into())))),
            Arc::new(Fixed(Ok("tok_second".into()))),
        ]);
        assert_eq!(chain.get_credential().await.unwrap(), "tok_second");
    }

    #[tokio::test]
    async fn chained_provider_returns_last_error() {
        let chain = ChainedCredentialProvider::new(vec![
            Arc::new(Fixed(Err(CredentialError::NotFound("keychain".into())))),
            Arc::new(Fixed(Err(CredentialError::ParseFailed("bad".into())))),
        ]);
        assert_eq!(
            chain.get_credential().await.unwrap_err(),
            CredentialError::ParseFailed("bad".into())
        );
    }

    #[tokio::test]
    async fn empty_chain_is_not_found() {
        let chain = ChainedCredentialProvider::new(vec![]);
        assert!(matches!(chain.get_credential().await, Err(CredentialError::NotFound(_))));
    }

    #[test]
    fn default_path_uses_claude_config_dir() {
        std::env::set_var("CLAUDE_CONFIG_DIR", "/tmp/test_claude_dir");
        let path = FileCredentialProvider::default_path();
        std::env::remove_var("CLAUDE_CONFIG_DIR");
        assert_eq!(path, PathBuf::from("/tmp/test_claude_dir/.credentials.json"));
    }
}
