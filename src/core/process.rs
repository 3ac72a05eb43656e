use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("`{0}` timed out")]
    Timeout(String),
    #[error("Failed to execute `{cmd}`: {source}")]
    Spawn {
        cmd: String,
        source: std::io::Error,
    },
    #[error("`{cmd}` exited with {status}: {stderr}")]
    Failed {
        cmd: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("Non-UTF8 output from `{0}`")]
    NonUtf8(String),
}

/// Run a command with arguments and a timeout, returning trimmed stdout.
pub async fn run_command(cmd: &str, args: &[&str], timeout: Duration) -> Result<String, CommandError> {
    let output = tokio::time::timeout(
        timeout,
        tokio::process::Command::new(cmd)
            .args(args)
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| CommandError::Timeout(cmd.to_string()))?
    .map_err(|source| CommandError::Spawn {
        cmd: cmd.to_string(),
        source,
    })?;

    if !output.status.success() {
        return Err(CommandError::Failed {
            cmd: cmd.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let stdout = String::from_utf8(output.stdout).map_err(|_| CommandError::NonUtf8(cmd.to_string()))?;
    Ok(stdout.trim().to_string())
}

/// Check if a binary exists in PATH. Returns the full path if found.
pub fn which(binary: &str) -> Option<PathBuf> {
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(binary))
            .find(|p| p.is_file())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn which_returns_none_for_nonexistent() {
        assert!(which("totally_nonexistent_binary_xyz").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_command_echo() {
        let result = run_command("echo", &["hello"], Duration::from_secs(5)).await;
        assert_eq!(result.unwrap(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_command_failure_is_typed() {
        let result = run_command("false", &[], Duration::from_secs(5)).await;
        assert!(matches!(result, Err(CommandError::Failed { .. })));
    }

    #[tokio::test]
    async fn run_command_missing_binary_is_spawn_error() {
        let result = run_command("totally_nonexistent_binary_xyz", &[], Duration::from_secs(5)).await;
        assert!(matches!(result, Err(CommandError::Spawn { .. })));
    }
}
