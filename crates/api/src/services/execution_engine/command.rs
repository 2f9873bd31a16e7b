//! Running remediation commands as child processes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use shared::validation::is_env_reference;

/// Longest stderr excerpt kept in error messages.
const STDERR_EXCERPT: usize = 1024;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CommandError {
    #[error("executable not found: {0}")]
    NotFound(String),

    #[error("failed to start {command}: {message}")]
    Spawn { command: String, message: String },

    #[error("{command} timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("{command} exited with status {code}: {stderr}")]
    ExitStatus {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("{0} was cancelled")]
    Cancelled(String),
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Resolve `command` to an executable path. Commands containing a path
/// separator must point at an existing file; bare names are looked up on `PATH`.
pub fn resolve_executable(command: &str) -> Result<PathBuf, CommandError> {
    let path = Path::new(command);
    if path.components().count() > 1 {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(CommandError::NotFound(command.to_string()))
        };
    }
    which::which(command).map_err(|_| CommandError::NotFound(command.to_string()))
}

/// Expand `${VAR}` / `$VAR` values from the orchestrator's own environment.
/// Unset references expand to an empty string.
pub fn expand_env(env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    env.iter()
        .map(|(key, value)| {
            let expanded = if is_env_reference(value) {
                let name = value
                    .trim()
                    .trim_start_matches('$')
                    .trim_start_matches('{')
                    .trim_end_matches('}');
                std::env::var(name).unwrap_or_default()
            } else {
                value.clone()
            };
            (key.clone(), expanded)
        })
        .collect()
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(STDERR_EXCERPT) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Run `command` to completion. The child is killed when the timeout fires or
/// `cancel` is triggered.
pub async fn run(
    command: &str,
    args: &[String],
    env: &BTreeMap<String, String>,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<CommandOutput, CommandError> {
    let executable = resolve_executable(command)?;
    let start = Instant::now();

    let output = Command::new(&executable)
        .args(args)
        .envs(expand_env(env))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::select! {
        _ = cancel.cancelled() => return Err(CommandError::Cancelled(command.to_string())),
        result = tokio::time::timeout(timeout, output) => match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(CommandError::Spawn {
                    command: command.to_string(),
                    message: e.to_string(),
                })
            }
            Err(_) => {
                return Err(CommandError::Timeout {
                    command: command.to_string(),
                    secs: timeout.as_secs(),
                })
            }
        },
    };

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let duration = start.elapsed();

    tracing::debug!(
        command,
        status = ?output.status.code(),
        duration_ms = duration.as_millis() as u64,
        "Command finished"
    );

    if !output.status.success() {
        return Err(CommandError::ExitStatus {
            command: command.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: excerpt(&stderr),
        });
    }

    Ok(CommandOutput {
        stdout,
        stderr,
        duration,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_missing_executable() {
        assert!(matches!(
            resolve_executable("definitely-not-a-real-binary-xyz"),
            Err(CommandError::NotFound(_))
        ));
        assert!(matches!(
            resolve_executable("/nonexistent/dir/tool"),
            Err(CommandError::NotFound(_))
        ));
    }

    #[test]
    fn test_expand_env_references() {
        std::env::set_var("CO_TEST_EXPAND_TOKEN", "s3cret");
        let mut env = BTreeMap::new();
        env.insert("TOKEN".to_string(), "${CO_TEST_EXPAND_TOKEN}".to_string());
        env.insert("PLAIN".to_string(), "value".to_string());
        env.insert("MISSING".to_string(), "$CO_TEST_EXPAND_UNSET".to_string());

        let expanded = expand_env(&env);
        assert_eq!(expanded["TOKEN"], "s3cret");
        assert_eq!(expanded["PLAIN"], "value");
        assert_eq!(expanded["MISSING"], "");
    }

    #[tokio::test]
    async fn test_run_success_captures_stdout() {
        let mut env = BTreeMap::new();
        env.insert("GREETING".to_string(), "hello".to_string());
        let output = run(
            "sh",
            &args(&["-c", "echo $GREETING"]),
            &env,
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_nonzero_exit() {
        let err = run(
            "sh",
            &args(&["-c", "echo broken >&2; exit 3"]),
            &BTreeMap::new(),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        match err {
            CommandError::ExitStatus { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "broken");
            }
            other => panic!("Expected ExitStatus, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_timeout() {
        let err = run(
            "sleep",
            &args(&["5"]),
            &BTreeMap::new(),
            Duration::from_millis(100),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CommandError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_run_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let err = run(
            "sleep",
            &args(&["5"]),
            &BTreeMap::new(),
            Duration::from_secs(10),
            &token,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CommandError::Cancelled(_)));
    }
}
