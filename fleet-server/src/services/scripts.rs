//! Spawning of the external management scripts.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Normalized result of one script run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutput {
    pub ok: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Set when the script could not be run at all or timed out
    pub error: Option<String>,
}

impl ScriptOutput {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// The most useful diagnostic for a failed run: stderr, else stdout, else the spawn error.
    pub fn diagnostic(&self) -> String {
        [self.stderr.trim(), self.stdout.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| "Unknown error".into())
    }
}

#[derive(Debug, Clone)]
pub struct ScriptRunner {
    scripts_dir: PathBuf,
    timeout: Duration,
}

impl ScriptRunner {
    pub fn new(scripts_dir: PathBuf, timeout: Duration) -> Self {
        Self { scripts_dir, timeout }
    }

    /// Run `<scripts_dir>/<script> args...`, capturing output. Never retries.
    pub async fn run(&self, script: &str, args: &[String]) -> ScriptOutput {
        let program = self.scripts_dir.join(script);
        tracing::info!(script = %program.display(), ?args, "Executing script");

        let child = Command::new(&program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(script = %program.display(), error = %e, "Failed to spawn script");
                return ScriptOutput::failed(format!("Failed to execute {}: {}", script, e));
            }
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::error!(script, error = %e, "Script I/O failure");
                return ScriptOutput::failed(format!("Error executing {}: {}", script, e));
            }
            Err(_) => {
                tracing::error!(script, timeout_secs = self.timeout.as_secs(), "Script timed out");
                return ScriptOutput::failed(format!(
                    "{} timed out after {}s",
                    script,
                    self.timeout.as_secs()
                ));
            }
        };

        let result = ScriptOutput {
            ok: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            error: None,
        };

        if !result.stdout.trim().is_empty() {
            tracing::debug!(script, stdout = %result.stdout.trim(), "Script stdout");
        }
        if result.ok {
            if !result.stderr.trim().is_empty() {
                tracing::debug!(script, stderr = %result.stderr.trim(), "Script stderr");
            }
        } else {
            tracing::warn!(
                script,
                exit_code = ?result.exit_code,
                stderr = %result.stderr.trim(),
                "Script failed"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_script;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_captures_stdout_on_success() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "hello.sh", "echo \"hello $1\"");
        let runner = ScriptRunner::new(dir.path().to_path_buf(), Duration::from_secs(10));

        let out = runner.run("hello.sh", &["world".to_string()]).await;
        assert!(out.ok);
        assert_eq!(out.exit_code, Some(0));
        assert_eq!(out.stdout.trim(), "hello world");
    }

    #[tokio::test]
    async fn test_failure_surfaces_stderr_verbatim() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "fail.sh", "echo partial\necho 'port 30001 taken' >&2\nexit 3");
        let runner = ScriptRunner::new(dir.path().to_path_buf(), Duration::from_secs(10));

        let out = runner.run("fail.sh", &[]).await;
        assert!(!out.ok);
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.diagnostic(), "port 30001 taken");
    }

    #[tokio::test]
    async fn test_stdout_used_when_stderr_empty() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "fail.sh", "echo 'only stdout'\nexit 1");
        let runner = ScriptRunner::new(dir.path().to_path_buf(), Duration::from_secs(10));
        assert_eq!(runner.run("fail.sh", &[]).await.diagnostic(), "only stdout");
    }

    #[tokio::test]
    async fn test_missing_script_is_failure() {
        let dir = TempDir::new().unwrap();
        let runner = ScriptRunner::new(dir.path().to_path_buf(), Duration::from_secs(10));
        let out = runner.run("absent.sh", &[]).await;
        assert!(!out.ok);
        assert!(out.diagnostic().contains("absent.sh"));
    }

    #[tokio::test]
    async fn test_hung_script_times_out() {
        let dir = TempDir::new().unwrap();
        write_script(dir.path(), "hang.sh", "sleep 30");
        let runner = ScriptRunner::new(dir.path().to_path_buf(), Duration::from_millis(200));
        let out = runner.run("hang.sh", &[]).await;
        assert!(!out.ok);
        assert!(out.diagnostic().contains("timed out"));
    }
}
