//! `ShellCommandRunner`: runs `run:` steps through a system shell.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{CommandOutput, CommandRunner, RunnerError};

/// Executes commands as `<shell> -c <command>`.
///
/// The child inherits the process environment; step `env` entries are layered
/// on top. Stdout is captured, stderr is logged at debug level.
#[derive(Debug, Clone)]
pub struct ShellCommandRunner {
    shell: String,
    working_dir: Option<PathBuf>,
}

impl Default for ShellCommandRunner {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            working_dir: None,
        }
    }
}

impl ShellCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Run every command from `dir` instead of the current directory.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(
        &self,
        command: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<CommandOutput, RunnerError> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| RunnerError::Fatal(format!("failed to spawn '{}': {e}", self.shell)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!(command, stderr = %stderr.trim(), "command stderr");
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            // Killed by a signal: no code.
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_env() {
        let runner = ShellCommandRunner::new();
        let env = BTreeMap::from([("GREETING".to_string(), "hello".to_string())]);

        let out = runner.run("echo \"$GREETING world\"", &env).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim_end(), "hello world");
    }

    #[tokio::test]
    async fn reports_non_zero_exit() {
        let out = ShellCommandRunner::new()
            .run("exit 3", &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert!(!out.success());
    }

    #[tokio::test]
    async fn missing_shell_is_fatal() {
        let err = ShellCommandRunner::new()
            .with_shell("/definitely/not/a/shell")
            .run("true", &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Fatal(_)));
    }
}
