//! External command execution.
//!
//! A `CommandRunner` executes one CLI invocation and returns its stdout.
//! A non-zero exit becomes `ReconcileError::Command` carrying stderr, so
//! callers can match on "already exists" / "not found". Best-effort
//! callers use `run_best_effort`, which logs and swallows the error.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use fullnet_core::{ReconcileError, ReconcileResult};

/// Executes external commands (`gcloud`, `az`, `aws`, `kubectl`, `helm`).
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program args...` and return stdout, or the failure with stderr.
    async fn run(&self, program: &str, args: &[&str]) -> ReconcileResult<String>;

    /// Run a command whose failure is acceptable. Errors are logged.
    async fn run_best_effort(&self, program: &str, args: &[&str]) -> Option<String> {
        match self.run(program, args).await {
            Ok(out) => Some(out),
            Err(e) => {
                warn!(error = %e, "best-effort command failed, continuing");
                None
            }
        }
    }
}

/// Render a command line for logs and error messages.
pub fn render(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Runs commands as child processes without a shell.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, program: &str, args: &[&str]) -> ReconcileResult<String> {
        let line = render(program, args);
        debug!(command = %line, "executing");

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| ReconcileError::command(&line, format!("failed to spawn: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        let code = output.status.code().unwrap_or(-1);
        Err(ReconcileError::command(
            line,
            format!("exit code {code}: {detail}"),
        ))
    }
}
