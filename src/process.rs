use std::{future::Future, pin::Pin, process::Stdio, time::Duration};

use tracing::debug;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stderr when present, else stdout; trimmed for error messages.
    pub fn details(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        text.trim().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    NotFound { program: String },
    Spawn { program: String, details: String },
    Timeout { program: String, timeout: Duration },
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { program } => write!(f, "{program}: not found"),
            Self::Spawn { program, details } => write!(f, "spawn {program}: {details}"),
            Self::Timeout { program, timeout } => {
                write!(f, "timeout running {program} after {}s", timeout.as_secs())
            }
        }
    }
}

impl std::error::Error for RunError {}

/// Runs local programs. The adapters for `hdbsql` and the AWS CLI go through
/// this seam so tests can substitute canned output.
pub trait CommandRunner: Send + Sync {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [String],
        timeout: Duration,
    ) -> BoxFuture<'a, Result<CommandOutput, RunError>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [String],
        timeout: Duration,
    ) -> BoxFuture<'a, Result<CommandOutput, RunError>> {
        Box::pin(run_with_timeout(program, args, timeout))
    }
}

async fn run_with_timeout(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<CommandOutput, RunError> {
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    // The child must not outlive a timed-out or cancelled call.
    cmd.kill_on_drop(true);

    debug!(program, args = args.len(), "running command");
    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(RunError::NotFound {
                program: program.to_string(),
            });
        }
        Ok(Err(err)) => {
            return Err(RunError::Spawn {
                program: program.to_string(),
                details: err.to_string(),
            });
        }
        Err(_) => {
            return Err(RunError::Timeout {
                program: program.to_string(),
                timeout,
            });
        }
    };

    Ok(CommandOutput {
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Quotes a value for a POSIX shell command line.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.' | ':'))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}
