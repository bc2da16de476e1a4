//! Subprocess execution with a wall-clock limit
//!
//! Every call spawns exactly one process with no stdin attached, captures
//! stdout and stderr in memory, and never retries.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long to wait for the output pipes to drain once the process has exited.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed ({}). stderr: {stderr}\nstdout: {stdout}", exit_label(.code))]
    Process {
        program: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("{program} took longer than {} and was terminated", format_timeout(.timeout))]
    Timeout { program: String, timeout: Duration },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

fn format_timeout(timeout: &Duration) -> String {
    humantime::format_duration(*timeout).to_string()
}

/// Program and arguments for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Command line suitable for logs: inline `pass:` secrets are masked.
    pub fn display_redacted(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().map(|arg| {
            let arg = arg.to_string_lossy();
            match arg.find("pass:") {
                Some(idx) => format!("{}****", &arg[..idx + "pass:".len()]),
                None => arg.into_owned(),
            }
        }));
        parts.join(" ")
    }
}

/// Captured output of a successful invocation
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Default)]
pub struct CommandRunner;

impl CommandRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run `spec` inside `working_dir`, killing and reaping it once `timeout` elapses.
    pub async fn run(
        &self,
        spec: &CommandSpec,
        working_dir: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput, RunError> {
        let program = spec.program.display().to_string();
        debug!(
            command = %spec.display_redacted(),
            cwd = %working_dir.display(),
            "spawning command"
        );

        let started = Instant::now();
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout_reader = capture(child.stdout.take());
        let stderr_reader = capture(child.stderr.take());

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(source)) => {
                stdout_reader.abort();
                stderr_reader.abort();
                return Err(RunError::Wait { program, source });
            }
            Err(_elapsed) => {
                // kill() also waits for the child, so nothing is left unreaped.
                if let Err(err) = child.kill().await {
                    warn!(program = %program, error = %err, "failed to kill timed out command");
                }
                stdout_reader.abort();
                stderr_reader.abort();
                warn!(
                    program = %program,
                    timeout = %format_timeout(&timeout),
                    "command timed out and was killed"
                );
                return Err(RunError::Timeout { program, timeout });
            }
        };

        let stdout = drain(stdout_reader).await;
        let stderr = drain(stderr_reader).await;

        debug!(
            program = %program,
            code = ?status.code(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "command exited"
        );

        if status.success() {
            Ok(CommandOutput { stdout, stderr })
        } else {
            Err(RunError::Process {
                program,
                code: status.code(),
                stdout,
                stderr,
            })
        }
    }
}

fn capture<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(err) = pipe.read_to_end(&mut buf).await {
                debug!(error = %err, "failed to read command output");
            }
        }
        buf
    })
}

async fn drain(mut reader: JoinHandle<Vec<u8>>) -> String {
    match tokio::time::timeout(PIPE_DRAIN_GRACE, &mut reader).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(err)) => {
            warn!(error = %err, "command output reader failed");
            String::new()
        }
        Err(_) => {
            // A grandchild may still hold the pipe open.
            reader.abort();
            warn!("command output pipe still open after exit, dropping output");
            String::new()
        }
    }
}
