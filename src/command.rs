//! External command execution
//!
//! Runs one-shot commands (`pactl info`, `pactl list modules short`, ...) and
//! returns their standard output as lines. Every call takes its own
//! [`CancellationToken`] so a caller can abandon one command without touching
//! any other in-flight command.

use std::future::Future;
use std::io;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Failure of a one-shot command
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command ran and exited with a non-zero status
    #[error("`{program}` failed ({}): {}", exit_label(.code), .stderr.trim())]
    Failed {
        program: String,
        /// Exit code, `None` when the process was killed by a signal
        code: Option<i32>,
        /// Captured standard error, verbatim
        stderr: String,
    },

    /// The command could not be started (missing binary, permission denied, ...)
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The caller cancelled the command before it finished
    #[error("`{program}` was cancelled")]
    Cancelled { program: String },
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "killed by signal".to_string(), |c| format!("exit code {c}"))
}

impl CommandError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Executes external commands and captures their line-oriented output
pub trait CommandRunner {
    /// Run `argv` to completion.
    ///
    /// Returns stdout split into lines with trailing blank lines removed. An
    /// empty stdout is a valid, empty result.
    ///
    /// # Errors
    /// [`CommandError::Failed`] on non-zero exit, [`CommandError::Spawn`] if the
    /// process cannot be started, [`CommandError::Cancelled`] if `cancel` fires
    /// first.
    fn run(
        &self,
        argv: &[String],
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Vec<String>, CommandError>> + Send;
}

/// Split captured stdout into lines, dropping trailing blank lines
#[must_use]
pub fn split_lines(stdout: &str) -> Vec<String> {
    let trimmed = stdout.trim_end_matches(['\n', '\r', ' ', '\t']);
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.lines().map(str::to_string).collect()
}

/// [`CommandRunner`] backed by real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        argv: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, CommandError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(CommandError::Spawn {
                program: String::new(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "empty command line"),
            });
        };

        debug!("Running: {}", argv.join(" "));

        // kill_on_drop: dropping the wait future on cancellation stops the child
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::Spawn {
                program: program.clone(),
                source,
            })?;

        let output = tokio::select! {
            result = child.wait_with_output() => result.map_err(|source| CommandError::Spawn {
                program: program.clone(),
                source,
            })?,
            () = cancel.cancelled() => {
                debug!("Cancelled: {}", argv.join(" "));
                return Err(CommandError::Cancelled { program: program.clone() });
            }
        };

        if !output.status.success() {
            return Err(CommandError::Failed {
                program: program.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let lines = split_lines(&String::from_utf8_lossy(&output.stdout));
        trace!("{} returned {} lines", program, lines.len());
        Ok(lines)
    }
}
