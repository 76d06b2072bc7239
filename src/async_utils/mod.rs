//! Asynchronous utilities for use with Tokio.
//!
//! Everything that touches external processes goes through here, so that
//! timeouts, process limits and error reporting behave the same way for
//! `pdfinfo`, `pdftocairo` and `tesseract`.

use std::{pin::Pin, process::Output, time::Duration};

use futures::Stream;
use tokio::{process::Command, time};

use crate::{cpu_limit::ProcessLimiter, prelude::*};

pub mod io;

/// A type alias for a boxed future. This is used to make it easier to work with
/// with complex futures.
pub type BoxedFuture<Output> = Pin<Box<dyn Future<Output = Output> + Send>>;

/// A type alias for a boxed stream. This is used to make it easier to work
/// streams that return complex types.
pub type BoxedStream<Item> = Pin<Box<dyn Stream<Item = Item> + Send>>;

/// Why did an external command fail to produce output?
#[derive(Debug)]
pub enum CommandError {
    /// The command ran longer than we allowed, and was killed.
    TimedOut(Duration),

    /// The command could not be run, or it reported a failure.
    Failed(anyhow::Error),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::TimedOut(limit) => {
                write!(f, "timed out after {:.1}s", limit.as_secs_f64())
            }
            CommandError::Failed(err) => write!(f, "{:#}", err),
        }
    }
}

impl std::error::Error for CommandError {}

impl CommandError {
    /// Replace mentions of our scratch directories with [`SCRATCH_PLACEHOLDER`].
    ///
    /// Tools like to echo their input and output paths in error messages, and
    /// those end up in reports which must not change from run to run.
    pub fn hiding_scratch_dirs(self, dirs: &[&Path]) -> Self {
        match self {
            CommandError::Failed(err) => {
                let msg = format!("{:#}", err);
                CommandError::Failed(anyhow!("{}", hide_scratch_dirs(&msg, dirs)))
            }
            timed_out @ CommandError::TimedOut(_) => timed_out,
        }
    }
}

/// Stands in for a temporary directory in error messages.
pub const SCRATCH_PLACEHOLDER: &str = "<scratch>";

/// Replace every occurrence of each of `dirs` in `msg`.
fn hide_scratch_dirs(msg: &str, dirs: &[&Path]) -> String {
    dirs.iter()
        .map(|dir| dir.to_string_lossy())
        .filter(|dir| !dir.is_empty())
        .fold(msg.to_owned(), |msg, dir| msg.replace(&*dir, SCRATCH_PLACEHOLDER))
}

/// Run a command to completion while holding a process permit, killing it if
/// it runs longer than `timeout`.
///
/// The exit status is checked with [`check_for_command_failure`].
#[instrument(level = "trace", skip_all, fields(command = command_name))]
pub async fn run_command(
    command_name: &str,
    mut cmd: Command,
    limiter: &ProcessLimiter,
    timeout: Option<Duration>,
    error_line: Option<&(dyn Fn(&str) -> bool + Sync)>,
) -> Result<Output, CommandError> {
    // Dropping the child future on timeout must also kill the process.
    cmd.kill_on_drop(true);
    let output = limiter
        .run(|| async {
            let fut = cmd.output();
            match timeout {
                Some(limit) => match time::timeout(limit, fut).await {
                    Ok(result) => Ok(result),
                    Err(_elapsed) => Err(CommandError::TimedOut(limit)),
                },
                None => Ok(fut.await),
            }
        })
        .await
        .map_err(CommandError::Failed)??
        .with_context(|| format!("failed to run {}", command_name))
        .map_err(CommandError::Failed)?;
    check_for_command_failure(command_name, &output, error_line)
        .map_err(CommandError::Failed)?;
    Ok(output)
}

/// Report any command failures, and include any error output.
///
/// The output of standard error and standard output will be logged at
/// appropriate levels. And standard error may be optionally checked line by
/// line to determine if the command failed even with a zero exit status.
pub fn check_for_command_failure(
    command_name: &str,
    output: &Output,
    error_line: Option<&(dyn Fn(&str) -> bool + Sync)>,
) -> Result<()> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    trace!(
        command_name = command_name,
        output = %stdout,
        "Standard output from command"
    );
    if !stderr.trim().is_empty() {
        debug!(
            command_name = command_name,
            output = %stderr,
            "Standard error from command",
        );
    }

    if output.status.success() {
        if let Some(is_error) = error_line {
            if stderr.lines().any(is_error) {
                return Err(anyhow!(
                    "{} printed error output:\n{}",
                    command_name,
                    stderr.trim_end(),
                ));
            }
        }
        Ok(())
    } else if let Some(exit_code) = output.status.code() {
        Err(anyhow!(
            "{} failed with exit code {} and error output:\n{}",
            command_name,
            exit_code,
            stderr.trim_end(),
        ))
    } else {
        Err(anyhow!(
            "{} failed with error output:\n{}",
            command_name,
            stderr.trim_end(),
        ))
    }
}

/// Wrapper around [`tokio::task::spawn_blocking`] that propagates panics from
/// the background task.
pub async fn spawn_blocking_propagating_panics<F, T>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => value,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        // We never abort blocking tasks, so this only happens at runtime
        // shutdown.
        Err(err) => panic!("blocking task was cancelled: {}", err),
    }
}
