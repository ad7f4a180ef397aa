// exec.rs — Running external commands for goals.
//
// Every subprocess a goal needs (lein, scripts, review tools) goes through
// an Executor so tests can substitute a scripted one. ProcessExecutor
// captures output, applies the resolved environment exactly (the caller
// has already layered it), and kills the child when its timeout expires.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sdm_goal::ExecuteGoalResult;

use crate::error::ExecError;

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Command {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// How to run a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnOptions {
    pub cwd: Option<PathBuf>,
    /// The complete environment of the child.
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl SpawnOptions {
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// Exit code; -1 when the process was ended by a signal.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, command: &Command, options: &SpawnOptions) -> Result<ExecResult, ExecError>;
}

/// Runs commands as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn run(&self, command: &Command, options: &SpawnOptions) -> Result<ExecResult, ExecError> {
        let shown = command.to_string();
        tracing::info!(command = %shown, cwd = ?options.cwd, "running command");

        let mut cmd = tokio::process::Command::new(&command.command);
        cmd.args(&command.args)
            .env_clear()
            .envs(&options.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }

        let child = cmd.spawn().map_err(|source| ExecError::Spawn {
            command: shown.clone(),
            source,
        })?;

        let output = match options.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output,
                Err(_) => {
                    // Dropping the wait future drops the child, which kills it.
                    tracing::warn!(command = %shown, timeout_secs = limit.as_secs(), "command timed out");
                    return Err(ExecError::Timeout {
                        command: shown,
                        after: limit,
                    });
                }
            },
            None => child.wait_with_output().await,
        }
        .map_err(|source| ExecError::Wait {
            command: shown.clone(),
            source,
        })?;

        let result = ExecResult {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!(command = %shown, code = result.code, "command finished");
        Ok(result)
    }
}

/// Run `commands` in order, stopping at the first that does not exit zero.
///
/// Never returns an error: a command that cannot be run becomes a failure
/// result with code -1.
pub async fn run_sequence(
    executor: &dyn Executor,
    commands: &[Command],
    options: &SpawnOptions,
) -> ExecuteGoalResult {
    for command in commands {
        match executor.run(command, options).await {
            Ok(result) if result.success() => {}
            Ok(result) => {
                let message = format!("{} failed (status: {})", command, result.code);
                tracing::warn!(stderr = %result.stderr.trim_end(), "{}", message);
                return ExecuteGoalResult::failure(result.code, message);
            }
            Err(e) => {
                let message = format!("{} errored: {}", command, e);
                tracing::warn!("{}", message);
                return ExecuteGoalResult::failure(-1, message);
            }
        }
    }
    ExecuteGoalResult::success()
}
