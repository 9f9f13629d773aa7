//! Running external programs.
//!
//! Both the daemon status dump and every TCP probe go through [`ProcessRunner`],
//! so tests can substitute scripted output for real processes.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use async_trait::async_trait;
use tokio::process::Command;
use crate::error::LaunchError;

/// How a finished (or abandoned) process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    /// Exited on its own; `None` when terminated by a signal
    Exited(Option<i32>),
    /// Killed after running past its deadline
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit: ExitState,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit == ExitState::Exited(Some(0))
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `program` with `args`. With a deadline, the child is killed once it
    /// expires and the output reports [`ExitState::TimedOut`].
    async fn execute(
        &self,
        program: &Path,
        args: &[String],
        deadline: Option<Duration>,
    ) -> Result<ExecOutput, LaunchError>;
}

/// Runs real child processes through tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn execute(
        &self,
        program: &Path,
        args: &[String],
        deadline: Option<Duration>,
    ) -> Result<ExecOutput, LaunchError> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: program.to_path_buf(),
                source,
            })?;

        let waited = match deadline {
            // Dropping the wait future drops the child, and kill_on_drop reaps it
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::debug!("{} killed after {:?}", program.display(), limit);
                    return Ok(ExecOutput {
                        exit: ExitState::TimedOut,
                        stdout: Vec::new(),
                        stderr: Vec::new(),
                    });
                }
            },
            None => child.wait_with_output().await,
        };

        let output = waited.map_err(|source| LaunchError::Wait {
            program: program.to_path_buf(),
            source,
        })?;

        Ok(ExecOutput {
            exit: ExitState::Exited(output.status.code()),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_captures_stdout_and_stderr() {
        let output = SystemRunner
            .execute(
                Path::new("/bin/sh"),
                &args(&["-c", "printf out; printf err >&2; exit 3"]),
                None,
            )
            .await
            .unwrap();

        assert_eq!(output.exit, ExitState::Exited(Some(3)));
        assert_eq!(output.stdout, b"out");
        assert_eq!(output.stderr_lossy(), "err");
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_deadline_kills_hung_process() {
        let started = std::time::Instant::now();
        let output = SystemRunner
            .execute(
                Path::new("/bin/sh"),
                &args(&["-c", "sleep 30"]),
                Some(Duration::from_millis(200)),
            )
            .await
            .unwrap();

        assert_eq!(output.exit, ExitState::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let result = SystemRunner
            .execute(Path::new("/nonexistent/tailmon-probe"), &[], None)
            .await;

        assert!(matches!(result, Err(LaunchError::Spawn { .. })));
    }
}
