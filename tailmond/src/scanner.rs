use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use shared::protocol::{PROBE_REFUSED, PROBE_SUCCEEDED, PROBE_TIMED_OUT};
use shared::types::{Machine, Service, Status};
use crate::error::LaunchError;
use crate::exec::{ExecOutput, ExitState, ProcessRunner};

/// Extra time the probe program gets past its own timeout before it is killed
const KILL_GRACE: Duration = Duration::from_secs(1);

/// Map netcat's verbose stderr to a status. Total over all inputs.
pub fn classify(stderr: &str) -> Status {
    if stderr.ends_with(PROBE_SUCCEEDED) {
        Status::Online
    } else if stderr.ends_with(PROBE_REFUSED) {
        Status::Offline
    } else if stderr.ends_with(PROBE_TIMED_OUT) {
        Status::Error
    } else {
        tracing::warn!("Unrecognized probe output: {:?}", stderr);
        Status::Error
    }
}

/// Probes one TCP service on one machine through an external program
#[derive(Clone)]
pub struct Scanner {
    runner: Arc<dyn ProcessRunner>,
    program: PathBuf,
}

impl Scanner {
    pub fn new(runner: Arc<dyn ProcessRunner>, program: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    /// Arguments for a zero-I/O verbose connect
    pub fn probe_args(host: &str, port: u16, timeout: Duration) -> Vec<String> {
        let secs = timeout.as_secs().max(1).to_string();
        let mut args = vec!["-z".to_string(), "-v".to_string()];
        // BSD netcat on macOS needs -G for the connect timeout
        if cfg!(target_os = "macos") {
            args.push("-G".to_string());
            args.push(secs.clone());
        }
        args.push("-w".to_string());
        args.push(secs);
        args.push(host.to_string());
        args.push(port.to_string());
        args
    }

    /// Every probe outcome becomes a [`Status`]; only failing to start the
    /// probe program at all is an error.
    pub async fn probe(
        &self,
        machine: &Machine,
        service: &Service,
        timeout: Duration,
    ) -> Result<Status, LaunchError> {
        let args = Self::probe_args(&machine.url, service.port, timeout);
        let output = self
            .runner
            .execute(&self.program, &args, Some(timeout + KILL_GRACE))
            .await?;

        let status = status_of(&output);
        tracing::debug!("{} {} -> {:?}", machine.id, service.key(), status);
        Ok(status)
    }
}

fn status_of(output: &ExecOutput) -> Status {
    match output.exit {
        ExitState::TimedOut => Status::Error,
        ExitState::Exited(_) => classify(&output.stderr_lossy()),
    }
}
