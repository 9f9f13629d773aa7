use std::path::PathBuf;
use thiserror::Error;

/// The daemon's status output could not be turned into a snapshot.
/// Aborts the refresh; the previous snapshot stays in place.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("malformed status JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("machine {machine}: {field} is not a valid timestamp: {value:?}")]
    Timestamp {
        machine: String,
        field: &'static str,
        value: String,
    },

    #[error("machine {machine}: invalid advertised route {route:?}")]
    Route { machine: String, route: String },

    #[error("duplicate machine id {0}")]
    DuplicateId(String),
}

/// An external program could not be run at all
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Refresh-level failures surfaced to the caller
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    MalformedStatus(#[from] StatusError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("daemon exited with {code:?}: {stderr}")]
    Daemon { code: Option<i32>, stderr: String },

    #[error("status table unavailable: {0:#}")]
    Table(anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
