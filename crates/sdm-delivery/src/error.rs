// error.rs — Error types for the delivery pack.

use std::time::Duration;

use sdm_core::ProjectError;
use sdm_fingerprint::StoreError;
use sdm_goal::FulfillmentError;
use thiserror::Error;

/// An external command could not be run to completion.
///
/// A command that runs and exits non-zero is not an error; it comes back
/// as an `ExecResult` with that code.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("failed waiting for '{command}': {source}")]
    Wait {
        command: String,
        source: std::io::Error,
    },

    /// The command outlived its budget and was killed.
    #[error("'{command}' timed out after {}s", .after.as_secs())]
    Timeout { command: String, after: Duration },
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The per-project env file is not a table of strings.
    #[error("invalid env file {path}: {reason}")]
    EnvFile { path: String, reason: String },

    /// No version could be read from the version file.
    #[error("no version found in {path}")]
    VersionNotFound { path: String },

    #[error("transform '{name}' failed: {reason}")]
    TransformFailed { name: String, reason: String },

    /// A later goal asked for a version no versioner recorded.
    #[error("no version recorded for {repo} at {sha}")]
    VersionNotRecorded { repo: String, sha: String },
}

impl From<DeliveryError> for FulfillmentError {
    fn from(error: DeliveryError) -> Self {
        match error {
            DeliveryError::Project(e) => FulfillmentError::Project(e),
            other => FulfillmentError::Failed(other.to_string()),
        }
    }
}
