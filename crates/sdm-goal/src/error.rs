// error.rs — Error types for goals, fulfillments and report sinks.

use std::path::PathBuf;

use sdm_core::ProjectError;
use thiserror::Error;

/// A fulfillment could not produce a result.
///
/// The scheduler turns every one of these into a `failure` state with the
/// error text as the message; none of them stop the evaluation.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error("project access failed: {0}")]
    Project(#[from] ProjectError),

    /// The goal's deadline passed before the work finished.
    #[error("deadline exceeded for goal '{goal}'")]
    DeadlineExceeded { goal: String },

    /// Something the fulfillment depends on is not available.
    #[error("goal '{goal}' is missing input: {reason}")]
    MissingInput { goal: String, reason: String },

    #[error("{0}")]
    Failed(String),
}

/// Goal state bookkeeping went wrong.
#[derive(Debug, Error)]
pub enum GoalError {
    #[error("invalid transition from {from} to {to} for goal '{goal}'")]
    InvalidTransition {
        goal: String,
        from: String,
        to: String,
    },
}

/// A report sink failed to record a report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
