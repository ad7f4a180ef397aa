// error.rs — Error types for the fingerprint pipeline.
//
// None of these abort a push. Extraction errors drop one aspect's
// fingerprints from the pass, apply errors become ConvergenceFailed
// outcomes, and store errors are reported by the goal that hit them.

use std::path::PathBuf;

use sdm_core::ProjectError;
use thiserror::Error;

/// An aspect failed to produce fingerprints for a project.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Reading the project failed.
    #[error("project access failed: {0}")]
    Project(#[from] ProjectError),

    /// The extraction deadline passed.
    #[error("extraction deadline exceeded for aspect '{aspect}'")]
    DeadlineExceeded { aspect: String },

    /// The aspect emitted the same fingerprint name twice in one pass.
    #[error("duplicate fingerprint name '{name}' in one extraction pass")]
    DuplicateName { name: String },

    /// The aspect emitted a fingerprint its own selector does not claim.
    #[error("aspect '{aspect}' emitted fingerprint '{name}' it does not own")]
    Foreign { aspect: String, name: String },

    /// Project content could not be interpreted.
    #[error("malformed content in {path}: {reason}")]
    Malformed { path: String, reason: String },

    /// The extractor panicked.
    #[error("extractor panicked: {0}")]
    Panicked(String),
}

/// An aspect could not bring a project to its target fingerprint.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("project access failed: {0}")]
    Project(#[from] ProjectError),

    /// The target fingerprint's payload is not what this aspect produces.
    #[error("target fingerprint '{name}' is invalid: {reason}")]
    InvalidTarget { name: String, reason: String },

    /// The edit needed to converge is not something this aspect can make.
    #[error("cannot converge '{name}': {reason}")]
    Unsupported { name: String, reason: String },

    /// The deadline passed before the edit finished.
    #[error("apply deadline exceeded for '{name}'")]
    DeadlineExceeded { name: String },
}

/// No registered aspect owns a fingerprint name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("no aspect owns fingerprint '{name}'")]
pub struct UnownedFingerprint {
    pub name: String,
}

/// Errors from fingerprint persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
