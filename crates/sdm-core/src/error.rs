// error.rs — Error types shared across the delivery machine.
//
// ConfigurationError is the only error kind allowed to stop the process.
// It is raised while goal graphs and aspect registries are being built,
// never in the middle of a push evaluation.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal configuration problems detected at graph-build or registration time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// An `after` edge closed a cycle in a goal graph.
    #[error("goal graph '{graph}' contains a cycle: {}", .cycle.join(" -> "))]
    CyclicGraph { graph: String, cycle: Vec<String> },

    /// Two different goals were registered under the same unique name.
    #[error("duplicate goal name '{name}' in graph '{graph}'")]
    DuplicateGoal { graph: String, name: String },

    /// Two aspects claim ownership of the same fingerprint name.
    #[error("aspect '{aspect}' overlaps ownership with aspect '{existing}' (both claim '{probe}')")]
    AmbiguousOwnership {
        aspect: String,
        existing: String,
        probe: String,
    },

    /// An aspect name was registered twice.
    #[error("aspect '{0}' is already registered")]
    DuplicateAspect(String),

    /// A regex or glob in configuration failed to compile.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A configuration file could not be read or parsed.
    #[error("invalid configuration at {path}: {reason}")]
    InvalidFile { path: PathBuf, reason: String },
}

/// Errors raised by project snapshot access.
#[derive(Debug, Error)]
pub enum ProjectError {
    /// The requested file does not exist in the project.
    #[error("file not found in project: '{path}'")]
    NotFound { path: String },

    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A path tried to escape the project root.
    #[error("path traversal detected: '{path}' resolves outside the project")]
    PathTraversal { path: String },

    /// The loader has no checkout for this repository.
    #[error("unknown repository: {0}")]
    UnknownRepo(String),

    /// A glob pattern failed to compile.
    #[error("invalid file pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl ProjectError {
    /// True when the error only says the file is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProjectError::NotFound { .. })
    }
}
