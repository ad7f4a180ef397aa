//! # sdm-core
//!
//! Shared model for the software delivery machine.
//!
//! Everything the goal scheduler and the fingerprint pipeline need to agree
//! on lives here: the read/write view of a checked-out repository, the push
//! event that triggers an evaluation, deadlines handed to extractors and
//! fulfillments, and the configuration error that is allowed to abort startup.
//!
//! ## Key components
//!
//! - [`Project`] — file-tree view of one repository revision
//!   ([`LocalProject`] on disk, [`InMemoryProject`] for tests and dry runs)
//! - [`ProjectLoader`] — resolves a repository + revision to a [`Project`]
//! - [`PushEvent`] — read-only push metadata consumed by push tests
//! - [`Deadline`] — cooperative time budget for extract/apply/fulfillment
//! - [`ConfigurationError`] — the one fatal error kind

pub mod deadline;
pub mod error;
pub mod loader;
pub mod project;
pub mod push;

pub use deadline::Deadline;
pub use error::{ConfigurationError, ProjectError};
pub use loader::{DirectoryLoader, ProjectLoader};
pub use project::{InMemoryProject, LocalProject, Project};
pub use push::{PushEvent, RepoId};
