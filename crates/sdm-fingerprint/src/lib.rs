//! # sdm-fingerprint
//!
//! Content fingerprints of selected project facets, and the pipeline that
//! compares them against target baselines.
//!
//! Each [`Aspect`] owns one family of fingerprints (by exact name or name
//! prefix). It knows how to extract them from a [`sdm_core::Project`], how
//! to render them, and optionally how to apply a target fingerprint back
//! onto a project. The [`AspectRegistry`] routes fingerprints to their
//! owners, and the [`DiffWorkflow`] turns a current/target comparison into
//! per-fingerprint outcomes, converging drift when configured to.
//!
//! ## Key components
//!
//! - [`Fingerprint`] — named, typed, hashed payload
//! - [`Aspect`] / [`Selector`] — extractor, applier, renderers for one family
//! - [`AspectRegistry`] — ownership routing and fault-isolated extraction
//! - [`diff()`] / [`FingerprintDelta`] — name-matched comparison
//! - [`DiffWorkflow`] / [`DiffHandler`] — compliance policy and convergence
//! - [`FingerprintStore`] — target and previous-push persistence
//! - [`builtin`] — config-file, dependency-list and function-body aspects

pub mod aspect;
pub mod builtin;
pub mod diff;
pub mod error;
pub mod fingerprint;
pub mod hasher;
pub mod registry;
pub mod store;
pub mod workflow;

pub use aspect::{Apply, Aspect, Extract, Render, Selector, Summarize};
pub use diff::{diff, DeltaKind, FingerprintDelta};
pub use error::{ApplyError, ExtractionError, StoreError, UnownedFingerprint};
pub use fingerprint::Fingerprint;
pub use registry::{AspectFailure, AspectRegistry, ExtractionPass};
pub use store::{FingerprintStore, JsonFileFingerprintStore, MemoryFingerprintStore};
pub use workflow::{
    DefaultTargetDiffHandler, DeltaOutcome, DeltaReport, DiffConfig, DiffContext, DiffEvaluation,
    DiffHandler, DiffWorkflow, PreviousPushHandler,
};
