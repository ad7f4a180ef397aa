//! # sdm-delivery
//!
//! The delivery pack: concrete goals for Leiningen projects and the
//! default machine that wires them to push rules.
//!
//! Goals here run external commands through an [`Executor`] with a layered
//! environment ([`EnvLayers`]), stamp unique versions ([`VersionFulfillment`]),
//! apply autofixes, fingerprint the project against stored targets and run
//! review inspections. [`DeliveryMachine`] assembles them into the "Check"
//! and "Lein Build" graphs.
//!
//! ## Key components
//!
//! - [`DeliveryConfig`] — `.sdm/delivery.toml`
//! - [`ProcessExecutor`] / [`run_sequence`] — subprocesses with timeouts
//! - [`SpawnFulfillment`] — build, publish and tag command goals
//! - [`AutofixFulfillment`] / [`Transform`] — project edits gated by push tests
//! - [`FingerprintFulfillment`] — extract, diff, converge, remember
//! - [`InspectionFulfillment`] — review comments from inspection commands
//! - [`DeliveryMachine`] — default rules and goal graphs

pub mod autofix;
pub mod config;
pub mod env;
pub mod error;
pub mod exec;
pub mod fingerprint_goal;
pub mod inspection;
pub mod machine;
pub mod spawn;
pub mod version;

pub use autofix::{transform_with, AutofixFulfillment, CommandTransform, Transform};
pub use config::{
    CommandsConfig, DeliveryConfig, InspectConfig, StorageConfig, VersionConfig, DEFAULT_CONFIG_PATH,
};
pub use env::{EnvConfig, EnvLayers};
pub use error::{DeliveryError, ExecError};
pub use exec::{run_sequence, Command, ExecResult, Executor, ProcessExecutor, SpawnOptions};
pub use fingerprint_goal::FingerprintFulfillment;
pub use inspection::{InspectionCommand, InspectionFulfillment, ProjectReview, ReviewComment, Severity};
pub use machine::{has_lein_plugin, is_clojure, is_lein, DeliveryGoals, DeliveryMachine, MachineBuilder, PROJECT_LOCK};
pub use spawn::{SpawnFulfillment, RELEASE_VERSION_ENV, VERSION_ENV};
pub use version::{next_version, release_version, VersionFile, VersionFulfillment, VersionRegistry};
