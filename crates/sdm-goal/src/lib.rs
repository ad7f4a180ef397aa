//! # sdm-goal
//!
//! Goals, goal graphs and the scheduler that runs them for a push.
//!
//! A [`Goal`] is one named unit of delivery work with an optional
//! [`PushTest`] deciding whether it applies and an optional [`Fulfillment`]
//! doing the work. Goals are composed with [`goals()`] into an acyclic
//! [`Goals`] graph, and [`PushRule`]s map pushes to graphs. The
//! [`GoalScheduler`] picks the first matching rule and drives every goal to
//! a terminal state, running independent branches concurrently.
//!
//! ## Key components
//!
//! - [`GoalState`] — per-push lifecycle with validated transitions
//! - [`push_test`] — predicates over the push and project snapshot
//! - [`Goals`] / [`GoalsBuilder`] — graph composition, cycle detection, flattening
//! - [`Fulfillment`] / [`ExecuteGoalResult`] — the executor contract
//! - [`GoalScheduler`] / [`PushEvaluation`] — rule selection and execution
//! - [`ReportDispatcher`] — fan-out of state changes to report sinks

pub mod error;
pub mod fulfillment;
pub mod goal;
pub mod goals;
pub mod push_test;
pub mod report;
pub mod scheduler;

pub use error::{FulfillmentError, GoalError, ReportError};
pub use fulfillment::{fulfill_with, ExecuteGoalResult, FnFulfillment, Fulfillment, GoalInvocation};
pub use goal::{Goal, GoalDescriptions, GoalEnvironment, GoalState};
pub use goals::{goals, Goals, GoalsBuilder, Plannable};
pub use push_test::{PushContext, PushTest};
pub use report::{
    JsonlReportSink, MemoryReportSink, ReportDispatcher, ReportKind, ReportRecord, ReportSink,
};
pub use scheduler::{
    CancellationFlag, GoalOutcome, GoalScheduler, PushEvaluation, PushRule, PushRuleBuilder,
    PushStatus, SchedulerConfig,
};
