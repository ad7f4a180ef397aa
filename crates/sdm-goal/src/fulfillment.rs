// fulfillment.rs — The executor side of a goal.
//
// A Fulfillment runs once per push evaluation for its goal. It returns an
// explicit result (success, failure with an exit code, or skipped); an
// Err is also treated as failure, and a panic inside the fulfillment is
// caught by the scheduler. Long-running work must honour the deadline in
// the invocation.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use sdm_core::{Deadline, Project, PushEvent};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FulfillmentError;
use crate::goal::Goal;
use crate::report::{ReportDispatcher, ReportKind, ReportRecord};

/// What a fulfillment reports back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ExecuteGoalResult {
    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Failure {
        code: i32,
        message: String,
    },
    /// The goal turned out not to apply; dependents are skipped too.
    Skipped {
        reason: String,
    },
}

impl ExecuteGoalResult {
    pub fn success() -> Self {
        ExecuteGoalResult::Success { message: None }
    }

    pub fn success_with(message: impl Into<String>) -> Self {
        ExecuteGoalResult::Success {
            message: Some(message.into()),
        }
    }

    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        ExecuteGoalResult::Failure {
            code,
            message: message.into(),
        }
    }

    /// Zero is success; anything else is failure carrying `message`.
    pub fn from_exit_code(code: i32, message: impl Into<String>) -> Self {
        if code == 0 {
            ExecuteGoalResult::Success {
                message: Some(message.into()).filter(|m: &String| !m.is_empty()),
            }
        } else {
            Self::failure(code, message)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecuteGoalResult::Success { .. })
    }
}

/// Everything a fulfillment gets to work with.
#[derive(Clone)]
pub struct GoalInvocation {
    pub goal: Goal,
    pub evaluation_id: Uuid,
    pub push: Arc<PushEvent>,
    pub project: Arc<dyn Project>,
    pub deadline: Deadline,
    pub reports: Arc<ReportDispatcher>,
}

impl GoalInvocation {
    /// Emit a progress record for this goal.
    pub fn progress(&self, state: &str, message: impl Into<String>) {
        let record = ReportRecord::new(ReportKind::Goal, self.goal.unique_name(), state)
            .with_message(message)
            .for_evaluation(self.evaluation_id);
        self.reports.dispatch(&record);
    }

    pub fn check_deadline(&self) -> Result<(), FulfillmentError> {
        if self.deadline.expired() {
            return Err(FulfillmentError::DeadlineExceeded {
                goal: self.goal.unique_name().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
pub trait Fulfillment: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, invocation: &GoalInvocation) -> Result<ExecuteGoalResult, FulfillmentError>;
}

/// A fulfillment from an async closure.
pub struct FnFulfillment<F> {
    name: String,
    f: F,
}

impl<F, Fut> FnFulfillment<F>
where
    F: Fn(GoalInvocation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ExecuteGoalResult, FulfillmentError>> + Send,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> Fulfillment for FnFulfillment<F>
where
    F: Fn(GoalInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ExecuteGoalResult, FulfillmentError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, invocation: &GoalInvocation) -> Result<ExecuteGoalResult, FulfillmentError> {
        (self.f)(invocation.clone()).await
    }
}

/// Shorthand for an `Arc<dyn Fulfillment>` from an async closure.
pub fn fulfill_with<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Fulfillment>
where
    F: Fn(GoalInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ExecuteGoalResult, FulfillmentError>> + Send + 'static,
{
    Arc::new(FnFulfillment::new(name, f))
}
