// autofix.rs — Autofix goal: apply source transforms to the pushed project.
//
// Each registered transform may carry its own push test; transforms whose
// test does not hold are left out. The goal edits the project, so it is
// planned with the `project` lock token.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use sdm_core::Project;
use sdm_goal::{ExecuteGoalResult, Fulfillment, FulfillmentError, GoalInvocation, PushContext, PushTest};

use crate::env::EnvLayers;
use crate::error::DeliveryError;
use crate::exec::{Command, Executor};

/// An edit to a project.
#[async_trait]
pub trait Transform: Send + Sync {
    fn name(&self) -> &str;

    async fn transform(&self, project: &dyn Project) -> Result<(), DeliveryError>;
}

struct FnTransform<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> Transform for FnTransform<F>
where
    F: Fn(&dyn Project) -> Result<(), DeliveryError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn transform(&self, project: &dyn Project) -> Result<(), DeliveryError> {
        (self.f)(project)
    }
}

/// A transform from a synchronous closure.
pub fn transform_with<F>(name: impl Into<String>, f: F) -> Arc<dyn Transform>
where
    F: Fn(&dyn Project) -> Result<(), DeliveryError> + Send + Sync + 'static,
{
    Arc::new(FnTransform { name: name.into(), f })
}

/// A transform that runs a formatter (or any command) in the checkout.
pub struct CommandTransform {
    command: Command,
    executor: Arc<dyn Executor>,
    env: Arc<EnvLayers>,
    name: String,
}

impl CommandTransform {
    pub fn new(command: Command, executor: Arc<dyn Executor>, env: Arc<EnvLayers>) -> Self {
        Self {
            name: command.to_string(),
            command,
            executor,
            env,
        }
    }
}

#[async_trait]
impl Transform for CommandTransform {
    fn name(&self) -> &str {
        &self.name
    }

    async fn transform(&self, project: &dyn Project) -> Result<(), DeliveryError> {
        let options = self.env.resolve(project, &BTreeMap::new())?;
        let result = self.executor.run(&self.command, &options).await?;
        if !result.success() {
            tracing::warn!(transform = %self.name, code = result.code, stderr = %result.stderr.trim_end(), "autofix command failed");
            return Err(DeliveryError::TransformFailed {
                name: self.name.clone(),
                reason: format!("exit status {}", result.code),
            });
        }
        Ok(())
    }
}

struct Registration {
    transform: Arc<dyn Transform>,
    push_test: Option<Arc<dyn PushTest>>,
}

/// Fulfillment of the autofix goal.
#[derive(Default)]
pub struct AutofixFulfillment {
    registrations: Vec<Registration>,
}

impl AutofixFulfillment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, transform: Arc<dyn Transform>, push_test: Option<Arc<dyn PushTest>>) {
        self.registrations.push(Registration { transform, push_test });
    }

    pub fn with(mut self, transform: Arc<dyn Transform>, push_test: Option<Arc<dyn PushTest>>) -> Self {
        self.add(transform, push_test);
        self
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

#[async_trait]
impl Fulfillment for AutofixFulfillment {
    fn name(&self) -> &str {
        "autofix"
    }

    async fn execute(&self, invocation: &GoalInvocation) -> Result<ExecuteGoalResult, FulfillmentError> {
        let project = invocation.project.as_ref();
        let applicable: Vec<&Arc<dyn Transform>> = {
            let ctx = PushContext::new(&invocation.push, project);
            self.registrations
                .iter()
                .filter(|r| r.push_test.as_ref().map_or(true, |t| t.test(&ctx)))
                .map(|r| &r.transform)
                .collect()
        };

        let mut applied = Vec::new();
        let mut failed = Vec::new();
        for transform in applicable {
            invocation.check_deadline()?;
            match transform.transform(project).await {
                Ok(()) => {
                    tracing::info!(transform = %transform.name(), "autofix applied");
                    applied.push(transform.name().to_string());
                }
                Err(e) => {
                    tracing::warn!(transform = %transform.name(), error = %e, "autofix failed");
                    failed.push(format!("{}: {}", transform.name(), e));
                }
            }
        }

        if !failed.is_empty() {
            return Ok(ExecuteGoalResult::failure(1, format!("autofix failed: {}", failed.join("; "))));
        }
        if applied.is_empty() {
            return Ok(ExecuteGoalResult::success_with("no autofixes apply"));
        }
        Ok(ExecuteGoalResult::success_with(format!("applied {}", applied.join(", "))))
    }
}
