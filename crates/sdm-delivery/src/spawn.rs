// spawn.rs — Goals fulfilled by running a command sequence.
//
// Build, publish and tag are all "run these commands in the checkout with
// the layered environment". Publish and tag also need the version stamped
// earlier in the same push, passed as SDM_VERSION / SDM_RELEASE_VERSION.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use sdm_goal::{ExecuteGoalResult, Fulfillment, FulfillmentError, GoalInvocation};

use crate::env::EnvLayers;
use crate::exec::{run_sequence, Command, Executor};
use crate::version::{release_version, VersionRegistry};

pub const VERSION_ENV: &str = "SDM_VERSION";
pub const RELEASE_VERSION_ENV: &str = "SDM_RELEASE_VERSION";

pub struct SpawnFulfillment {
    name: String,
    commands: Vec<Command>,
    executor: Arc<dyn Executor>,
    env: Arc<EnvLayers>,
    versions: Option<Arc<VersionRegistry>>,
}

impl SpawnFulfillment {
    pub fn new(
        name: impl Into<String>,
        commands: Vec<Command>,
        executor: Arc<dyn Executor>,
        env: Arc<EnvLayers>,
    ) -> Self {
        Self {
            name: name.into(),
            commands,
            executor,
            env,
            versions: None,
        }
    }

    /// Require a recorded version for the push and export it to the commands.
    pub fn with_version(mut self, versions: Arc<VersionRegistry>) -> Self {
        self.versions = Some(versions);
        self
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }
}

#[async_trait]
impl Fulfillment for SpawnFulfillment {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, invocation: &GoalInvocation) -> Result<ExecuteGoalResult, FulfillmentError> {
        invocation.check_deadline()?;

        let mut overrides = BTreeMap::new();
        if let Some(versions) = &self.versions {
            let version = versions.require(&invocation.push)?;
            overrides.insert(RELEASE_VERSION_ENV.to_string(), release_version(&version).to_string());
            overrides.insert(VERSION_ENV.to_string(), version);
        }

        let mut options = self.env.resolve(invocation.project.as_ref(), &overrides)?;
        options.timeout = invocation.deadline.remaining();

        let result = run_sequence(self.executor.as_ref(), &self.commands, &options).await;
        if let ExecuteGoalResult::Failure { message, .. } = &result {
            invocation.progress("failure", message.clone());
        }
        Ok(result)
    }
}
