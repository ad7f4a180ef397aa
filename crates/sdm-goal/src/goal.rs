// goal.rs — Goal: one named unit of delivery work, and its state machine.
//
// A Goal is a cheap handle (Arc) around an immutable definition. Cloning
// a Goal yields the same goal; planning it into several graphs, or twice
// into one, refers to a single unit of work. Two separately constructed
// goals with the same unique name are different goals, which a graph
// rejects.
//
// Per-push state lives outside the goal, in the scheduler. The lifecycle:
//   Planned → Requested → InProcess → { Success | Failure | Skipped }
//   Planned / Requested → Skipped (not applicable, prerequisite failed,
//   evaluation cancelled)

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GoalError;
use crate::fulfillment::Fulfillment;
use crate::push_test::PushTest;

/// The state of one goal within one push evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GoalState {
    /// Part of the selected graph, not yet looked at.
    Planned,

    /// Applicable to this push; waiting for prerequisites.
    Requested,

    /// The fulfillment is running.
    InProcess,

    Success {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    Failure { message: String },

    Skipped { reason: String },
}

impl fmt::Display for GoalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoalState::Planned => write!(f, "planned"),
            GoalState::Requested => write!(f, "requested"),
            GoalState::InProcess => write!(f, "in_process"),
            GoalState::Success { .. } => write!(f, "success"),
            GoalState::Failure { .. } => write!(f, "failure"),
            GoalState::Skipped { .. } => write!(f, "skipped"),
        }
    }
}

impl GoalState {
    pub fn success() -> Self {
        GoalState::Success { message: None }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GoalState::Success { .. } | GoalState::Failure { .. } | GoalState::Skipped { .. }
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, GoalState::Success { .. })
    }

    /// The message or reason attached to a terminal state.
    pub fn message(&self) -> Option<&str> {
        match self {
            GoalState::Success { message } => message.as_deref(),
            GoalState::Failure { message } => Some(message),
            GoalState::Skipped { reason } => Some(reason),
            _ => None,
        }
    }

    /// Check whether transitioning from this state to `next` is valid.
    pub fn can_transition_to(&self, next: &GoalState) -> bool {
        matches!(
            (self, next),
            (GoalState::Planned, GoalState::Requested)
                | (GoalState::Planned, GoalState::Skipped { .. })
                | (GoalState::Requested, GoalState::InProcess)
                | (GoalState::Requested, GoalState::Skipped { .. })
                // Marker goals resolve without running anything.
                | (GoalState::Requested, GoalState::Success { .. })
                | (GoalState::InProcess, GoalState::Success { .. })
                | (GoalState::InProcess, GoalState::Failure { .. })
                | (GoalState::InProcess, GoalState::Skipped { .. })
        )
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, goal: &str, next: GoalState) -> Result<(), GoalError> {
        if !self.can_transition_to(&next) {
            return Err(GoalError::InvalidTransition {
                goal: goal.to_string(),
                from: self.to_string(),
                to: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }
}

/// Deployment environment a goal belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalEnvironment {
    #[default]
    Independent,
    Named(String),
}

impl fmt::Display for GoalEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoalEnvironment::Independent => write!(f, "independent"),
            GoalEnvironment::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Text shown for a goal in each state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalDescriptions {
    pub planned: String,
    pub requested: String,
    pub in_process: String,
    pub completed: String,
    pub failed: String,
    pub skipped: String,
}

impl GoalDescriptions {
    pub fn for_name(display_name: &str) -> Self {
        Self {
            planned: format!("Planned: {}", display_name),
            requested: format!("Ready: {}", display_name),
            in_process: format!("Working: {}", display_name),
            completed: format!("Complete: {}", display_name),
            failed: format!("Failed: {}", display_name),
            skipped: format!("Skipped: {}", display_name),
        }
    }

    pub fn describe(&self, state: &GoalState) -> &str {
        match state {
            GoalState::Planned => &self.planned,
            GoalState::Requested => &self.requested,
            GoalState::InProcess => &self.in_process,
            GoalState::Success { .. } => &self.completed,
            GoalState::Failure { .. } => &self.failed,
            GoalState::Skipped { .. } => &self.skipped,
        }
    }
}

#[derive(Clone)]
struct GoalDefinition {
    unique_name: String,
    display_name: String,
    ordered_name: String,
    environment: GoalEnvironment,
    descriptions: GoalDescriptions,
    push_test: Option<Arc<dyn PushTest>>,
    fulfillment: Option<Arc<dyn Fulfillment>>,
    lock: Option<String>,
    timeout: Option<Duration>,
}

/// A named unit of delivery work.
#[derive(Clone)]
pub struct Goal {
    inner: Arc<GoalDefinition>,
}

impl Goal {
    /// A marker goal: no push test, no fulfillment.
    pub fn new(unique_name: impl Into<String>) -> Self {
        let unique_name = unique_name.into();
        Self {
            inner: Arc::new(GoalDefinition {
                display_name: unique_name.clone(),
                ordered_name: unique_name.clone(),
                descriptions: GoalDescriptions::for_name(&unique_name),
                unique_name,
                environment: GoalEnvironment::Independent,
                push_test: None,
                fulfillment: None,
                lock: None,
                timeout: None,
            }),
        }
    }

    fn edit(mut self, f: impl FnOnce(&mut GoalDefinition)) -> Self {
        f(Arc::make_mut(&mut self.inner));
        self
    }

    /// Sets the display name and regenerates default descriptions.
    pub fn with_display_name(self, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        self.edit(|d| {
            d.descriptions = GoalDescriptions::for_name(&display_name);
            d.display_name = display_name;
        })
    }

    pub fn with_descriptions(self, descriptions: GoalDescriptions) -> Self {
        self.edit(|d| d.descriptions = descriptions)
    }

    /// Display ordering key becomes `<rank>-<unique name>`.
    pub fn with_rank(self, rank: u32) -> Self {
        self.edit(|d| d.ordered_name = format!("{}-{}", rank, d.unique_name))
    }

    pub fn with_environment(self, environment: GoalEnvironment) -> Self {
        self.edit(|d| d.environment = environment)
    }

    pub fn with_push_test(self, test: Arc<dyn PushTest>) -> Self {
        self.edit(|d| d.push_test = Some(test))
    }

    pub fn with_fulfillment(self, fulfillment: Arc<dyn Fulfillment>) -> Self {
        self.edit(|d| d.fulfillment = Some(fulfillment))
    }

    /// Goals sharing a lock token never run concurrently within one
    /// evaluation. Project-mutating goals share the `project` token.
    pub fn with_lock(self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.edit(|d| d.lock = Some(token))
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.edit(|d| d.timeout = Some(timeout))
    }

    pub fn unique_name(&self) -> &str {
        &self.inner.unique_name
    }

    pub fn display_name(&self) -> &str {
        &self.inner.display_name
    }

    pub fn ordered_name(&self) -> &str {
        &self.inner.ordered_name
    }

    pub fn environment(&self) -> &GoalEnvironment {
        &self.inner.environment
    }

    pub fn descriptions(&self) -> &GoalDescriptions {
        &self.inner.descriptions
    }

    pub fn push_test(&self) -> Option<&Arc<dyn PushTest>> {
        self.inner.push_test.as_ref()
    }

    pub fn fulfillment(&self) -> Option<&Arc<dyn Fulfillment>> {
        self.inner.fulfillment.as_ref()
    }

    pub fn lock(&self) -> Option<&str> {
        self.inner.lock.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.inner.timeout
    }

    pub fn is_marker(&self) -> bool {
        self.inner.fulfillment.is_none()
    }

    /// Same goal, not merely the same name.
    pub fn same_as(&self, other: &Goal) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Goal")
            .field("unique_name", &self.inner.unique_name)
            .field("ordered_name", &self.inner.ordered_name)
            .field("environment", &self.inner.environment)
            .field("push_test", &self.inner.push_test.as_ref().map(|t| t.name().to_string()))
            .field("fulfillment", &self.inner.fulfillment.as_ref().map(|f| f.name().to_string()))
            .field("lock", &self.inner.lock)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        let mut state = GoalState::Planned;
        state.transition("build", GoalState::Requested).unwrap();
        state.transition("build", GoalState::InProcess).unwrap();
        state
            .transition("build", GoalState::Failure { message: "exit 1".into() })
            .unwrap();
        assert!(state.is_terminal());
        assert_eq!(state.message(), Some("exit 1"));
    }

    #[test]
    fn terminal_states_are_final() {
        let done = GoalState::success();
        assert!(!done.can_transition_to(&GoalState::InProcess));
        assert!(!done.can_transition_to(&GoalState::Skipped { reason: "x".into() }));
        let failed = GoalState::Failure { message: "x".into() };
        assert!(!failed.can_transition_to(&GoalState::success()));
    }

    #[test]
    fn skipped_goals_never_enter_in_process() {
        let mut state = GoalState::Skipped { reason: "prerequisite failed".into() };
        let err = state.transition("deploy", GoalState::InProcess).unwrap_err();
        assert!(err.to_string().contains("skipped"));
        assert!(!GoalState::Planned.can_transition_to(&GoalState::InProcess));
    }

    #[test]
    fn state_serializes_with_tag() {
        let json = serde_json::to_string(&GoalState::Skipped { reason: "n/a".into() }).unwrap();
        assert_eq!(json, r#"{"state":"skipped","reason":"n/a"}"#);
        let json = serde_json::to_string(&GoalState::success()).unwrap();
        assert_eq!(json, r#"{"state":"success"}"#);
    }

    #[test]
    fn builder_and_identity() {
        let publish = Goal::new("publish")
            .with_display_name("Publish")
            .with_rank(2)
            .with_lock("project");
        assert_eq!(publish.ordered_name(), "2-publish");
        assert_eq!(publish.descriptions().in_process, "Working: Publish");
        assert_eq!(publish.lock(), Some("project"));
        assert!(publish.is_marker());

        let alias = publish.clone();
        assert!(alias.same_as(&publish));
        assert!(!Goal::new("publish").same_as(&publish));
    }

    #[test]
    fn environment_display() {
        assert_eq!(GoalEnvironment::Independent.to_string(), "independent");
        assert_eq!(GoalEnvironment::Named("staging".into()).to_string(), "staging");
    }
}
