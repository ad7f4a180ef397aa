// scheduler.rs — GoalScheduler: drive one push through its selected goal graph.
//
// Rules are checked in registration order and the first whose push test
// holds selects the graph. Every goal then moves through its lifecycle:
// push-test gating first, then execution in dependency order with
// independent branches running concurrently on a JoinSet. A goal starts
// only when all its planned prerequisites have succeeded; if any of them
// failed or was skipped it is skipped without running.
//
// Each fulfillment runs in its own task so a panic is caught as a join
// error, under a timeout, and behind its lock token when it declares one.
// Cancellation stops new goals from starting; in-flight ones finish.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sdm_core::{Deadline, Project, PushEvent, RepoId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::fulfillment::{ExecuteGoalResult, GoalInvocation};
use crate::goal::{Goal, GoalEnvironment, GoalState};
use crate::goals::Goals;
use crate::push_test::{PushContext, PushTest};
use crate::report::{ReportDispatcher, ReportKind, ReportRecord};

/// Scheduler settings, usually the `[scheduler]` table of the delivery config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Budget for a goal that does not declare its own timeout.
    #[serde(default = "default_goal_timeout_secs")]
    pub goal_timeout_secs: u64,
}

fn default_goal_timeout_secs() -> u64 {
    1800
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            goal_timeout_secs: default_goal_timeout_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn goal_timeout(&self) -> Duration {
        Duration::from_secs(self.goal_timeout_secs)
    }
}

/// "When the push satisfies this test, it means these goals."
pub struct PushRule {
    description: String,
    test: Arc<dyn PushTest>,
    goals: Goals,
}

pub struct PushRuleBuilder {
    test: Arc<dyn PushTest>,
    description: Option<String>,
}

impl PushRule {
    pub fn when(test: Arc<dyn PushTest>) -> PushRuleBuilder {
        PushRuleBuilder {
            test,
            description: None,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn test(&self) -> &Arc<dyn PushTest> {
        &self.test
    }

    pub fn goals(&self) -> &Goals {
        &self.goals
    }
}

impl PushRuleBuilder {
    pub fn it_means(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn set_goals(self, goals: Goals) -> PushRule {
        PushRule {
            description: self
                .description
                .unwrap_or_else(|| self.test.name().to_string()),
            test: self.test,
            goals,
        }
    }
}

impl fmt::Debug for PushRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushRule")
            .field("description", &self.description)
            .field("test", &self.test.name())
            .field("goals", &self.goals.name())
            .finish()
    }
}

/// Shared flag a host sets when a push evaluation is superseded.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushStatus {
    /// No goal failed.
    Success,
    /// At least one goal failed.
    Failed,
    /// Stopped early; some goals never ran.
    Cancelled,
    /// No rule applied to the push.
    NoMatchingRule,
}

impl fmt::Display for PushStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushStatus::Success => write!(f, "success"),
            PushStatus::Failed => write!(f, "failed"),
            PushStatus::Cancelled => write!(f, "cancelled"),
            PushStatus::NoMatchingRule => write!(f, "no_matching_rule"),
        }
    }
}

/// Final state of one goal in one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalOutcome {
    pub name: String,
    pub display_name: String,
    pub ordered_name: String,
    pub environment: GoalEnvironment,
    pub state: GoalState,
    /// The goal's description for its current state.
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Success taken from an earlier evaluation instead of re-running.
    #[serde(default)]
    pub carried: bool,
}

/// Everything that happened for one push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEvaluation {
    pub id: Uuid,
    pub repo: RepoId,
    pub branch: String,
    pub sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<String>,
    pub status: PushStatus,
    /// In execution (flattened) order.
    pub goals: Vec<GoalOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl PushEvaluation {
    pub fn outcome(&self, name: &str) -> Option<&GoalOutcome> {
        self.goals.iter().find(|g| g.name == name)
    }

    pub fn state_of(&self, name: &str) -> Option<&GoalState> {
        self.outcome(name).map(|o| &o.state)
    }

    pub fn failed_goals(&self) -> Vec<&GoalOutcome> {
        self.goals
            .iter()
            .filter(|g| matches!(g.state, GoalState::Failure { .. }))
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.status == PushStatus::Success
    }
}

/// Per-evaluation goal states, reporting every transition.
struct Tracker<'a> {
    evaluation_id: Uuid,
    reports: &'a ReportDispatcher,
    outcomes: Vec<GoalOutcome>,
    descriptions: HashMap<String, Goal>,
}

impl<'a> Tracker<'a> {
    fn new(evaluation_id: Uuid, reports: &'a ReportDispatcher, order: &[Goal]) -> Self {
        let outcomes = order
            .iter()
            .map(|g| GoalOutcome {
                name: g.unique_name().to_string(),
                display_name: g.display_name().to_string(),
                ordered_name: g.ordered_name().to_string(),
                environment: g.environment().clone(),
                state: GoalState::Planned,
                description: g.descriptions().planned.clone(),
                started_at: None,
                finished_at: None,
                carried: false,
            })
            .collect();
        let descriptions = order
            .iter()
            .map(|g| (g.unique_name().to_string(), g.clone()))
            .collect();
        Self {
            evaluation_id,
            reports,
            outcomes,
            descriptions,
        }
    }

    fn outcome_mut(&mut self, name: &str) -> Option<&mut GoalOutcome> {
        self.outcomes.iter_mut().find(|o| o.name == name)
    }

    fn state(&self, name: &str) -> GoalState {
        self.outcomes
            .iter()
            .find(|o| o.name == name)
            .map(|o| o.state.clone())
            .unwrap_or(GoalState::Planned)
    }

    fn set(&mut self, name: &str, next: GoalState) {
        let description = self
            .descriptions
            .get(name)
            .map(|g| g.descriptions().describe(&next).to_string());
        let Some(outcome) = self.outcome_mut(name) else {
            tracing::warn!(goal = %name, "state change for a goal outside the graph");
            return;
        };
        if let Err(e) = outcome.state.transition(name, next.clone()) {
            tracing::warn!(error = %e, "goal state change rejected");
            return;
        }
        if let Some(description) = description {
            outcome.description = description;
        }
        if next.is_terminal() {
            outcome.finished_at = Some(Utc::now());
        }
        match &next {
            GoalState::Failure { message } => {
                tracing::warn!(goal = %name, message = %message, "goal failed")
            }
            GoalState::Skipped { reason } => {
                tracing::info!(goal = %name, reason = %reason, "goal skipped")
            }
            other => tracing::info!(goal = %name, state = %other, "goal state changed"),
        }
        self.reports
            .dispatch(&ReportRecord::goal(name, &next).for_evaluation(self.evaluation_id));
    }

    fn mark_started(&mut self, name: &str, at: DateTime<Utc>) {
        if let Some(outcome) = self.outcome_mut(name) {
            outcome.started_at = Some(at);
        }
    }

    fn mark_carried(&mut self, name: &str) {
        if let Some(outcome) = self.outcome_mut(name) {
            outcome.carried = true;
        }
    }
}

fn state_from_result(result: ExecuteGoalResult) -> GoalState {
    match result {
        ExecuteGoalResult::Success { message } => GoalState::Success { message },
        ExecuteGoalResult::Failure { code, message } => GoalState::Failure {
            message: if message.is_empty() {
                format!("failed with exit code {}", code)
            } else {
                message
            },
        },
        ExecuteGoalResult::Skipped { reason } => GoalState::Skipped { reason },
    }
}

fn panic_text(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

const CANCELLED: &str = "evaluation cancelled";

/// Selects and executes goal graphs for pushes.
pub struct GoalScheduler {
    rules: Vec<PushRule>,
    config: SchedulerConfig,
    reports: Arc<ReportDispatcher>,
}

impl GoalScheduler {
    pub fn new(rules: Vec<PushRule>, config: SchedulerConfig) -> Self {
        Self {
            rules,
            config,
            reports: Arc::new(ReportDispatcher::new()),
        }
    }

    pub fn with_reports(mut self, reports: Arc<ReportDispatcher>) -> Self {
        self.reports = reports;
        self
    }

    pub fn rules(&self) -> &[PushRule] {
        &self.rules
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// First rule whose push test holds.
    pub fn select(&self, ctx: &PushContext<'_>) -> Option<&PushRule> {
        let selected = self.rules.iter().find(|rule| rule.test.test(ctx));
        match selected {
            Some(rule) => tracing::debug!(push = %ctx.push.label(), rule = %rule.description, "rule selected"),
            None => tracing::debug!(push = %ctx.push.label(), "no rule matched"),
        }
        selected
    }

    /// The rule and flattened goals a push would run, without running them.
    pub fn plan(&self, push: &PushEvent, project: &dyn Project) -> Option<(&PushRule, Vec<Goal>)> {
        let ctx = PushContext::new(push, project);
        self.select(&ctx).map(|rule| (rule, rule.goals.flatten()))
    }

    pub async fn evaluate(
        &self,
        push: PushEvent,
        project: Arc<dyn Project>,
        cancel: &CancellationFlag,
    ) -> PushEvaluation {
        self.run(push, project, cancel, None).await
    }

    /// Re-evaluate a push, keeping goals that already succeeded in `prior`.
    pub async fn resume(
        &self,
        prior: &PushEvaluation,
        push: PushEvent,
        project: Arc<dyn Project>,
        cancel: &CancellationFlag,
    ) -> PushEvaluation {
        if prior.repo != push.repo || prior.sha != push.sha {
            tracing::warn!(
                prior = %prior.id,
                push = %push.label(),
                "prior evaluation is for a different revision; evaluating from scratch"
            );
            return self.run(push, project, cancel, None).await;
        }
        self.run(push, project, cancel, Some(prior)).await
    }

    async fn run(
        &self,
        push: PushEvent,
        project: Arc<dyn Project>,
        cancel: &CancellationFlag,
        prior: Option<&PushEvaluation>,
    ) -> PushEvaluation {
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let push = Arc::new(push);
        let label = push.label();

        let finish = |rule: Option<&PushRule>, status: PushStatus, goals: Vec<GoalOutcome>| {
            PushEvaluation {
                id,
                repo: push.repo.clone(),
                branch: push.branch.clone(),
                sha: push.sha.clone(),
                rule: rule.map(|r| r.description.clone()),
                graph: rule.map(|r| r.goals.name().to_string()),
                status,
                goals,
                started_at,
                finished_at: Utc::now(),
            }
        };

        // Rule selection and push-test gating happen before any goal runs.
        let selection = {
            let ctx = PushContext::new(&push, project.as_ref());
            self.select(&ctx).map(|rule| {
                let order = rule.goals.flatten();
                let applicable: Vec<bool> = order
                    .iter()
                    .map(|g| g.push_test().map_or(true, |t| t.test(&ctx)))
                    .collect();
                (rule, order, applicable)
            })
        };

        let Some((rule, order, applicable)) = selection else {
            tracing::info!(push = %label, "no rule matched push; nothing to do");
            self.reports.dispatch(
                &ReportRecord::new(ReportKind::Evaluation, &label, PushStatus::NoMatchingRule.to_string())
                    .for_evaluation(id),
            );
            return finish(None, PushStatus::NoMatchingRule, Vec::new());
        };

        tracing::info!(
            push = %label,
            evaluation = %id,
            rule = %rule.description,
            goals = order.len(),
            "push evaluation started"
        );
        self.reports.dispatch(
            &ReportRecord::new(ReportKind::Evaluation, &label, "started")
                .with_message(rule.description.clone())
                .for_evaluation(id),
        );

        let graph = &rule.goals;
        let mut tracker = Tracker::new(id, &self.reports, &order);

        for (goal, applies) in order.iter().zip(applicable) {
            let name = goal.unique_name();
            let carried = prior
                .and_then(|p| p.state_of(name))
                .filter(|s| s.is_success())
                .cloned();
            if let Some(previous) = carried {
                tracker.set(name, GoalState::Requested);
                tracker.set(name, previous);
                tracker.mark_carried(name);
            } else if applies {
                tracker.set(name, GoalState::Requested);
            } else {
                let test = goal.push_test().map(|t| t.name().to_string()).unwrap_or_default();
                tracker.set(
                    name,
                    GoalState::Skipped {
                        reason: format!("push test '{}' not satisfied", test),
                    },
                );
            }
        }

        let mut locks: HashMap<String, Arc<AsyncMutex<()>>> = HashMap::new();
        let mut tasks: JoinSet<(String, DateTime<Utc>, GoalState)> = JoinSet::new();
        let mut cancelled = false;

        loop {
            if !cancelled && cancel.is_cancelled() {
                cancelled = true;
                tracing::info!(push = %label, evaluation = %id, "evaluation cancelled; no new goals will start");
            }

            // Resolve everything that can be decided now. Marker goals and
            // skips can unblock further goals, so repeat until stable.
            loop {
                let mut progressed = false;
                for goal in &order {
                    let name = goal.unique_name();
                    if tracker.state(name) != GoalState::Requested {
                        continue;
                    }
                    if cancelled {
                        tracker.set(name, GoalState::Skipped { reason: CANCELLED.to_string() });
                        progressed = true;
                        continue;
                    }

                    let prereqs = graph.prerequisites_of(name);
                    let blocker = prereqs.iter().find_map(|p| match tracker.state(p) {
                        s @ (GoalState::Failure { .. } | GoalState::Skipped { .. }) => {
                            Some(format!("prerequisite '{}' ended in {}", p, s))
                        }
                        _ => None,
                    });
                    if let Some(reason) = blocker {
                        tracker.set(name, GoalState::Skipped { reason });
                        progressed = true;
                        continue;
                    }
                    if !prereqs.iter().all(|p| tracker.state(p).is_success()) {
                        continue;
                    }

                    let Some(fulfillment) = goal.fulfillment().cloned() else {
                        tracker.set(name, GoalState::success());
                        progressed = true;
                        continue;
                    };

                    tracker.set(name, GoalState::InProcess);
                    progressed = true;

                    let lock = goal.lock().map(|token| {
                        locks
                            .entry(token.to_string())
                            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                            .clone()
                    });
                    let timeout = goal.timeout().unwrap_or_else(|| self.config.goal_timeout());
                    let goal = goal.clone();
                    let push = push.clone();
                    let project = project.clone();
                    let reports = self.reports.clone();

                    tasks.spawn(async move {
                        let _guard = match lock {
                            Some(lock) => Some(lock.lock_owned().await),
                            None => None,
                        };
                        let started = Utc::now();
                        let name = goal.unique_name().to_string();
                        let invocation = GoalInvocation {
                            goal,
                            evaluation_id: id,
                            push,
                            project,
                            deadline: Deadline::after(timeout),
                            reports,
                        };
                        let mut handle =
                            tokio::spawn(async move { fulfillment.execute(&invocation).await });

                        let state = match tokio::time::timeout(timeout, &mut handle).await {
                            Ok(Ok(Ok(result))) => state_from_result(result),
                            Ok(Ok(Err(e))) => GoalState::Failure {
                                message: e.to_string(),
                            },
                            Ok(Err(join)) if join.is_panic() => GoalState::Failure {
                                message: format!(
                                    "fulfillment panicked: {}",
                                    panic_text(join.into_panic())
                                ),
                            },
                            Ok(Err(join)) => GoalState::Failure {
                                message: format!("fulfillment aborted: {}", join),
                            },
                            Err(_) => {
                                handle.abort();
                                GoalState::Failure {
                                    message: format!("timed out after {}s", timeout.as_secs()),
                                }
                            }
                        };
                        (name, started, state)
                    });
                }
                if !progressed {
                    break;
                }
            }

            match tasks.join_next().await {
                Some(Ok((name, started, state))) => {
                    tracker.mark_started(&name, started);
                    tracker.set(&name, state);
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "goal task ended without reporting a result");
                }
                None => break,
            }
        }

        // Anything still open lost its task; never leave a goal unterminated.
        for goal in &order {
            let name = goal.unique_name();
            match tracker.state(name) {
                GoalState::InProcess => tracker.set(
                    name,
                    GoalState::Failure {
                        message: "goal task ended without reporting a result".to_string(),
                    },
                ),
                GoalState::Requested | GoalState::Planned => tracker.set(
                    name,
                    GoalState::Skipped {
                        reason: "prerequisites did not complete".to_string(),
                    },
                ),
                _ => {}
            }
        }

        let outcomes = tracker.outcomes;
        let status = if outcomes
            .iter()
            .any(|o| matches!(o.state, GoalState::Failure { .. }))
        {
            PushStatus::Failed
        } else if cancelled
            && outcomes
                .iter()
                .any(|o| matches!(&o.state, GoalState::Skipped { reason } if reason == CANCELLED))
        {
            PushStatus::Cancelled
        } else {
            PushStatus::Success
        };

        tracing::info!(push = %label, evaluation = %id, status = %status, "push evaluation finished");
        self.reports.dispatch(
            &ReportRecord::new(ReportKind::Evaluation, &label, status.to_string()).for_evaluation(id),
        );
        finish(Some(rule), status, outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FulfillmentError;
    use crate::fulfillment::fulfill_with;
    use crate::goals::goals;
    use crate::push_test::{has_file, to_default_branch};
    use sdm_core::InMemoryProject;

    fn push(branch: &str) -> PushEvent {
        PushEvent::new(RepoId::parse("acme/app"), branch, "0123456789abcdef", "main")
    }

    fn project() -> Arc<dyn Project> {
        Arc::new(InMemoryProject::of(RepoId::parse("acme/app"), [("project.clj", "(defproject x)")]))
    }

    fn ok_goal(name: &str) -> Goal {
        Goal::new(name).with_fulfillment(fulfill_with(name, |_inv: GoalInvocation| async {
            Ok::<_, FulfillmentError>(ExecuteGoalResult::success())
        }))
    }

    #[test]
    fn first_matching_rule_wins() {
        let a = goals("A").plan(ok_goal("a")).build().unwrap();
        let b = goals("B").plan(ok_goal("b")).build().unwrap();
        let scheduler = GoalScheduler::new(
            vec![
                PushRule::when(to_default_branch()).it_means("default").set_goals(a),
                PushRule::when(has_file("project.clj")).it_means("lein").set_goals(b),
            ],
            SchedulerConfig::default(),
        );

        let p = project();
        let (rule, _) = scheduler.plan(&push("main"), p.as_ref()).unwrap();
        assert_eq!(rule.description(), "default");
        let (rule, _) = scheduler.plan(&push("feature"), p.as_ref()).unwrap();
        assert_eq!(rule.description(), "lein");
    }

    #[tokio::test]
    async fn no_matching_rule() {
        let scheduler = GoalScheduler::new(Vec::new(), SchedulerConfig::default());
        let eval = scheduler
            .evaluate(push("main"), project(), &CancellationFlag::new())
            .await;
        assert_eq!(eval.status, PushStatus::NoMatchingRule);
        assert!(eval.goals.is_empty());
    }

    #[tokio::test]
    async fn marker_goal_follows_prerequisites() {
        let build = ok_goal("build");
        let done = Goal::new("done");
        let graph = goals("G").plan(&build).plan(&done).after(&build).build().unwrap();
        let scheduler = GoalScheduler::new(
            vec![PushRule::when(to_default_branch()).set_goals(graph)],
            SchedulerConfig::default(),
        );
        let eval = scheduler
            .evaluate(push("main"), project(), &CancellationFlag::new())
            .await;
        assert!(eval.is_success());
        assert!(eval.state_of("done").unwrap().is_success());
        assert!(eval.outcome("build").unwrap().started_at.is_some());
    }

    #[tokio::test]
    async fn inapplicable_goal_skips_dependents() {
        let gated = ok_goal("deploy").with_push_test(has_file("Dockerfile"));
        let verify = ok_goal("verify");
        let graph = goals("G").plan(&gated).plan(&verify).after(&gated).build().unwrap();
        let scheduler = GoalScheduler::new(
            vec![PushRule::when(to_default_branch()).set_goals(graph)],
            SchedulerConfig::default(),
        );
        let eval = scheduler
            .evaluate(push("main"), project(), &CancellationFlag::new())
            .await;
        assert!(matches!(eval.state_of("deploy"), Some(GoalState::Skipped { .. })));
        assert!(matches!(eval.state_of("verify"), Some(GoalState::Skipped { .. })));
        assert_eq!(eval.status, PushStatus::Success);
    }

    #[tokio::test]
    async fn panicking_fulfillment_fails_the_goal() {
        let boom = Goal::new("boom").with_fulfillment(fulfill_with("boom", |_inv: GoalInvocation| async {
            if true {
                panic!("kaboom");
            }
            Ok::<_, FulfillmentError>(ExecuteGoalResult::success())
        }));
        let graph = goals("G").plan(&boom).build().unwrap();
        let scheduler = GoalScheduler::new(
            vec![PushRule::when(to_default_branch()).set_goals(graph)],
            SchedulerConfig::default(),
        );
        let eval = scheduler
            .evaluate(push("main"), project(), &CancellationFlag::new())
            .await;
        let state = eval.state_of("boom").unwrap();
        assert!(state.message().unwrap_or("").contains("kaboom"));
        assert_eq!(eval.status, PushStatus::Failed);
    }

    #[tokio::test]
    async fn slow_fulfillment_times_out() {
        let slow = Goal::new("slow")
            .with_timeout(Duration::from_millis(50))
            .with_fulfillment(fulfill_with("slow", |_inv: GoalInvocation| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, FulfillmentError>(ExecuteGoalResult::success())
            }));
        let graph = goals("G").plan(&slow).build().unwrap();
        let scheduler = GoalScheduler::new(
            vec![PushRule::when(to_default_branch()).set_goals(graph)],
            SchedulerConfig::default(),
        );
        let eval = scheduler
            .evaluate(push("main"), project(), &CancellationFlag::new())
            .await;
        assert!(eval.state_of("slow").unwrap().message().unwrap_or("").contains("timed out"));
    }
}
