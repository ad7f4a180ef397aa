// scheduler_flow.rs — End-to-end push evaluation through GoalScheduler.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sdm_core::{ConfigurationError, InMemoryProject, Project, PushEvent, RepoId};
use sdm_goal::push_test::{always, has_file, to_default_branch};
use sdm_goal::{
    fulfill_with, goals, CancellationFlag, ExecuteGoalResult, FulfillmentError, Goal, GoalInvocation,
    GoalScheduler, GoalState, Goals, MemoryReportSink, PushRule, PushStatus, ReportDispatcher,
    SchedulerConfig,
};

fn repo() -> RepoId {
    RepoId::parse("acme/billing")
}

fn push() -> PushEvent {
    PushEvent::new(repo(), "main", "9f3c2a1b7d", "main")
}

fn project() -> Arc<dyn Project> {
    Arc::new(InMemoryProject::of(repo(), [("project.clj", "(defproject billing \"0.1.0-SNAPSHOT\")")]))
}

fn succeeding(name: &str) -> Goal {
    Goal::new(name).with_fulfillment(fulfill_with(name, |_inv: GoalInvocation| async {
        Ok::<_, FulfillmentError>(ExecuteGoalResult::success())
    }))
}

fn exiting(name: &str, code: i32) -> Goal {
    Goal::new(name).with_fulfillment(fulfill_with(name, move |_inv: GoalInvocation| async move {
        Ok::<_, FulfillmentError>(ExecuteGoalResult::from_exit_code(code, "lein uberjar failed (status: 1)"))
    }))
}

fn counting(name: &str, runs: Arc<AtomicUsize>) -> Goal {
    Goal::new(name).with_fulfillment(fulfill_with(name, move |_inv: GoalInvocation| {
        let runs = runs.clone();
        async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok::<_, FulfillmentError>(ExecuteGoalResult::success())
        }
    }))
}

fn scheduler_for(graph: Goals) -> GoalScheduler {
    GoalScheduler::new(
        vec![PushRule::when(always()).it_means("everything").set_goals(graph)],
        SchedulerConfig::default(),
    )
}

fn is_skipped(state: Option<&GoalState>) -> bool {
    matches!(state, Some(GoalState::Skipped { .. }))
}

#[tokio::test]
async fn version_then_failing_build() {
    let version = succeeding("version");
    let build = exiting("build", 1);
    let graph = goals("G").plan(&version).plan(&build).after(&version).build().unwrap();

    let eval = scheduler_for(graph)
        .evaluate(push(), project(), &CancellationFlag::new())
        .await;

    assert!(eval.state_of("version").unwrap().is_success());
    assert!(matches!(eval.state_of("build"), Some(GoalState::Failure { .. })));
    assert_eq!(eval.goals.len(), 2);
    assert_eq!(eval.status, PushStatus::Failed);
    assert_eq!(
        eval.state_of("build").unwrap().message(),
        Some("lein uberjar failed (status: 1)")
    );
}

#[tokio::test]
async fn failure_cascades_down_a_chain() {
    let a = exiting("a", 2);
    let b = succeeding("b");
    let c = succeeding("c");
    let graph = goals("chain")
        .plan(&a)
        .plan(&b)
        .after(&a)
        .plan(&c)
        .after(&b)
        .build()
        .unwrap();

    let eval = scheduler_for(graph)
        .evaluate(push(), project(), &CancellationFlag::new())
        .await;

    assert!(matches!(eval.state_of("a"), Some(GoalState::Failure { .. })));
    assert!(is_skipped(eval.state_of("b")));
    assert!(is_skipped(eval.state_of("c")));
    assert!(eval.outcome("b").unwrap().started_at.is_none());
}

#[tokio::test]
async fn independent_branch_is_unaffected() {
    let a = exiting("a", 1);
    let b = succeeding("b");
    let x = succeeding("x");
    let y = succeeding("y");
    let graph = goals("two-branches")
        .plan(&a)
        .plan(&b)
        .after(&a)
        .plan(&x)
        .plan(&y)
        .after(&x)
        .build()
        .unwrap();

    let eval = scheduler_for(graph)
        .evaluate(push(), project(), &CancellationFlag::new())
        .await;

    assert!(is_skipped(eval.state_of("b")));
    assert!(eval.state_of("x").unwrap().is_success());
    assert!(eval.state_of("y").unwrap().is_success());
}

#[test]
fn cycle_is_rejected_at_build_time() {
    let a = succeeding("a");
    let b = succeeding("b");
    let result = goals("loop").plan(&a).after(&b).plan(&b).after(&a).build();
    assert!(matches!(result, Err(ConfigurationError::CyclicGraph { .. })));
}

#[test]
fn flatten_is_stable() {
    let graph = goals("G")
        .plan_all([succeeding("lint"), succeeding("test"), succeeding("docs")])
        .build()
        .unwrap();
    let once: Vec<String> = graph.flatten().iter().map(|g| g.unique_name().to_string()).collect();
    let twice: Vec<String> = graph.flatten().iter().map(|g| g.unique_name().to_string()).collect();
    assert_eq!(once, twice);
}

#[tokio::test]
async fn rules_are_checked_in_order() {
    let lein = goals("lein").plan(succeeding("lein-build")).build().unwrap();
    let fallback = goals("fallback").plan(succeeding("noop")).build().unwrap();
    let scheduler = GoalScheduler::new(
        vec![
            PushRule::when(has_file("pom.xml")).it_means("maven").set_goals(goals("maven").build().unwrap()),
            PushRule::when(has_file("project.clj")).it_means("lein").set_goals(lein),
            PushRule::when(always()).it_means("fallback").set_goals(fallback),
        ],
        SchedulerConfig::default(),
    );

    let eval = scheduler.evaluate(push(), project(), &CancellationFlag::new()).await;
    assert_eq!(eval.rule.as_deref(), Some("lein"));
    assert_eq!(eval.graph.as_deref(), Some("lein"));
    assert!(eval.outcome("noop").is_none());
}

#[tokio::test]
async fn shared_lock_serializes_goals() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mutating = |name: &str| {
        let active = active.clone();
        let peak = peak.clone();
        Goal::new(name)
            .with_lock("project")
            .with_fulfillment(fulfill_with(name, move |_inv: GoalInvocation| {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, FulfillmentError>(ExecuteGoalResult::success())
                }
            }))
    };

    let graph = goals("G")
        .plan_all([mutating("autofix"), mutating("version"), mutating("converge")])
        .build()
        .unwrap();
    let eval = scheduler_for(graph)
        .evaluate(push(), project(), &CancellationFlag::new())
        .await;

    assert!(eval.is_success());
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancellation_stops_new_goals() {
    let cancel = CancellationFlag::new();
    let trigger = cancel.clone();
    let first = Goal::new("first").with_fulfillment(fulfill_with("first", move |_inv: GoalInvocation| {
        let trigger = trigger.clone();
        async move {
            trigger.cancel();
            Ok::<_, FulfillmentError>(ExecuteGoalResult::success())
        }
    }));
    let second = succeeding("second");
    let graph = goals("G").plan(&first).plan(&second).after(&first).build().unwrap();

    let eval = scheduler_for(graph).evaluate(push(), project(), &cancel).await;

    assert!(eval.state_of("first").unwrap().is_success());
    assert_eq!(
        eval.state_of("second"),
        Some(&GoalState::Skipped {
            reason: "evaluation cancelled".into()
        })
    );
    assert_eq!(eval.status, PushStatus::Cancelled);
}

#[tokio::test]
async fn resume_keeps_earlier_successes() {
    let runs = Arc::new(AtomicUsize::new(0));
    let version = counting("version", runs.clone());
    let graph = goals("G").plan(&version).build().unwrap();
    let scheduler = scheduler_for(graph);

    let first = scheduler.evaluate(push(), project(), &CancellationFlag::new()).await;
    let second = scheduler
        .resume(&first, push(), project(), &CancellationFlag::new())
        .await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(second.state_of("version").unwrap().is_success());
    assert!(second.outcome("version").unwrap().carried);
    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn fulfillment_runs_once_per_evaluation() {
    let runs = Arc::new(AtomicUsize::new(0));
    let shared = counting("shared", runs.clone());
    // The same goal reached through two sub-graphs is still one goal.
    let left = goals("left").plan(&shared).build().unwrap();
    let right = goals("right").plan(&shared).plan(succeeding("after-shared")).after(&shared).build().unwrap();
    let graph = goals("G").plan(&left).plan(&right).build().unwrap();

    let eval = scheduler_for(graph)
        .evaluate(push(), project(), &CancellationFlag::new())
        .await;

    assert!(eval.is_success());
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transitions_are_reported_in_order() {
    let sink = Arc::new(MemoryReportSink::new());
    let reports = Arc::new(ReportDispatcher::new().with_sink(sink.clone()));
    let graph = goals("G").plan(succeeding("version")).build().unwrap();
    let scheduler = scheduler_for(graph).with_reports(reports);

    let eval = scheduler.evaluate(push(), project(), &CancellationFlag::new()).await;

    assert!(eval.is_success());
    assert_eq!(
        sink.states_of("version"),
        vec!["requested", "in_process", "success"]
    );
    let label = push().label();
    assert_eq!(sink.states_of(&label), vec!["started", "success"]);
}

#[tokio::test]
async fn default_branch_rule_skips_feature_pushes() {
    let scheduler = GoalScheduler::new(
        vec![PushRule::when(to_default_branch()).set_goals(goals("release").plan(succeeding("publish")).build().unwrap())],
        SchedulerConfig::default(),
    );
    let feature = PushEvent::new(repo(), "feature/invoices", "1111111", "main");
    let eval = scheduler.evaluate(feature, project(), &CancellationFlag::new()).await;
    assert_eq!(eval.status, PushStatus::NoMatchingRule);
}
