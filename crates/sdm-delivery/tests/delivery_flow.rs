// delivery_flow.rs — The default machine against an on-disk Leiningen checkout.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sdm_core::{LocalProject, Project, PushEvent, RepoId};
use sdm_delivery::{
    Command, DeliveryConfig, DeliveryMachine, ExecError, ExecResult, Executor, SpawnOptions,
    VERSION_ENV,
};
use sdm_fingerprint::{DiffConfig, Fingerprint};
use sdm_goal::{CancellationFlag, GoalState, JsonlReportSink, PushStatus};
use serde_json::json;

const PROJECT_CLJ: &str = r#"(defproject acme/billing "0.4.1-SNAPSHOT"
  :dependencies [[org.clojure/clojure "1.10.0"]
                 [cheshire "5.8.1"]])
"#;

/// Records every command with the version it saw; fails one command line.
#[derive(Default)]
struct Scripted {
    seen: Mutex<Vec<(String, Option<String>)>>,
    fail_on: Option<String>,
}

impl Scripted {
    fn failing(command: &str) -> Self {
        Self {
            fail_on: Some(command.to_string()),
            ..Self::default()
        }
    }

    fn seen(&self) -> Vec<(String, Option<String>)> {
        self.seen.lock().unwrap().clone()
    }

    fn ran(&self, command: &str) -> bool {
        self.seen().iter().any(|(c, _)| c == command)
    }
}

#[async_trait]
impl Executor for Scripted {
    async fn run(&self, command: &Command, options: &SpawnOptions) -> Result<ExecResult, ExecError> {
        let line = command.to_string();
        self.seen
            .lock()
            .unwrap()
            .push((line.clone(), options.env.get(VERSION_ENV).cloned()));
        let code = if self.fail_on.as_deref() == Some(line.as_str()) { 1 } else { 0 };
        Ok(ExecResult {
            code,
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

fn repo() -> RepoId {
    RepoId::parse("acme/billing")
}

fn checkout(dir: &Path) -> Arc<dyn Project> {
    std::fs::create_dir_all(dir.join("src/billing")).unwrap();
    std::fs::create_dir_all(dir.join("resources")).unwrap();
    std::fs::write(dir.join("project.clj"), PROJECT_CLJ).unwrap();
    std::fs::write(dir.join("resources/logback.xml"), "<configuration/>\n").unwrap();
    std::fs::write(
        dir.join("src/billing/core.clj"),
        "(ns billing.core)\n\n(defn total [xs] (reduce + xs))\n",
    )
    .unwrap();
    Arc::new(LocalProject::new(repo(), dir))
}

fn machine(config: DeliveryConfig, state: &Path, executor: Arc<Scripted>) -> DeliveryMachine {
    DeliveryMachine::builder(config, state)
        .with_executor(executor)
        .build()
        .unwrap()
}

#[tokio::test]
async fn default_branch_push_builds_and_publishes() {
    let work = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let project = checkout(work.path());
    let executor = Arc::new(Scripted::default());
    let machine = machine(DeliveryConfig::default(), state.path(), executor.clone());

    let push = PushEvent::new(repo(), "main", "c0ffee1", "main");
    let evaluation = machine.evaluate(push.clone(), project.clone(), &CancellationFlag::new()).await;

    assert_eq!(evaluation.status, PushStatus::Success, "{:?}", evaluation.goals);
    assert_eq!(evaluation.graph.as_deref(), Some("Lein Build"));
    let order: Vec<&str> = evaluation.goals.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(order, vec!["autofix", "version", "build", "fingerprint", "publish", "tag"]);

    let version = machine.versions().get(&repo(), "c0ffee1").unwrap();
    assert!(version.starts_with("0.4.1-"));
    assert!(!version.contains("SNAPSHOT"));
    assert!(project.read("project.clj").unwrap().contains(&format!("\"{}\"", version)));

    let seen = executor.seen();
    assert_eq!(seen[0], ("lein test".to_string(), None));
    assert_eq!(seen[1], ("lein deploy".to_string(), Some(version)));

    assert_eq!(evaluation.outcome("publish").unwrap().description, "Published");
    let stored = machine.previous().list(&repo()).unwrap();
    assert_eq!(stored.len(), 3);

    let log = JsonlReportSink::new(state.path().join(".sdm/reports.jsonl"));
    let records = log.read_all().unwrap();
    assert!(records.iter().any(|r| r.subject == "publish" && r.state == "success"));
}

#[tokio::test]
async fn feature_branch_only_checks() {
    let work = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let project = checkout(work.path());
    let executor = Arc::new(Scripted::default());
    let machine = machine(DeliveryConfig::default(), state.path(), executor.clone());

    let push = PushEvent::new(repo(), "billing-fix", "abc1234", "main");
    let evaluation = machine.evaluate(push, project, &CancellationFlag::new()).await;

    assert_eq!(evaluation.status, PushStatus::Success);
    assert_eq!(evaluation.graph.as_deref(), Some("Check"));
    assert!(evaluation.outcome("publish").is_none());
    assert!(!executor.ran("lein deploy"));
    let version = machine.versions().get(&repo(), "abc1234").unwrap();
    assert!(version.starts_with("0.4.1-billing-fix."));
}

#[tokio::test]
async fn failed_build_skips_publish_and_tag() {
    let work = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let project = checkout(work.path());
    let executor = Arc::new(Scripted::failing("lein test"));
    let machine = machine(DeliveryConfig::default(), state.path(), executor.clone());

    let push = PushEvent::new(repo(), "main", "bad0001", "main");
    let evaluation = machine.evaluate(push, project, &CancellationFlag::new()).await;

    assert_eq!(evaluation.status, PushStatus::Failed);
    assert_eq!(
        evaluation.state_of("build"),
        Some(&GoalState::Failure {
            message: "lein test failed (status: 1)".to_string()
        })
    );
    assert!(matches!(evaluation.state_of("publish"), Some(GoalState::Skipped { .. })));
    assert!(matches!(evaluation.state_of("tag"), Some(GoalState::Skipped { .. })));
    assert!(evaluation.state_of("fingerprint").unwrap().is_success());
    assert!(!executor.ran("lein deploy"));
}

#[tokio::test]
async fn dependency_drift_is_converged_when_enabled() {
    let work = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let project = checkout(work.path());
    let mut config = DeliveryConfig::default();
    config.diff = DiffConfig::converging();
    let machine = machine(config, state.path(), Arc::new(Scripted::default()));
    assert_eq!(machine.goals().fingerprint.lock(), Some(sdm_delivery::PROJECT_LOCK));

    machine
        .targets()
        .put(
            &repo(),
            Fingerprint::new(
                "clojure-project-deps",
                "clojure-project",
                json!(["org.clojure/clojure@1.10.1", "cheshire@5.8.1"]),
            ),
        )
        .unwrap();

    let push = PushEvent::new(repo(), "main", "d1f7000", "main");
    let evaluation = machine.evaluate(push, project.clone(), &CancellationFlag::new()).await;

    assert_eq!(evaluation.status, PushStatus::Success, "{:?}", evaluation.goals);
    let on_disk = project.read("project.clj").unwrap();
    assert!(on_disk.contains(r#"[org.clojure/clojure "1.10.1"]"#));

    let remembered = machine
        .previous()
        .get(&repo(), "clojure-project-deps")
        .unwrap()
        .unwrap();
    assert_eq!(remembered.data, json!(["org.clojure/clojure@1.10.1", "cheshire@5.8.1"]));
}

#[tokio::test]
async fn readme_only_push_runs_nothing() {
    let work = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let project = checkout(work.path());
    let executor = Arc::new(Scripted::default());
    let machine = machine(DeliveryConfig::default(), state.path(), executor.clone());

    let push = PushEvent::new(repo(), "main", "d0c5000", "main").with_changed_files(vec!["README.md".to_string()]);
    let evaluation = machine.evaluate(push, project.clone(), &CancellationFlag::new()).await;

    assert_eq!(evaluation.status, PushStatus::NoMatchingRule);
    assert!(executor.seen().is_empty());
    assert_eq!(project.read("project.clj").unwrap(), PROJECT_CLJ);
}
