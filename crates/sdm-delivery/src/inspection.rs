// inspection.rs — Code inspections: review commands that comment on a push.
//
// An inspection runs one command in the checkout and turns its outcome
// into review comments:
//   - with an `error_marker`, stderr containing the marker (ignoring
//     case) adds an error comment carrying stderr; the exit code is not
//     consulted
//   - otherwise a non-zero exit adds a comment with the configured
//     category and severity
// The goal fails when any comment is an error; warnings are reported and
// the goal succeeds.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sdm_core::RepoId;
use sdm_goal::{
    ExecuteGoalResult, Fulfillment, FulfillmentError, GoalInvocation, ReportKind, ReportRecord,
};
use serde::{Deserialize, Serialize};

use crate::env::EnvLayers;
use crate::exec::{Command, Executor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warn => write!(f, "warn"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewComment {
    pub category: String,
    pub severity: Severity,
    pub detail: String,
}

/// All comments for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectReview {
    pub repo: RepoId,
    pub comments: Vec<ReviewComment>,
}

impl ProjectReview {
    pub fn new(repo: RepoId) -> Self {
        Self {
            repo,
            comments: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        self.comments.iter().any(|c| c.severity == Severity::Error)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.comments.iter().filter(|c| c.severity == severity).count()
    }
}

/// One configured review command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub category: String,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    /// Comment text for a non-zero exit; defaults to the exit status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_marker: Option<String>,
}

fn default_severity() -> Severity {
    Severity::Warn
}

impl InspectionCommand {
    /// OWASP dependency check through the lein plugin.
    pub fn dependency_check() -> Self {
        Self {
            command: "lein".to_string(),
            args: vec![
                "with-profile".to_string(),
                "-dev".to_string(),
                "dependency-check".to_string(),
                "--throw".to_string(),
            ],
            category: "OWASP dependency check failed".to_string(),
            severity: Severity::Warn,
            detail: Some(
                "run `lein with-profile -dev dependency-check` to generate an html report of the violation"
                    .to_string(),
            ),
            error_marker: None,
        }
    }

    /// Dependency tree conflicts reported by `lein deps :tree`.
    pub fn confusing_dependencies() -> Self {
        Self {
            command: "lein".to_string(),
            args: vec!["deps".to_string(), ":tree".to_string()],
            category: "dependency confusion".to_string(),
            severity: Severity::Error,
            detail: None,
            error_marker: Some("confusing".to_string()),
        }
    }

    pub fn to_command(&self) -> Command {
        Command::new(self.command.clone()).args(self.args.iter().cloned())
    }
}

/// Fulfillment of the inspection goal.
pub struct InspectionFulfillment {
    inspections: Vec<InspectionCommand>,
    executor: Arc<dyn Executor>,
    env: Arc<EnvLayers>,
}

impl InspectionFulfillment {
    pub fn new(inspections: Vec<InspectionCommand>, executor: Arc<dyn Executor>, env: Arc<EnvLayers>) -> Self {
        Self {
            inspections,
            executor,
            env,
        }
    }

    /// Run every inspection and collect the comments.
    pub async fn review(&self, invocation: &GoalInvocation) -> Result<ProjectReview, FulfillmentError> {
        let project = invocation.project.as_ref();
        let mut review = ProjectReview::new(project.id().clone());
        let mut options = self.env.resolve(project, &BTreeMap::new())?;
        options.timeout = invocation.deadline.remaining();

        for inspection in &self.inspections {
            invocation.check_deadline()?;
            let command = inspection.to_command();
            let result = match self.executor.run(&command, &options).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(command = %command, error = %e, "inspection could not run");
                    review.comments.push(ReviewComment {
                        category: inspection.category.clone(),
                        severity: Severity::Error,
                        detail: format!("could not run `{}`: {}", command, e),
                    });
                    continue;
                }
            };

            match &inspection.error_marker {
                Some(marker) => {
                    if result.stderr.to_lowercase().contains(&marker.to_lowercase()) {
                        review.comments.push(ReviewComment {
                            category: inspection.category.clone(),
                            severity: Severity::Error,
                            detail: result.stderr.clone(),
                        });
                    }
                }
                None if !result.success() => review.comments.push(ReviewComment {
                    category: inspection.category.clone(),
                    severity: inspection.severity,
                    detail: inspection
                        .detail
                        .clone()
                        .unwrap_or_else(|| format!("`{}` exited with status {}", command, result.code)),
                }),
                None => {}
            }
        }
        Ok(review)
    }
}

#[async_trait]
impl Fulfillment for InspectionFulfillment {
    fn name(&self) -> &str {
        "inspection"
    }

    async fn execute(&self, invocation: &GoalInvocation) -> Result<ExecuteGoalResult, FulfillmentError> {
        let review = self.review(invocation).await?;

        for comment in &review.comments {
            invocation.reports.dispatch(
                &ReportRecord::new(ReportKind::Goal, invocation.goal.unique_name(), comment.severity.to_string())
                    .with_message(format!("{}: {}", comment.category, comment.detail))
                    .for_evaluation(invocation.evaluation_id),
            );
        }

        let summary = format!(
            "{} errors, {} warnings",
            review.count(Severity::Error),
            review.count(Severity::Warn)
        );
        if review.has_errors() {
            Ok(ExecuteGoalResult::failure(1, format!("inspection found problems: {}", summary)))
        } else {
            Ok(ExecuteGoalResult::success_with(summary))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecError;
    use crate::exec::{ExecResult, SpawnOptions};
    use sdm_core::{Deadline, InMemoryProject, PushEvent};
    use sdm_goal::{Goal, MemoryReportSink, ReportDispatcher};
    use uuid::Uuid;

    /// Answers by program arguments.
    struct Canned(Vec<(&'static str, ExecResult)>);

    #[async_trait]
    impl Executor for Canned {
        async fn run(&self, command: &Command, _options: &SpawnOptions) -> Result<ExecResult, ExecError> {
            let key = command.args.join(" ");
            self.0
                .iter()
                .find(|(args, _)| *args == key)
                .map(|(_, r)| r.clone())
                .ok_or_else(|| ExecError::Spawn {
                    command: command.to_string(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                })
        }
    }

    fn exit(code: i32, stderr: &str) -> ExecResult {
        ExecResult {
            code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    fn invocation(sink: Arc<MemoryReportSink>) -> GoalInvocation {
        let repo = RepoId::parse("acme/billing");
        GoalInvocation {
            goal: Goal::new("inspect"),
            evaluation_id: Uuid::new_v4(),
            push: Arc::new(PushEvent::new(repo.clone(), "main", "abc", "main")),
            project: Arc::new(InMemoryProject::new(repo)),
            deadline: Deadline::none(),
            reports: Arc::new(ReportDispatcher::new().with_sink(sink)),
        }
    }

    fn inspections(executor: Canned) -> InspectionFulfillment {
        InspectionFulfillment::new(
            vec![
                InspectionCommand::dependency_check(),
                InspectionCommand::confusing_dependencies(),
            ],
            Arc::new(executor),
            Arc::new(EnvLayers::default()),
        )
    }

    #[tokio::test]
    async fn failed_dependency_check_is_a_warning() {
        let sink = Arc::new(MemoryReportSink::new());
        let fulfillment = inspections(Canned(vec![
            ("with-profile -dev dependency-check --throw", exit(1, "")),
            ("deps :tree", exit(0, "")),
        ]));

        let result = fulfillment.execute(&invocation(sink.clone())).await.unwrap();
        assert_eq!(result, ExecuteGoalResult::success_with("0 errors, 1 warnings"));
        assert_eq!(sink.states_of("inspect"), vec!["warn"]);
    }

    #[tokio::test]
    async fn confusion_marker_is_an_error() {
        let sink = Arc::new(MemoryReportSink::new());
        let fulfillment = inspections(Canned(vec![
            ("with-profile -dev dependency-check --throw", exit(0, "")),
            ("deps :tree", exit(0, "Possibly confusing dependencies found:\n[cheshire ...]")),
        ]));

        let result = fulfillment.execute(&invocation(sink.clone())).await.unwrap();
        assert!(!result.is_success());
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert!(records[0]
            .message
            .as_deref()
            .unwrap_or("")
            .starts_with("dependency confusion: Possibly confusing"));
    }

    #[tokio::test]
    async fn clean_project_has_no_comments() {
        let fulfillment = inspections(Canned(vec![
            ("with-profile -dev dependency-check --throw", exit(0, "")),
            ("deps :tree", exit(0, "")),
        ]));
        let review = fulfillment
            .review(&invocation(Arc::new(MemoryReportSink::new())))
            .await
            .unwrap();
        assert!(review.comments.is_empty());
    }
}
