// evaluate.rs — Run the delivery rules for one push.

use serde::Serialize;

use sdm_core::PushEvent;
use sdm_goal::{CancellationFlag, PushStatus};

use super::Context;

/// What `--dry-run` prints.
#[derive(Debug, Serialize)]
struct Plan {
    rule: Option<String>,
    graph: Option<String>,
    goals: Vec<PlannedGoal>,
}

#[derive(Debug, Serialize)]
struct PlannedGoal {
    name: String,
    ordered_name: String,
    prerequisites: Vec<String>,
    lock: Option<String>,
}

pub async fn execute(
    ctx: &Context,
    branch: &str,
    default_branch: &str,
    sha: &str,
    changed: &[String],
    dry_run: bool,
) -> anyhow::Result<()> {
    let machine = ctx.machine()?;
    let project = ctx.project();

    let mut push = PushEvent::new(ctx.repo.clone(), branch, sha, default_branch);
    if !changed.is_empty() {
        push = push.with_changed_files(changed.to_vec());
    }

    if dry_run {
        let plan = match machine.scheduler().plan(&push, project.as_ref()) {
            Some((rule, goals)) => Plan {
                rule: Some(rule.description().to_string()),
                graph: Some(rule.goals().name().to_string()),
                goals: goals
                    .iter()
                    .map(|g| PlannedGoal {
                        name: g.unique_name().to_string(),
                        ordered_name: g.ordered_name().to_string(),
                        prerequisites: rule
                            .goals()
                            .prerequisites_of(g.unique_name())
                            .into_iter()
                            .map(String::from)
                            .collect(),
                        lock: g.lock().map(String::from),
                    })
                    .collect(),
            },
            None => Plan {
                rule: None,
                graph: None,
                goals: Vec::new(),
            },
        };
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    let cancel = CancellationFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; no further goals will start");
            on_interrupt.cancel();
        }
    });

    let evaluation = machine.evaluate(push, project, &cancel).await;
    println!("{}", serde_json::to_string_pretty(&evaluation)?);

    match evaluation.status {
        PushStatus::Success | PushStatus::NoMatchingRule => Ok(()),
        PushStatus::Cancelled => anyhow::bail!("evaluation {} was cancelled", evaluation.id),
        PushStatus::Failed => {
            let failed: Vec<&str> = evaluation
                .failed_goals()
                .iter()
                .map(|g| g.name.as_str())
                .collect();
            anyhow::bail!("evaluation {} failed: {}", evaluation.id, failed.join(", "))
        }
    }
}
