// fingerprint_goal.rs — The fingerprint goal: extract, diff, report, remember.
//
// One run per push:
//   1. extract every registered aspect from the project snapshot
//   2. load the repo's targets and the previous push's snapshot
//   3. run the diff workflow (which may converge drift onto the project)
//   4. send one aspect report per delta verdict
//   5. store what the project looks like now as the next "previous"
// The goal fails only when a convergence failed. Drift without
// convergence, missing targets and extraction failures are reported and
// the goal still succeeds. Targets owned by an aspect that failed to
// extract are reported as not evaluated; they never drift or converge,
// and that aspect's previous snapshot is kept as it was.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use sdm_fingerprint::{AspectRegistry, DeltaOutcome, DiffWorkflow, Fingerprint, FingerprintStore};
use sdm_goal::{
    ExecuteGoalResult, Fulfillment, FulfillmentError, GoalInvocation, ReportKind, ReportRecord,
};

use crate::error::DeliveryError;

pub struct FingerprintFulfillment {
    workflow: Arc<DiffWorkflow>,
    targets: Arc<dyn FingerprintStore>,
    previous: Arc<dyn FingerprintStore>,
}

impl FingerprintFulfillment {
    pub fn new(
        workflow: Arc<DiffWorkflow>,
        targets: Arc<dyn FingerprintStore>,
        previous: Arc<dyn FingerprintStore>,
    ) -> Self {
        Self {
            workflow,
            targets,
            previous,
        }
    }

    /// Whether this goal may edit the project.
    pub fn mutates_project(&self) -> bool {
        self.workflow.config().auto_converge
    }

    fn run(&self, invocation: &GoalInvocation) -> Result<ExecuteGoalResult, DeliveryError> {
        let project = invocation.project.as_ref();
        let repo = &invocation.push.repo;
        let registry = self.workflow.registry();

        let pass = registry.extract_all(project, invocation.deadline);
        let failed: HashSet<&str> = pass.failures.iter().map(|f| f.aspect.as_str()).collect();
        for failure in &pass.failures {
            invocation.reports.dispatch(
                &ReportRecord::new(ReportKind::Aspect, &failure.aspect, "extraction_failed")
                    .with_message(failure.error.to_string())
                    .for_evaluation(invocation.evaluation_id),
            );
        }

        let (targets, skipped) = split_failed(registry, &failed, self.targets.list(repo)?);
        for target in &skipped {
            invocation.reports.dispatch(
                &ReportRecord::new(ReportKind::Aspect, &target.name, "not_evaluated")
                    .with_message("aspect extraction failed; target left unchecked")
                    .for_evaluation(invocation.evaluation_id),
            );
        }
        let (previous, kept) = split_failed(registry, &failed, self.previous.list(repo)?);
        let previous = if previous.is_empty() {
            None
        } else {
            Some(previous.as_slice())
        };

        let evaluation = self.workflow.evaluate(
            project,
            &pass.fingerprints,
            &targets,
            previous,
            invocation.deadline,
        );

        for report in &evaluation.reports {
            let mut record = ReportRecord::new(ReportKind::Aspect, &report.fingerprint, report.outcome.to_string())
                .for_evaluation(invocation.evaluation_id);
            record.message = report.message.clone();
            invocation.reports.dispatch(&record);
        }

        // After convergence the project no longer matches what was extracted.
        let mut snapshot = if evaluation.converged().is_empty() {
            pass.fingerprints
        } else {
            let again = registry.extract_all(project, invocation.deadline);
            // An aspect failing only on the second pass keeps its first-pass fingerprints.
            let refailed: HashSet<&str> = again.failures.iter().map(|f| f.aspect.as_str()).collect();
            let mut fresh = again.fingerprints;
            fresh.extend(
                pass.fingerprints
                    .into_iter()
                    .filter(|fp| owned_by(registry, &refailed, fp)),
            );
            fresh
        };
        let extracted = snapshot.len();
        snapshot.extend(kept);
        self.previous.replace_all(repo, &snapshot)?;

        let failures: Vec<&str> = evaluation
            .convergence_failures()
            .iter()
            .map(|r| r.fingerprint.as_str())
            .collect();
        if !failures.is_empty() {
            return Ok(ExecuteGoalResult::failure(
                1,
                format!("convergence failed for {}", failures.join(", ")),
            ));
        }

        let count = |outcome: DeltaOutcome| {
            evaluation
                .reports
                .iter()
                .filter(|r| r.outcome == outcome)
                .count()
        };
        Ok(ExecuteGoalResult::success_with(format!(
            "{} fingerprints: {} compliant, {} drifted, {} converged, {} without target",
            extracted,
            count(DeltaOutcome::Compliant),
            count(DeltaOutcome::DriftDetected),
            count(DeltaOutcome::Converged),
            count(DeltaOutcome::NoTarget),
        )))
    }
}

/// Whether the aspect owning `fingerprint` is in `aspects`.
fn owned_by(registry: &AspectRegistry, aspects: &HashSet<&str>, fingerprint: &Fingerprint) -> bool {
    registry
        .owner_of(fingerprint)
        .map_or(false, |aspect| aspects.contains(aspect.name()))
}

/// Splits stored fingerprints into (usable, owned by a failed aspect).
fn split_failed(
    registry: &AspectRegistry,
    failed: &HashSet<&str>,
    stored: Vec<Fingerprint>,
) -> (Vec<Fingerprint>, Vec<Fingerprint>) {
    if failed.is_empty() {
        return (stored, Vec::new());
    }
    let (skipped, usable): (Vec<_>, Vec<_>) = stored
        .into_iter()
        .partition(|fp| owned_by(registry, failed, fp));
    (usable, skipped)
}

#[async_trait]
impl Fulfillment for FingerprintFulfillment {
    fn name(&self) -> &str {
        "fingerprint"
    }

    async fn execute(&self, invocation: &GoalInvocation) -> Result<ExecuteGoalResult, FulfillmentError> {
        invocation.check_deadline()?;
        Ok(self.run(invocation)?)
    }
}
