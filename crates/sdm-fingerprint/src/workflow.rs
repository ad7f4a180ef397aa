// workflow.rs — Diff Workflow: compliance policy over fingerprint deltas.
//
// For every delta between the current extraction and the target baseline,
// the owning aspect's handlers decide an outcome. The default chain is the
// target handler (compliant / drift / converge) followed by the
// previous-push handler (what changed since last time). An aspect that
// declares its own workflows replaces the default chain for its deltas.
//
// Nothing in here propagates a failure: apply errors, apply panics and
// handler panics all become report records.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;
use sdm_core::{Deadline, Project};
use serde::{Deserialize, Serialize};

use crate::aspect::Aspect;
use crate::diff::{diff, DeltaKind, FingerprintDelta};
use crate::fingerprint::{find, Fingerprint};
use crate::registry::{panic_message, AspectRegistry};

/// Diff policy switches, usually the `[diff]` table of the delivery config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffConfig {
    /// Apply targets to the project when drift is found.
    #[serde(default)]
    pub auto_converge: bool,

    /// Re-extract after apply and require the target to match.
    #[serde(default = "default_verify_convergence")]
    pub verify_convergence: bool,
}

fn default_verify_convergence() -> bool {
    true
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            auto_converge: false,
            verify_convergence: default_verify_convergence(),
        }
    }
}

impl DiffConfig {
    pub fn converging() -> Self {
        Self {
            auto_converge: true,
            ..Self::default()
        }
    }
}

/// What a handler concluded about one delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaOutcome {
    /// Current matches target.
    Compliant,
    /// No target exists for this fingerprint; nothing to enforce.
    NoTarget,
    /// Current differs from target and was left alone.
    DriftDetected,
    /// Apply brought the project to target.
    Converged,
    /// Apply failed, or the project still differs afterwards.
    ConvergenceFailed,
    /// No registered aspect owns the fingerprint.
    Unowned,
    /// Differs from the previous push's fingerprint.
    ChangedSincePrevious,
}

impl fmt::Display for DeltaOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeltaOutcome::Compliant => "compliant",
            DeltaOutcome::NoTarget => "no_target",
            DeltaOutcome::DriftDetected => "drift_detected",
            DeltaOutcome::Converged => "converged",
            DeltaOutcome::ConvergenceFailed => "convergence_failed",
            DeltaOutcome::Unowned => "unowned",
            DeltaOutcome::ChangedSincePrevious => "changed_since_previous",
        };
        write!(f, "{}", s)
    }
}

/// One handler's verdict on one delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaReport {
    /// Fingerprint name.
    pub fingerprint: String,
    /// Owning aspect, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect: Option<String>,
    /// Handler that produced this report.
    pub handler: String,
    pub delta: DeltaKind,
    pub outcome: DeltaOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp_ms: i64,
}

impl DeltaReport {
    pub fn new(
        handler: &str,
        aspect: Option<&Aspect>,
        delta: &FingerprintDelta,
        outcome: DeltaOutcome,
    ) -> Self {
        Self {
            fingerprint: delta.name().to_string(),
            aspect: aspect.map(|a| a.name().to_string()),
            handler: handler.to_string(),
            delta: delta.kind(),
            outcome,
            message: None,
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Everything a handler may consult while judging a delta.
pub struct DiffContext<'a> {
    pub project: &'a dyn Project,
    pub registry: &'a AspectRegistry,
    pub config: &'a DiffConfig,
    /// Fingerprints recorded for the previous push, if known.
    pub previous: Option<&'a [Fingerprint]>,
    pub deadline: Deadline,
}

/// A step in an aspect's diff workflow.
///
/// Returning `None` means the handler has nothing to say about this delta.
pub trait DiffHandler: Send + Sync {
    fn name(&self) -> &str;

    fn handle(
        &self,
        ctx: &DiffContext<'_>,
        aspect: &Aspect,
        delta: &FingerprintDelta,
    ) -> Option<DeltaReport>;
}

/// Enforces target fingerprints, converging when configured to.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTargetDiffHandler;

impl DefaultTargetDiffHandler {
    const NAME: &'static str = "target";

    fn converge(
        &self,
        ctx: &DiffContext<'_>,
        aspect: &Aspect,
        delta: &FingerprintDelta,
        target: &Fingerprint,
    ) -> DeltaReport {
        let report = |outcome| DeltaReport::new(Self::NAME, Some(aspect), delta, outcome);

        let applied = catch_unwind(AssertUnwindSafe(|| {
            aspect.apply(ctx.project, target, ctx.deadline)
        }));
        match applied {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(fingerprint = %target.name, aspect = %aspect.name(), error = %e, "apply failed");
                return report(DeltaOutcome::ConvergenceFailed).with_message(e.to_string());
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                tracing::warn!(fingerprint = %target.name, aspect = %aspect.name(), panic = %msg, "apply panicked");
                return report(DeltaOutcome::ConvergenceFailed)
                    .with_message(format!("apply panicked: {}", msg));
            }
        }

        if !ctx.config.verify_convergence {
            return report(DeltaOutcome::Converged)
                .with_message(format!("applied {}", aspect.to_displayable(target)));
        }

        match ctx.registry.extract_aspect(aspect, ctx.project, ctx.deadline) {
            Ok(after) => match find(&after, &target.name) {
                Some(now) if now.matches(target) => report(DeltaOutcome::Converged)
                    .with_message(format!("applied {}", aspect.to_displayable(target))),
                Some(now) => report(DeltaOutcome::ConvergenceFailed).with_message(format!(
                    "project still differs after apply: {}",
                    aspect.describe_change(Some(now), target)
                )),
                None => report(DeltaOutcome::ConvergenceFailed).with_message(format!(
                    "'{}' not found after apply",
                    target.name
                )),
            },
            Err(e) => report(DeltaOutcome::ConvergenceFailed)
                .with_message(format!("re-extraction after apply failed: {}", e)),
        }
    }
}

impl DiffHandler for DefaultTargetDiffHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn handle(
        &self,
        ctx: &DiffContext<'_>,
        aspect: &Aspect,
        delta: &FingerprintDelta,
    ) -> Option<DeltaReport> {
        if !aspect.is_target_managed() {
            return None;
        }
        let report = |outcome| DeltaReport::new(Self::NAME, Some(aspect), delta, outcome);

        match delta {
            FingerprintDelta::Unchanged { .. } => Some(report(DeltaOutcome::Compliant)),
            FingerprintDelta::Added { .. } => Some(report(DeltaOutcome::NoTarget)),
            FingerprintDelta::Changed { reference: target, .. }
            | FingerprintDelta::Removed { fingerprint: target } => {
                if ctx.config.auto_converge && aspect.can_apply() {
                    Some(self.converge(ctx, aspect, delta, target))
                } else {
                    Some(
                        report(DeltaOutcome::DriftDetected)
                            .with_message(aspect.describe_change(delta.current(), target)),
                    )
                }
            }
        }
    }
}

/// Reports fingerprints that differ from the previous push's snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct PreviousPushHandler;

impl DiffHandler for PreviousPushHandler {
    fn name(&self) -> &str {
        "previous"
    }

    fn handle(
        &self,
        ctx: &DiffContext<'_>,
        aspect: &Aspect,
        delta: &FingerprintDelta,
    ) -> Option<DeltaReport> {
        let previous = ctx.previous?;
        let current = delta.current()?;
        let report = DeltaReport::new(self.name(), Some(aspect), delta, DeltaOutcome::ChangedSincePrevious);
        match find(previous, &current.name) {
            Some(before) if before.matches(current) => None,
            Some(before) => Some(report.with_message(aspect.describe_change(Some(before), current))),
            None => Some(report.with_message(format!(
                "new since previous push: {}",
                aspect.to_displayable(current)
            ))),
        }
    }
}

/// Result of evaluating one extraction against targets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffEvaluation {
    pub deltas: Vec<FingerprintDelta>,
    pub reports: Vec<DeltaReport>,
}

impl DiffEvaluation {
    fn with_outcome(&self, outcome: DeltaOutcome) -> impl Iterator<Item = &DeltaReport> {
        self.reports.iter().filter(move |r| r.outcome == outcome)
    }

    pub fn convergence_failures(&self) -> Vec<&DeltaReport> {
        self.with_outcome(DeltaOutcome::ConvergenceFailed).collect()
    }

    pub fn drift(&self) -> Vec<&DeltaReport> {
        self.with_outcome(DeltaOutcome::DriftDetected).collect()
    }

    pub fn converged(&self) -> Vec<&DeltaReport> {
        self.with_outcome(DeltaOutcome::Converged).collect()
    }

    /// No outstanding drift and no failed convergence.
    pub fn is_compliant(&self) -> bool {
        self.drift().is_empty() && self.convergence_failures().is_empty()
    }

    /// The first report for `fingerprint` with the given handler.
    pub fn report_for(&self, fingerprint: &str, handler: &str) -> Option<&DeltaReport> {
        self.reports
            .iter()
            .find(|r| r.fingerprint == fingerprint && r.handler == handler)
    }
}

/// Runs handler chains over the deltas of one evaluation.
pub struct DiffWorkflow {
    registry: Arc<AspectRegistry>,
    config: DiffConfig,
    handlers: Vec<Arc<dyn DiffHandler>>,
}

impl DiffWorkflow {
    pub fn new(registry: Arc<AspectRegistry>, config: DiffConfig) -> Self {
        Self {
            registry,
            config,
            handlers: vec![
                Arc::new(DefaultTargetDiffHandler),
                Arc::new(PreviousPushHandler),
            ],
        }
    }

    /// Replace the default handler chain.
    pub fn with_handlers(mut self, handlers: Vec<Arc<dyn DiffHandler>>) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn registry(&self) -> &Arc<AspectRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &DiffConfig {
        &self.config
    }

    /// Compare `current` against `targets` and run each delta through its
    /// owner's handlers, in delta order.
    pub fn evaluate(
        &self,
        project: &dyn Project,
        current: &[Fingerprint],
        targets: &[Fingerprint],
        previous: Option<&[Fingerprint]>,
        deadline: Deadline,
    ) -> DiffEvaluation {
        let ctx = DiffContext {
            project,
            registry: &self.registry,
            config: &self.config,
            previous,
            deadline,
        };

        let deltas = diff(current, targets);
        let mut reports = Vec::new();

        for delta in &deltas {
            let aspect = match self.registry.owner_of(delta.fingerprint()) {
                Ok(aspect) => aspect,
                Err(unowned) => {
                    tracing::info!(fingerprint = %delta.name(), "fingerprint has no owning aspect");
                    reports.push(
                        DeltaReport::new("registry", None, delta, DeltaOutcome::Unowned)
                            .with_message(unowned.to_string()),
                    );
                    continue;
                }
            };

            let chain: &[Arc<dyn DiffHandler>] = if aspect.workflows().is_empty() {
                &self.handlers
            } else {
                aspect.workflows()
            };

            for handler in chain {
                let handled = catch_unwind(AssertUnwindSafe(|| handler.handle(&ctx, aspect, delta)));
                match handled {
                    Ok(Some(report)) => {
                        tracing::debug!(
                            fingerprint = %report.fingerprint,
                            handler = %report.handler,
                            outcome = %report.outcome,
                            "delta handled"
                        );
                        reports.push(report);
                    }
                    Ok(None) => {}
                    Err(payload) => {
                        let msg = panic_message(payload.as_ref());
                        tracing::warn!(handler = %handler.name(), fingerprint = %delta.name(), panic = %msg, "diff handler panicked");
                        reports.push(
                            DeltaReport::new(handler.name(), Some(aspect.as_ref()), delta, DeltaOutcome::ConvergenceFailed)
                                .with_message(format!("handler panicked: {}", msg)),
                        );
                    }
                }
            }
        }

        DiffEvaluation { deltas, reports }
    }
}
