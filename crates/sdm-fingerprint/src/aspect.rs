// aspect.rs — Aspect: the extractor/applier/comparator for one fingerprint family.
//
// An Aspect is a record of explicit capabilities. Extraction is mandatory;
// apply, diff summary and display rendering are optional fields that the
// diff workflow checks before use. Each capability is a small trait with a
// blanket implementation for closures, so aspects can be built inline or
// from dedicated types (see `builtin`).
//
// Ownership is declared with a closed Selector (exact name or name prefix)
// rather than an arbitrary predicate, which lets the registry prove at
// registration time that no two aspects claim the same fingerprint.

use std::fmt;
use std::sync::Arc;

use sdm_core::{Deadline, Project};

use crate::error::{ApplyError, ExtractionError};
use crate::fingerprint::Fingerprint;
use crate::workflow::DiffHandler;

/// Which fingerprint names an aspect owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Exactly one name.
    Exact(String),
    /// Every name starting with the prefix.
    Prefix(String),
}

impl Selector {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Selector::Exact(exact) => name == exact,
            Selector::Prefix(prefix) => name.starts_with(prefix.as_str()),
        }
    }

    /// A fingerprint name both selectors would claim, if any.
    pub fn overlap(&self, other: &Selector) -> Option<String> {
        match (self, other) {
            (Selector::Exact(a), Selector::Exact(b)) => (a == b).then(|| a.clone()),
            (Selector::Exact(a), Selector::Prefix(p)) | (Selector::Prefix(p), Selector::Exact(a)) => {
                a.starts_with(p.as_str()).then(|| a.clone())
            }
            (Selector::Prefix(p), Selector::Prefix(q)) => {
                if p.starts_with(q.as_str()) {
                    Some(p.clone())
                } else if q.starts_with(p.as_str()) {
                    Some(q.clone())
                } else {
                    None
                }
            }
        }
    }

    fn is_exact(&self) -> bool {
        matches!(self, Selector::Exact(_))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Exact(name) => write!(f, "{}", name),
            Selector::Prefix(prefix) => write!(f, "{}*", prefix),
        }
    }
}

/// Produce fingerprints from a project snapshot.
///
/// Must be a pure function of project content: extracting the same
/// snapshot twice yields the same names and data.
pub trait Extract: Send + Sync {
    fn extract(
        &self,
        project: &dyn Project,
        deadline: Deadline,
    ) -> Result<Vec<Fingerprint>, ExtractionError>;
}

impl<F> Extract for F
where
    F: Fn(&dyn Project, Deadline) -> Result<Vec<Fingerprint>, ExtractionError> + Send + Sync,
{
    fn extract(
        &self,
        project: &dyn Project,
        deadline: Deadline,
    ) -> Result<Vec<Fingerprint>, ExtractionError> {
        self(project, deadline)
    }
}

/// Edit a project so that extraction would yield `target`.
pub trait Apply: Send + Sync {
    fn apply(
        &self,
        project: &dyn Project,
        target: &Fingerprint,
        deadline: Deadline,
    ) -> Result<(), ApplyError>;
}

impl<F> Apply for F
where
    F: Fn(&dyn Project, &Fingerprint, Deadline) -> Result<(), ApplyError> + Send + Sync,
{
    fn apply(
        &self,
        project: &dyn Project,
        target: &Fingerprint,
        deadline: Deadline,
    ) -> Result<(), ApplyError> {
        self(project, target, deadline)
    }
}

/// Human-readable diff between two fingerprints of the same name.
pub trait Summarize: Send + Sync {
    fn summarize(&self, from: &Fingerprint, to: &Fingerprint) -> String;
}

impl<F> Summarize for F
where
    F: Fn(&Fingerprint, &Fingerprint) -> String + Send + Sync,
{
    fn summarize(&self, from: &Fingerprint, to: &Fingerprint) -> String {
        self(from, to)
    }
}

/// Short display form of one fingerprint.
pub trait Render: Send + Sync {
    fn render(&self, fingerprint: &Fingerprint) -> String;
}

impl<F> Render for F
where
    F: Fn(&Fingerprint) -> String + Send + Sync,
{
    fn render(&self, fingerprint: &Fingerprint) -> String {
        self(fingerprint)
    }
}

/// A registered fingerprint family.
pub struct Aspect {
    name: String,
    display_name: String,
    selector: Selector,
    manages_targets: bool,
    extractor: Arc<dyn Extract>,
    applier: Option<Arc<dyn Apply>>,
    summarizer: Option<Arc<dyn Summarize>>,
    renderer: Option<Arc<dyn Render>>,
    workflows: Vec<Arc<dyn DiffHandler>>,
}

impl Aspect {
    /// An aspect owning exactly the fingerprint called `name`.
    pub fn new(name: impl Into<String>, extractor: impl Extract + 'static) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            selector: Selector::Exact(name.clone()),
            name,
            manages_targets: true,
            extractor: Arc::new(extractor),
            applier: None,
            summarizer: None,
            renderer: None,
            workflows: Vec::new(),
        }
    }

    /// Like [`Aspect::new`], with the closure signature spelled out so
    /// inline closures infer their argument types.
    pub fn from_fn<F>(name: impl Into<String>, extract: F) -> Self
    where
        F: Fn(&dyn Project, Deadline) -> Result<Vec<Fingerprint>, ExtractionError>
            + Send
            + Sync
            + 'static,
    {
        Self::new(name, extract)
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_selector(mut self, selector: Selector) -> Self {
        self.selector = selector;
        self
    }

    /// Own every fingerprint whose name starts with `prefix`.
    pub fn owning_prefix(self, prefix: impl Into<String>) -> Self {
        self.with_selector(Selector::Prefix(prefix.into()))
    }

    pub fn with_apply(mut self, applier: impl Apply + 'static) -> Self {
        self.applier = Some(Arc::new(applier));
        self
    }

    pub fn with_apply_fn<F>(self, apply: F) -> Self
    where
        F: Fn(&dyn Project, &Fingerprint, Deadline) -> Result<(), ApplyError>
            + Send
            + Sync
            + 'static,
    {
        self.with_apply(apply)
    }

    pub fn with_summary(mut self, summarizer: impl Summarize + 'static) -> Self {
        self.summarizer = Some(Arc::new(summarizer));
        self
    }

    pub fn with_summary_fn<F>(self, summary: F) -> Self
    where
        F: Fn(&Fingerprint, &Fingerprint) -> String + Send + Sync + 'static,
    {
        self.with_summary(summary)
    }

    pub fn with_renderer_fn<F>(mut self, render: F) -> Self
    where
        F: Fn(&Fingerprint) -> String + Send + Sync + 'static,
    {
        self.renderer = Some(Arc::new(render));
        self
    }

    /// Replace the default diff handlers for this aspect's deltas.
    pub fn with_workflow(mut self, handler: Arc<dyn DiffHandler>) -> Self {
        self.workflows.push(handler);
        self
    }

    /// Whether this aspect's fingerprints are checked against targets.
    pub fn manages_targets(mut self, manages: bool) -> Self {
        self.manages_targets = manages;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn is_target_managed(&self) -> bool {
        self.manages_targets
    }

    pub fn owns(&self, fingerprint: &Fingerprint) -> bool {
        self.owns_name(&fingerprint.name)
    }

    pub fn owns_name(&self, name: &str) -> bool {
        self.selector.matches(name)
    }

    pub(crate) fn claims_exactly(&self, name: &str) -> bool {
        self.selector.is_exact() && self.selector.matches(name)
    }

    pub fn can_apply(&self) -> bool {
        self.applier.is_some()
    }

    pub fn workflows(&self) -> &[Arc<dyn DiffHandler>] {
        &self.workflows
    }

    pub fn extract(
        &self,
        project: &dyn Project,
        deadline: Deadline,
    ) -> Result<Vec<Fingerprint>, ExtractionError> {
        self.extractor.extract(project, deadline)
    }

    /// Apply a target. `Unsupported` when the aspect has no applier.
    pub fn apply(
        &self,
        project: &dyn Project,
        target: &Fingerprint,
        deadline: Deadline,
    ) -> Result<(), ApplyError> {
        match &self.applier {
            Some(applier) => applier.apply(project, target, deadline),
            None => Err(ApplyError::Unsupported {
                name: target.name.clone(),
                reason: format!("aspect '{}' has no apply capability", self.name),
            }),
        }
    }

    /// Display form of one fingerprint; defaults to `name (sha7)`.
    pub fn to_displayable(&self, fingerprint: &Fingerprint) -> String {
        match &self.renderer {
            Some(renderer) => renderer.render(fingerprint),
            None => format!("{} ({})", fingerprint.name, fingerprint.short_sha()),
        }
    }

    /// The aspect's own summary, if it has one.
    pub fn summarize(&self, from: &Fingerprint, to: &Fingerprint) -> Option<String> {
        self.summarizer.as_ref().map(|s| s.summarize(from, to))
    }

    /// Explain the difference between `from` and `to` for human review,
    /// falling back to the display renderer when no summary exists.
    pub fn describe_change(&self, from: Option<&Fingerprint>, to: &Fingerprint) -> String {
        match from {
            Some(from) => self.summarize(from, to).unwrap_or_else(|| {
                format!(
                    "{} -> {}",
                    self.to_displayable(from),
                    self.to_displayable(to)
                )
            }),
            None => format!("missing; expected {}", self.to_displayable(to)),
        }
    }
}

impl fmt::Debug for Aspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aspect")
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .field("selector", &self.selector)
            .field("manages_targets", &self.manages_targets)
            .field("can_apply", &self.can_apply())
            .field("has_summary", &self.summarizer.is_some())
            .field("workflows", &self.workflows.len())
            .finish()
    }
}
