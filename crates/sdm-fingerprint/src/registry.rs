// registry.rs — AspectRegistry: ownership routing and fault-isolated extraction.
//
// Aspects are kept in registration order, which is also extraction order,
// so a pass over the same project always yields the same fingerprint list.
// Registration rejects a second aspect whose selector overlaps an existing
// one; lookups therefore never have to break ties.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use sdm_core::{ConfigurationError, Deadline, Project};

use crate::aspect::Aspect;
use crate::error::{ExtractionError, UnownedFingerprint};
use crate::fingerprint::Fingerprint;

/// One aspect's extraction failure within a pass.
#[derive(Debug)]
pub struct AspectFailure {
    pub aspect: String,
    pub error: ExtractionError,
}

/// Result of extracting every registered aspect from one project.
#[derive(Debug, Default)]
pub struct ExtractionPass {
    /// Fingerprints from every aspect that succeeded, in aspect order.
    pub fingerprints: Vec<Fingerprint>,
    /// Aspects whose fingerprints are absent from this pass.
    pub failures: Vec<AspectFailure>,
}

impl ExtractionPass {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed(&self, aspect: &str) -> bool {
        self.failures.iter().any(|f| f.aspect == aspect)
    }
}

/// The set of aspects a machine knows about.
#[derive(Debug, Default)]
pub struct AspectRegistry {
    aspects: Vec<Arc<Aspect>>,
}

impl AspectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an aspect. Fails if its name is taken or its selector claims a
    /// fingerprint name another aspect already claims.
    pub fn register(&mut self, aspect: Aspect) -> Result<(), ConfigurationError> {
        for existing in &self.aspects {
            if existing.name() == aspect.name() {
                return Err(ConfigurationError::DuplicateAspect(aspect.name().to_string()));
            }
            if let Some(probe) = existing.selector().overlap(aspect.selector()) {
                return Err(ConfigurationError::AmbiguousOwnership {
                    aspect: aspect.name().to_string(),
                    existing: existing.name().to_string(),
                    probe,
                });
            }
        }
        tracing::debug!(aspect = %aspect.name(), selector = %aspect.selector(), "aspect registered");
        self.aspects.push(Arc::new(aspect));
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, aspect: Aspect) -> Result<Self, ConfigurationError> {
        self.register(aspect)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Aspect>> {
        self.aspects.iter().find(|a| a.name() == name)
    }

    pub fn aspects(&self) -> &[Arc<Aspect>] {
        &self.aspects
    }

    pub fn len(&self) -> usize {
        self.aspects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aspects.is_empty()
    }

    /// The unique aspect owning `fingerprint`.
    pub fn owner_of(&self, fingerprint: &Fingerprint) -> Result<&Arc<Aspect>, UnownedFingerprint> {
        self.owner_of_name(&fingerprint.name)
    }

    /// Exact selectors are consulted before prefixes. With overlap rejected
    /// at registration at most one aspect can match either way.
    pub fn owner_of_name(&self, name: &str) -> Result<&Arc<Aspect>, UnownedFingerprint> {
        self.aspects
            .iter()
            .find(|a| a.claims_exactly(name))
            .or_else(|| self.aspects.iter().find(|a| a.owns_name(name)))
            .ok_or_else(|| UnownedFingerprint {
                name: name.to_string(),
            })
    }

    /// Run every aspect's extractor over `project`.
    ///
    /// A failing, panicking or misbehaving aspect is recorded in
    /// `failures` and contributes no fingerprints; the others are
    /// unaffected.
    pub fn extract_all(&self, project: &dyn Project, deadline: Deadline) -> ExtractionPass {
        let mut pass = ExtractionPass::default();
        for aspect in &self.aspects {
            match self.extract_aspect(aspect, project, deadline) {
                Ok(fps) => pass.fingerprints.extend(fps),
                Err(error) => {
                    tracing::warn!(
                        aspect = %aspect.name(),
                        repo = %project.id(),
                        error = %error,
                        "aspect extraction failed; its fingerprints are absent from this pass"
                    );
                    pass.failures.push(AspectFailure {
                        aspect: aspect.name().to_string(),
                        error,
                    });
                }
            }
        }
        tracing::debug!(
            repo = %project.id(),
            fingerprints = pass.fingerprints.len(),
            failures = pass.failures.len(),
            "extraction pass finished"
        );
        pass
    }

    /// Extract a single aspect, validating what it returns.
    ///
    /// Every fingerprint must be owned by the aspect and names must be
    /// unique. The fingerprint `kind` is stamped with the aspect name.
    pub fn extract_aspect(
        &self,
        aspect: &Aspect,
        project: &dyn Project,
        deadline: Deadline,
    ) -> Result<Vec<Fingerprint>, ExtractionError> {
        if deadline.expired() {
            return Err(ExtractionError::DeadlineExceeded {
                aspect: aspect.name().to_string(),
            });
        }

        let raw = catch_unwind(AssertUnwindSafe(|| aspect.extract(project, deadline)))
            .map_err(|payload| ExtractionError::Panicked(panic_message(payload.as_ref())))??;

        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(raw.len());
        for mut fp in raw {
            if !aspect.owns(&fp) {
                return Err(ExtractionError::Foreign {
                    aspect: aspect.name().to_string(),
                    name: fp.name,
                });
            }
            if !seen.insert(fp.name.clone()) {
                return Err(ExtractionError::DuplicateName { name: fp.name });
            }
            fp.kind = aspect.name().to_string();
            out.push(fp);
        }
        Ok(out)
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
