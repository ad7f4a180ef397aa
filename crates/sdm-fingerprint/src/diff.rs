// diff.rs — Name-matched comparison of two fingerprint sets.
//
// `diff(current, reference)` pairs fingerprints by name. The reference is
// usually the target baseline, but the same function compares against the
// previous push's snapshot. Output order is the current extraction order
// followed by reference-only names in reference order, so the delta list is
// stable for identical inputs.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

/// How one fingerprint name differs between two sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "delta", rename_all = "snake_case")]
pub enum FingerprintDelta {
    /// Present in both with the same payload.
    Unchanged { fingerprint: Fingerprint },

    /// Present only in the current extraction.
    Added { fingerprint: Fingerprint },

    /// Present only in the reference set.
    Removed { fingerprint: Fingerprint },

    /// Present in both with different payloads.
    Changed {
        reference: Fingerprint,
        current: Fingerprint,
    },
}

impl FingerprintDelta {
    pub fn name(&self) -> &str {
        match self {
            FingerprintDelta::Unchanged { fingerprint }
            | FingerprintDelta::Added { fingerprint }
            | FingerprintDelta::Removed { fingerprint } => &fingerprint.name,
            FingerprintDelta::Changed { current, .. } => &current.name,
        }
    }

    pub fn kind(&self) -> DeltaKind {
        match self {
            FingerprintDelta::Unchanged { .. } => DeltaKind::Unchanged,
            FingerprintDelta::Added { .. } => DeltaKind::Added,
            FingerprintDelta::Removed { .. } => DeltaKind::Removed,
            FingerprintDelta::Changed { .. } => DeltaKind::Changed,
        }
    }

    /// The fingerprint as extracted now, if it exists in the project.
    pub fn current(&self) -> Option<&Fingerprint> {
        match self {
            FingerprintDelta::Unchanged { fingerprint } | FingerprintDelta::Added { fingerprint } => {
                Some(fingerprint)
            }
            FingerprintDelta::Changed { current, .. } => Some(current),
            FingerprintDelta::Removed { .. } => None,
        }
    }

    /// The reference side (target or previous), if there is one.
    pub fn reference(&self) -> Option<&Fingerprint> {
        match self {
            FingerprintDelta::Unchanged { fingerprint }
            | FingerprintDelta::Removed { fingerprint } => Some(fingerprint),
            FingerprintDelta::Changed { reference, .. } => Some(reference),
            FingerprintDelta::Added { .. } => None,
        }
    }

    /// Either side, preferring current. Used for ownership routing.
    pub fn fingerprint(&self) -> &Fingerprint {
        match self {
            FingerprintDelta::Unchanged { fingerprint }
            | FingerprintDelta::Added { fingerprint }
            | FingerprintDelta::Removed { fingerprint } => fingerprint,
            FingerprintDelta::Changed { current, .. } => current,
        }
    }
}

/// Discriminant of a [`FingerprintDelta`], for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    Unchanged,
    Added,
    Removed,
    Changed,
}

impl fmt::Display for DeltaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeltaKind::Unchanged => write!(f, "unchanged"),
            DeltaKind::Added => write!(f, "added"),
            DeltaKind::Removed => write!(f, "removed"),
            DeltaKind::Changed => write!(f, "changed"),
        }
    }
}

/// Compare `current` against `reference`, one delta per distinct name.
///
/// If a set repeats a name, the first occurrence wins.
pub fn diff(current: &[Fingerprint], reference: &[Fingerprint]) -> Vec<FingerprintDelta> {
    let mut by_name: HashMap<&str, &Fingerprint> = HashMap::with_capacity(reference.len());
    for fp in reference {
        by_name.entry(fp.name.as_str()).or_insert(fp);
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut deltas = Vec::with_capacity(current.len() + reference.len());

    for fp in current {
        if !seen.insert(fp.name.as_str()) {
            continue;
        }
        let delta = match by_name.get(fp.name.as_str()) {
            Some(reference) if reference.matches(fp) => FingerprintDelta::Unchanged {
                fingerprint: fp.clone(),
            },
            Some(reference) => FingerprintDelta::Changed {
                reference: (*reference).clone(),
                current: fp.clone(),
            },
            None => FingerprintDelta::Added {
                fingerprint: fp.clone(),
            },
        };
        deltas.push(delta);
    }

    for fp in reference {
        if seen.insert(fp.name.as_str()) {
            deltas.push(FingerprintDelta::Removed {
                fingerprint: fp.clone(),
            });
        }
    }

    deltas
}
