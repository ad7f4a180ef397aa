// dependencies.rs — Declared dependency coordinates from a build manifest.
//
// The manifest format is configured with a regex whose first two capture
// groups are the artifact and the version. The fingerprint payload is the
// ordered list of `artifact@version` strings as they appear in the file.
// Apply can only rewrite versions in place; it refuses to add or remove
// dependencies because it cannot know where in the manifest they belong.

use std::collections::{BTreeMap, HashSet};

use regex::Regex;
use sdm_core::{ConfigurationError, Deadline, Project};

use crate::aspect::{Apply, Aspect, Extract, Summarize};
use crate::error::{ApplyError, ExtractionError};
use crate::fingerprint::Fingerprint;

/// Leiningen vector form: `[group/artifact "version"`.
pub const LEIN_DEPENDENCY_PATTERN: &str = r#"\[([A-Za-z0-9_.\-/]+)\s+"([^"]+)""#;

#[derive(Debug, Clone)]
pub struct DependencyAspect {
    prefix: String,
    fingerprint_name: String,
    manifest: String,
    pattern: Regex,
}

impl DependencyAspect {
    pub fn new(
        prefix: impl Into<String>,
        manifest: impl Into<String>,
        pattern: &str,
    ) -> Result<Self, ConfigurationError> {
        let pattern_re = Regex::new(pattern).map_err(|e| ConfigurationError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        if pattern_re.captures_len() < 3 {
            return Err(ConfigurationError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "expected capture groups for artifact and version".to_string(),
            });
        }
        let prefix = prefix.into();
        Ok(Self {
            fingerprint_name: format!("{}-deps", prefix),
            prefix,
            manifest: manifest.into(),
            pattern: pattern_re,
        })
    }

    /// Dependencies of a Leiningen `project.clj`.
    pub fn lein() -> Result<Self, ConfigurationError> {
        Self::new("clojure-project", "project.clj", LEIN_DEPENDENCY_PATTERN)
    }

    pub fn fingerprint_name(&self) -> &str {
        &self.fingerprint_name
    }

    pub fn into_aspect(self, display_name: &str) -> Aspect {
        let prefix = self.prefix.clone();
        let applier = self.clone();
        let summarizer = self.clone();
        Aspect::new(prefix.clone(), self)
            .owning_prefix(prefix)
            .with_display_name(display_name)
            .with_apply(applier)
            .with_summary(summarizer)
            .with_renderer_fn(|fp: &Fingerprint| {
                let count = fp.data.as_array().map(Vec::len).unwrap_or(0);
                format!("{}: {} dependencies", fp.name, count)
            })
    }

    fn coordinates(&self, content: &str) -> Vec<(String, String)> {
        self.pattern
            .captures_iter(content)
            .filter_map(|caps| {
                let artifact = caps.get(1)?.as_str().to_string();
                let version = caps.get(2)?.as_str().to_string();
                Some((artifact, version))
            })
            .collect()
    }
}

/// Split `artifact@version` at the last `@`.
pub fn parse_coordinate(coordinate: &str) -> Option<(&str, &str)> {
    coordinate.rsplit_once('@')
}

fn coordinates_of(fp: &Fingerprint) -> Vec<(String, String)> {
    fp.data_as::<Vec<String>>()
        .unwrap_or_default()
        .iter()
        .filter_map(|c| parse_coordinate(c).map(|(a, v)| (a.to_string(), v.to_string())))
        .collect()
}

impl Extract for DependencyAspect {
    fn extract(
        &self,
        project: &dyn Project,
        deadline: Deadline,
    ) -> Result<Vec<Fingerprint>, ExtractionError> {
        if deadline.expired() {
            return Err(ExtractionError::DeadlineExceeded {
                aspect: self.prefix.clone(),
            });
        }
        let Some(content) = project.read_optional(&self.manifest)? else {
            return Ok(Vec::new());
        };
        let coords: Vec<String> = self
            .coordinates(&content)
            .into_iter()
            .map(|(artifact, version)| format!("{}@{}", artifact, version))
            .collect();
        Ok(vec![Fingerprint::new(
            &self.fingerprint_name,
            &self.prefix,
            serde_json::Value::from(coords),
        )])
    }
}

impl Apply for DependencyAspect {
    fn apply(
        &self,
        project: &dyn Project,
        target: &Fingerprint,
        deadline: Deadline,
    ) -> Result<(), ApplyError> {
        if deadline.expired() {
            return Err(ApplyError::DeadlineExceeded {
                name: target.name.clone(),
            });
        }
        let wanted: Vec<String> = target.data_as().map_err(|e| ApplyError::InvalidTarget {
            name: target.name.clone(),
            reason: e.to_string(),
        })?;
        let mut versions = BTreeMap::new();
        for coordinate in &wanted {
            let (artifact, version) =
                parse_coordinate(coordinate).ok_or_else(|| ApplyError::InvalidTarget {
                    name: target.name.clone(),
                    reason: format!("'{}' is not artifact@version", coordinate),
                })?;
            versions.insert(artifact.to_string(), version.to_string());
        }

        let content = project.read(&self.manifest)?;
        let mut present = HashSet::new();
        let mut out = String::with_capacity(content.len());
        let mut last = 0;
        for caps in self.pattern.captures_iter(&content) {
            let (Some(artifact), Some(version)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            present.insert(artifact.as_str().to_string());
            match versions.get(artifact.as_str()) {
                Some(target_version) => {
                    out.push_str(&content[last..version.start()]);
                    out.push_str(target_version);
                    last = version.end();
                }
                None => {
                    return Err(ApplyError::Unsupported {
                        name: target.name.clone(),
                        reason: format!("cannot remove dependency {}", artifact.as_str()),
                    })
                }
            }
        }
        out.push_str(&content[last..]);

        if let Some(missing) = versions.keys().find(|a| !present.contains(*a)) {
            return Err(ApplyError::Unsupported {
                name: target.name.clone(),
                reason: format!("cannot add dependency {} to {}", missing, self.manifest),
            });
        }

        project.write(&self.manifest, &out)?;
        tracing::info!(manifest = %self.manifest, fingerprint = %target.name, "dependency versions rewritten to target");
        Ok(())
    }
}

impl Summarize for DependencyAspect {
    /// `+` added, `-` removed, `~` version changed; one line each.
    fn summarize(&self, from: &Fingerprint, to: &Fingerprint) -> String {
        let before: BTreeMap<String, String> = coordinates_of(from).into_iter().collect();
        let after: BTreeMap<String, String> = coordinates_of(to).into_iter().collect();

        let mut lines = Vec::new();
        for (artifact, version) in &after {
            match before.get(artifact) {
                None => lines.push(format!("+ {} {}", artifact, version)),
                Some(old) if old != version => {
                    lines.push(format!("~ {} {} -> {}", artifact, old, version))
                }
                Some(_) => {}
            }
        }
        for (artifact, version) in &before {
            if !after.contains_key(artifact) {
                lines.push(format!("- {} {}", artifact, version));
            }
        }
        if lines.is_empty() {
            "dependency order changed".to_string()
        } else {
            lines.join("\n")
        }
    }
}
