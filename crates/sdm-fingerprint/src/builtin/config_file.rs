// config_file.rs — Fingerprint of a single configuration file.

use serde::{Deserialize, Serialize};

use sdm_core::{Deadline, Project};

use crate::aspect::{Apply, Aspect, Extract};
use crate::error::{ApplyError, ExtractionError};
use crate::fingerprint::Fingerprint;

/// Payload of a config file fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFileData {
    pub path: String,
    pub content: String,
}

/// Tracks one file by normalized content. Absent file, no fingerprint.
#[derive(Debug, Clone)]
pub struct ConfigFileAspect {
    name: String,
    path: String,
}

impl ConfigFileAspect {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// The shared ELK logging configuration.
    pub fn logback() -> Self {
        Self::new("elk-logback", "resources/logback.xml")
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn into_aspect(self, display_name: &str) -> Aspect {
        let name = self.name.clone();
        let applier = self.clone();
        Aspect::new(name, self)
            .with_display_name(display_name)
            .with_apply(applier)
            .with_renderer_fn(|fp: &Fingerprint| match fp.data_as::<ConfigFileData>() {
                Ok(data) => format!("{} ({})", fp.name, data.path),
                Err(_) => fp.name.clone(),
            })
    }
}

/// Line endings unified, trailing whitespace dropped, one final newline.
pub fn normalize_content(content: &str) -> String {
    let mut out: String = content
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_end()
        .to_string();
    out.push('\n');
    out
}

impl Extract for ConfigFileAspect {
    fn extract(
        &self,
        project: &dyn Project,
        deadline: Deadline,
    ) -> Result<Vec<Fingerprint>, ExtractionError> {
        if deadline.expired() {
            return Err(ExtractionError::DeadlineExceeded {
                aspect: self.name.clone(),
            });
        }
        let Some(content) = project.read_optional(&self.path)? else {
            return Ok(Vec::new());
        };
        let data = ConfigFileData {
            path: self.path.clone(),
            content: normalize_content(&content),
        };
        let value = serde_json::to_value(&data).map_err(|e| ExtractionError::Malformed {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        Ok(vec![Fingerprint::new(&self.name, &self.name, value)])
    }
}

impl Apply for ConfigFileAspect {
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
        let data: ConfigFileData = target.data_as().map_err(|e| ApplyError::InvalidTarget {
            name: target.name.clone(),
            reason: e.to_string(),
        })?;
        project.write(&data.path, &data.content)?;
        tracing::info!(file = %data.path, fingerprint = %target.name, "config file rewritten to target");
        Ok(())
    }
}
