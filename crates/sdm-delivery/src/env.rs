// env.rs — Layered environment for goal subprocesses.
//
// Precedence, lowest first:
//   1. the inherited process environment (when `inherit` is on)
//   2. `[env.base]` from the delivery config
//   3. the project's own env file (`.sdm/env.toml`), if present
//   4. per-call overrides
// A later layer replaces a key outright; values are never merged.

use std::collections::BTreeMap;
use std::path::PathBuf;

use sdm_core::Project;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;
use crate::exec::SpawnOptions;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Start from the environment of the running process.
    #[serde(default = "default_inherit")]
    pub inherit: bool,

    #[serde(default)]
    pub base: BTreeMap<String, String>,

    /// Project-relative path of the per-project env file.
    #[serde(default = "default_project_file")]
    pub project_file: String,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            inherit: default_inherit(),
            base: BTreeMap::new(),
            project_file: default_project_file(),
        }
    }
}

fn default_inherit() -> bool {
    true
}

fn default_project_file() -> String {
    ".sdm/env.toml".to_string()
}

/// Resolves spawn options for a project.
#[derive(Debug, Clone, Default)]
pub struct EnvLayers {
    config: EnvConfig,
    inherited: Option<BTreeMap<String, String>>,
}

impl EnvLayers {
    pub fn new(config: EnvConfig) -> Self {
        Self {
            config,
            inherited: None,
        }
    }

    /// Use `vars` in place of the process environment for layer 1.
    pub fn with_inherited(mut self, vars: BTreeMap<String, String>) -> Self {
        self.inherited = Some(vars);
        self
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn resolve(
        &self,
        project: &dyn Project,
        overrides: &BTreeMap<String, String>,
    ) -> Result<SpawnOptions, DeliveryError> {
        let mut env = BTreeMap::new();
        if self.config.inherit {
            match &self.inherited {
                Some(vars) => env.extend(vars.clone()),
                None => env.extend(std::env::vars()),
            }
        }
        env.extend(self.config.base.clone());
        env.extend(self.project_layer(project)?);
        env.extend(overrides.clone());

        Ok(SpawnOptions {
            cwd: project.base_dir().map(PathBuf::from),
            env,
            timeout: None,
        })
    }

    fn project_layer(&self, project: &dyn Project) -> Result<BTreeMap<String, String>, DeliveryError> {
        let path = &self.config.project_file;
        let Some(content) = project.read_optional(path)? else {
            tracing::debug!(project = %project.id(), file = %path, "no project env file");
            return Ok(BTreeMap::new());
        };
        toml::from_str(&content).map_err(|e| DeliveryError::EnvFile {
            path: path.clone(),
            reason: e.to_string(),
        })
    }
}
