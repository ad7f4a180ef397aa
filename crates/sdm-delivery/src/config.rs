//! Delivery configuration structures

use std::path::{Path, PathBuf};

use sdm_core::ConfigurationError;
use sdm_fingerprint::DiffConfig;
use sdm_goal::SchedulerConfig;
use serde::{Deserialize, Serialize};

use crate::env::EnvConfig;
use crate::exec::Command;
use crate::inspection::InspectionCommand;

/// Default location of the delivery config, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".sdm/delivery.toml";

/// Top-level delivery configuration from .sdm/delivery.toml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub diff: DiffConfig,

    /// Formatter commands run by the autofix goal on the default branch
    #[serde(default)]
    pub autofix: CommandsConfig,

    /// Commands for the build goal
    #[serde(default = "default_build")]
    pub build: CommandsConfig,

    /// Commands for the publish goal; they see the recorded version as SDM_VERSION
    #[serde(default = "default_publish")]
    pub publish: CommandsConfig,

    /// Commands for the tag goal; empty means the goal only marks the release
    #[serde(default)]
    pub tag: CommandsConfig,

    #[serde(default)]
    pub inspect: InspectConfig,

    #[serde(default)]
    pub version: VersionConfig,

    #[serde(default)]
    pub env: EnvConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            diff: DiffConfig::default(),
            autofix: CommandsConfig::default(),
            build: default_build(),
            publish: default_publish(),
            tag: CommandsConfig::default(),
            inspect: InspectConfig::default(),
            version: VersionConfig::default(),
            env: EnvConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// An ordered command list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default)]
    pub commands: Vec<Command>,
}

/// Review commands run by the inspection goal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectConfig {
    #[serde(default)]
    pub commands: Vec<InspectionCommand>,
}

/// Where the project version lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionConfig {
    /// Project-relative file holding the version
    #[serde(default = "default_version_file")]
    pub file: String,

    /// Regex whose first capture group is the version
    #[serde(default = "default_version_pattern")]
    pub pattern: String,
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            file: default_version_file(),
            pattern: default_version_pattern(),
        }
    }
}

/// Local persistence for targets, previous-push fingerprints and reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_targets_dir")]
    pub targets_dir: PathBuf,

    #[serde(default = "default_previous_dir")]
    pub previous_dir: PathBuf,

    #[serde(default = "default_report_log")]
    pub report_log: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            targets_dir: default_targets_dir(),
            previous_dir: default_previous_dir(),
            report_log: default_report_log(),
        }
    }
}

// Serde default functions
fn default_build() -> CommandsConfig {
    CommandsConfig {
        commands: vec![Command::new("lein").arg("test")],
    }
}

fn default_publish() -> CommandsConfig {
    CommandsConfig {
        commands: vec![Command::new("lein").arg("deploy")],
    }
}

fn default_version_file() -> String {
    "project.clj".to_string()
}

fn default_version_pattern() -> String {
    r#"\(defproject\s+\S+\s+"([^"]+)""#.to_string()
}

fn default_targets_dir() -> PathBuf {
    PathBuf::from(".sdm/targets")
}

fn default_previous_dir() -> PathBuf {
    PathBuf::from(".sdm/previous")
}

fn default_report_log() -> PathBuf {
    PathBuf::from(".sdm/reports.jsonl")
}

impl DeliveryConfig {
    /// Load delivery config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigurationError::InvalidFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(path, &content)
    }

    /// Load the config if the file exists, otherwise defaults. A file that
    /// exists but does not parse is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigurationError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no delivery config; using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    fn parse(path: &Path, content: &str) -> Result<Self, ConfigurationError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigurationError::InvalidFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        regex::Regex::new(&config.version.pattern).map_err(|e| ConfigurationError::InvalidPattern {
            pattern: config.version.pattern.clone(),
            reason: e.to_string(),
        })?;
        Ok(config)
    }

    /// Resolve the storage paths against `root`.
    pub fn storage_under(&self, root: &Path) -> StorageConfig {
        StorageConfig {
            targets_dir: root.join(&self.storage.targets_dir),
            previous_dir: root.join(&self.storage.previous_dir),
            report_log: root.join(&self.storage.report_log),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("delivery.toml");
        std::fs::write(&path, "").unwrap();

        let config = DeliveryConfig::load(&path).unwrap();
        assert_eq!(config, DeliveryConfig::default());
        assert_eq!(config.scheduler.goal_timeout_secs, 1800);
        assert!(!config.diff.auto_converge);
        assert!(config.diff.verify_convergence);
        assert_eq!(config.version.file, "project.clj");
        assert_eq!(config.build.commands, vec![Command::new("lein").arg("test")]);
        assert_eq!(config.publish.commands, vec![Command::new("lein").arg("deploy")]);
        assert!(config.tag.commands.is_empty());
    }

    #[test]
    fn full_config_parses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("delivery.toml");
        std::fs::write(
            &path,
            r#"
[scheduler]
goal_timeout_secs = 600

[diff]
auto_converge = true

[[build.commands]]
command = "./atomist.sh"

[[publish.commands]]
command = "lein"
args = ["deploy"]

[[inspect.commands]]
command = "lein"
args = ["deps", ":tree"]
category = "dependency confusion"
severity = "error"
error_marker = "confusing"

[env]
inherit = false
base = { LEIN_SNAPSHOTS_IN_RELEASE = "true" }

[storage]
targets_dir = "baselines"
"#,
        )
        .unwrap();

        let config = DeliveryConfig::load(&path).unwrap();
        assert_eq!(config.scheduler.goal_timeout_secs, 600);
        assert!(config.diff.auto_converge);
        assert_eq!(config.build.commands, vec![Command::new("./atomist.sh")]);
        assert_eq!(config.publish.commands[0].args, vec!["deploy"]);
        assert_eq!(config.inspect.commands[0].error_marker.as_deref(), Some("confusing"));
        assert!(!config.env.inherit);
        assert_eq!(config.env.base["LEIN_SNAPSHOTS_IN_RELEASE"], "true");
        assert_eq!(config.storage.targets_dir, PathBuf::from("baselines"));
        assert_eq!(config.storage.previous_dir, PathBuf::from(".sdm/previous"));
    }

    #[test]
    fn missing_file_is_default_but_broken_file_is_not() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("delivery.toml");
        assert_eq!(DeliveryConfig::load_or_default(&path).unwrap(), DeliveryConfig::default());

        std::fs::write(&path, "[scheduler\n").unwrap();
        assert!(matches!(
            DeliveryConfig::load_or_default(&path),
            Err(ConfigurationError::InvalidFile { .. })
        ));
    }

    #[test]
    fn bad_version_pattern_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("delivery.toml");
        std::fs::write(&path, "[version]\npattern = \"(unclosed\"\n").unwrap();
        assert!(matches!(
            DeliveryConfig::load(&path),
            Err(ConfigurationError::InvalidPattern { .. })
        ));
    }
}
