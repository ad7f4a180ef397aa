// version.rs — Versioner goal: stamp a unique version for each push.
//
// The project's declared version loses any -SNAPSHOT suffix and gains the
// branch (off the default branch) plus a UTC timestamp:
//   0.1.0-SNAPSHOT on main       → 0.1.0-20260112093005
//   0.1.0-SNAPSHOT on feature/x  → 0.1.0-feature/x.20260112093005
// The stamped version is written back into the version file and recorded
// per (repo, sha) so publish and tag goals of the same push can find it.
// The registry keeps a bounded number of pushes, oldest dropped first.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use sdm_core::{ConfigurationError, Project, PushEvent, RepoId};
use sdm_goal::{ExecuteGoalResult, Fulfillment, FulfillmentError, GoalInvocation};

use crate::config::VersionConfig;
use crate::error::DeliveryError;

const SNAPSHOT_SUFFIX: &str = "-SNAPSHOT";

/// The version to stamp for `push`, given the project's declared version.
pub fn next_version(current: &str, push: &PushEvent, now: DateTime<Utc>) -> String {
    let base = current.strip_suffix(SNAPSHOT_SUFFIX).unwrap_or(current);
    let branch = if push.is_default_branch() {
        String::new()
    } else {
        format!("{}.", push.branch)
    };
    format!("{}-{}{}", base, branch, now.format("%Y%m%d%H%M%S"))
}

/// Everything before the first `-`.
pub fn release_version(version: &str) -> &str {
    version.split('-').next().unwrap_or(version)
}

/// Pushes remembered by a [`VersionRegistry`] before the oldest is dropped.
pub const DEFAULT_RECORDED_PUSHES: usize = 1024;

type PushKey = (RepoId, String);

#[derive(Debug, Default)]
struct Recorded {
    versions: HashMap<PushKey, String>,
    order: VecDeque<PushKey>,
}

/// Versions stamped so far, by repository and commit. Holds at most
/// `capacity` pushes; recording past that forgets the oldest push.
#[derive(Debug)]
pub struct VersionRegistry {
    capacity: usize,
    recorded: Mutex<Recorded>,
}

impl Default for VersionRegistry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_RECORDED_PUSHES)
    }
}

impl VersionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            recorded: Mutex::new(Recorded::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, repo: &RepoId, sha: &str, version: impl Into<String>) {
        let key = (repo.clone(), sha.to_string());
        let mut recorded = self.lock();
        if recorded.versions.insert(key.clone(), version.into()).is_none() {
            recorded.order.push_back(key);
        }
        while recorded.order.len() > self.capacity {
            if let Some(oldest) = recorded.order.pop_front() {
                tracing::debug!(repo = %oldest.0, sha = %oldest.1, "forgetting stamped version");
                recorded.versions.remove(&oldest);
            }
        }
    }

    pub fn get(&self, repo: &RepoId, sha: &str) -> Option<String> {
        self.lock().versions.get(&(repo.clone(), sha.to_string())).cloned()
    }

    /// Drop the version of one push; returns it if it was recorded.
    pub fn forget(&self, repo: &RepoId, sha: &str) -> Option<String> {
        let key = (repo.clone(), sha.to_string());
        let mut recorded = self.lock();
        let version = recorded.versions.remove(&key)?;
        recorded.order.retain(|k| k != &key);
        Some(version)
    }

    pub fn len(&self) -> usize {
        self.lock().versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn require(&self, push: &PushEvent) -> Result<String, DeliveryError> {
        self.get(&push.repo, &push.sha)
            .ok_or_else(|| DeliveryError::VersionNotRecorded {
                repo: push.repo.to_string(),
                sha: push.sha.clone(),
            })
    }
}

/// Reads and rewrites the version in one project file.
#[derive(Debug, Clone)]
pub struct VersionFile {
    path: String,
    pattern: Regex,
}

impl VersionFile {
    pub fn new(path: impl Into<String>, pattern: &str) -> Result<Self, ConfigurationError> {
        let pattern = Regex::new(pattern).map_err(|e| ConfigurationError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        if pattern.captures_len() < 2 {
            return Err(ConfigurationError::InvalidPattern {
                pattern: pattern.as_str().to_string(),
                reason: "needs a capture group for the version".to_string(),
            });
        }
        Ok(Self {
            path: path.into(),
            pattern,
        })
    }

    pub fn from_config(config: &VersionConfig) -> Result<Self, ConfigurationError> {
        Self::new(config.file.clone(), &config.pattern)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn read(&self, project: &dyn Project) -> Result<String, DeliveryError> {
        let content = project.read(&self.path)?;
        self.pattern
            .captures(&content)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| DeliveryError::VersionNotFound {
                path: self.path.clone(),
            })
    }

    pub fn write(&self, project: &dyn Project, version: &str) -> Result<(), DeliveryError> {
        let content = project.read(&self.path)?;
        let range = self
            .pattern
            .captures(&content)
            .and_then(|c| c.get(1))
            .map(|m| m.range())
            .ok_or_else(|| DeliveryError::VersionNotFound {
                path: self.path.clone(),
            })?;
        let mut updated = String::with_capacity(content.len() + version.len());
        updated.push_str(&content[..range.start]);
        updated.push_str(version);
        updated.push_str(&content[range.end..]);
        project.write(&self.path, &updated)?;
        Ok(())
    }
}

/// Fulfillment of the version goal.
pub struct VersionFulfillment {
    file: VersionFile,
    registry: Arc<VersionRegistry>,
}

impl VersionFulfillment {
    pub fn new(file: VersionFile, registry: Arc<VersionRegistry>) -> Self {
        Self { file, registry }
    }

    fn stamp(&self, invocation: &GoalInvocation) -> Result<String, DeliveryError> {
        let project = invocation.project.as_ref();
        let current = self.file.read(project)?;
        let version = next_version(&current, &invocation.push, Utc::now());
        self.file.write(project, &version)?;
        self.registry
            .record(&invocation.push.repo, &invocation.push.sha, version.clone());
        tracing::info!(push = %invocation.push.label(), from = %current, to = %version, "version stamped");
        Ok(version)
    }
}

#[async_trait]
impl Fulfillment for VersionFulfillment {
    fn name(&self) -> &str {
        "versioner"
    }

    async fn execute(&self, invocation: &GoalInvocation) -> Result<ExecuteGoalResult, FulfillmentError> {
        invocation.check_deadline()?;
        let version = self.stamp(invocation)?;
        invocation.progress("in_process", format!("version {}", version));
        Ok(ExecuteGoalResult::success_with(version))
    }
}
