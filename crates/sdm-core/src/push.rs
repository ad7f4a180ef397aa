// push.rs — Push event metadata.
//
// A PushEvent is the read-only input to push tests and fulfillments. Source
// control access is external: whoever receives the webhook fills this in,
// including the changed-file list when it can be computed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies a repository as `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse `owner/name`. A bare name gets an empty owner.
    pub fn parse(slug: &str) -> Self {
        match slug.split_once('/') {
            Some((owner, name)) => Self::new(owner, name),
            None => Self::new("", slug),
        }
    }

    /// File-system safe form, used as a store key.
    pub fn key(&self) -> String {
        if self.owner.is_empty() {
            self.name.clone()
        } else {
            format!("{}__{}", self.owner, self.name)
        }
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.owner.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.owner, self.name)
        }
    }
}

/// An incoming push to a repository branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    pub repo: RepoId,
    pub branch: String,
    pub sha: String,
    pub default_branch: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Files changed since the previous push, when the SCM could tell us.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed_files: Option<Vec<String>>,

    pub timestamp: DateTime<Utc>,
}

impl PushEvent {
    pub fn new(
        repo: RepoId,
        branch: impl Into<String>,
        sha: impl Into<String>,
        default_branch: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            branch: branch.into(),
            sha: sha.into(),
            default_branch: default_branch.into(),
            committer: None,
            message: None,
            changed_files: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_changed_files(mut self, files: Vec<String>) -> Self {
        self.changed_files = Some(files);
        self
    }

    pub fn with_commit(mut self, committer: impl Into<String>, message: impl Into<String>) -> Self {
        self.committer = Some(committer.into());
        self.message = Some(message.into());
        self
    }

    pub fn is_default_branch(&self) -> bool {
        self.branch == self.default_branch
    }

    /// Short `repo@branch:sha7` label for logs.
    pub fn label(&self) -> String {
        let short = self.sha.get(..7).unwrap_or(&self.sha);
        format!("{}@{}:{}", self.repo, self.branch, short)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_id_parse_and_display() {
        let repo = RepoId::parse("atomist/clj-sdm");
        assert_eq!(repo.owner, "atomist");
        assert_eq!(repo.name, "clj-sdm");
        assert_eq!(repo.to_string(), "atomist/clj-sdm");
        assert_eq!(repo.key(), "atomist__clj-sdm");

        let bare = RepoId::parse("local");
        assert_eq!(bare.to_string(), "local");
        assert_eq!(bare.key(), "local");
    }

    #[test]
    fn default_branch_detection() {
        let push = PushEvent::new(RepoId::parse("o/r"), "main", "abc", "main");
        assert!(push.is_default_branch());
        let feature = PushEvent::new(RepoId::parse("o/r"), "feature-x", "abc", "main");
        assert!(!feature.is_default_branch());
    }

    #[test]
    fn label_truncates_sha() {
        let push = PushEvent::new(RepoId::parse("o/r"), "main", "0123456789abcdef", "main");
        assert_eq!(push.label(), "o/r@main:0123456");
        let short = PushEvent::new(RepoId::parse("o/r"), "main", "abc", "main");
        assert_eq!(short.label(), "o/r@main:abc");
    }

    #[test]
    fn optional_fields_omitted_from_json() {
        let push = PushEvent::new(RepoId::parse("o/r"), "main", "abc", "main");
        let json = serde_json::to_string(&push).unwrap();
        assert!(!json.contains("changed_files"));
        assert!(!json.contains("committer"));
        let restored: PushEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, push);
    }
}
