// loader.rs — Resolving a repository revision to a Project.
//
// Cloning and checkout belong to the SCM integration. The loader contract
// is just "give me a file tree for this repo at this revision"; the
// directory loader serves checkouts that already exist on disk.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::ProjectError;
use crate::project::{LocalProject, Project};
use crate::push::RepoId;

/// Provides project snapshots for evaluation.
pub trait ProjectLoader: Send + Sync {
    fn load(&self, repo: &RepoId, revision: &str) -> Result<Arc<dyn Project>, ProjectError>;
}

/// Serves existing checkouts from a fixed map of repo → directory.
///
/// The revision is recorded in logs only; the directory is assumed to
/// already be at the pushed revision.
#[derive(Debug, Default)]
pub struct DirectoryLoader {
    checkouts: BTreeMap<RepoId, PathBuf>,
}

impl DirectoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkout(mut self, repo: RepoId, dir: impl Into<PathBuf>) -> Self {
        self.checkouts.insert(repo, dir.into());
        self
    }
}

impl ProjectLoader for DirectoryLoader {
    fn load(&self, repo: &RepoId, revision: &str) -> Result<Arc<dyn Project>, ProjectError> {
        let dir = self
            .checkouts
            .get(repo)
            .ok_or_else(|| ProjectError::UnknownRepo(repo.to_string()))?;
        if !dir.is_dir() {
            return Err(ProjectError::NotFound {
                path: dir.display().to_string(),
            });
        }
        tracing::debug!(repo = %repo, revision, dir = %dir.display(), "loading checkout");
        Ok(Arc::new(LocalProject::new(repo.clone(), dir.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn loads_registered_checkout() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("project.clj"), "(defproject)").unwrap();
        let repo = RepoId::parse("acme/widget");
        let loader = DirectoryLoader::new().with_checkout(repo.clone(), dir.path());

        let project = loader.load(&repo, "abc123").unwrap();
        assert_eq!(project.id(), &repo);
        assert!(project.exists("project.clj"));
    }

    #[test]
    fn unknown_repo_is_an_error() {
        let loader = DirectoryLoader::new();
        let err = loader.load(&RepoId::parse("x/y"), "abc").err().unwrap();
        assert!(matches!(err, ProjectError::UnknownRepo(_)));
    }
}
