// project.rs — File-tree view of one repository revision.
//
// Extraction reads from a Project; convergence and autofix write to it.
// All methods take `&self` so one snapshot can be shared (behind an Arc)
// by every goal of a push evaluation. Writers serialize themselves through
// the scheduler's lock tokens, not through the Project.
//
// Paths are always relative, `/`-separated, and may not contain `..`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use glob::Pattern;

use crate::error::ProjectError;
use crate::push::RepoId;

/// Read/write access to a project's files.
pub trait Project: Send + Sync {
    /// Which repository this snapshot belongs to.
    fn id(&self) -> &RepoId;

    /// Read a file as UTF-8 text. Missing files return `ProjectError::NotFound`.
    fn read(&self, path: &str) -> Result<String, ProjectError>;

    /// Create or overwrite a file.
    fn write(&self, path: &str, content: &str) -> Result<(), ProjectError>;

    /// Delete a file. Returns false if it did not exist.
    fn delete(&self, path: &str) -> Result<bool, ProjectError>;

    /// All file paths, sorted.
    fn files(&self) -> Result<Vec<String>, ProjectError>;

    /// Directory on disk backing this project, if any. External commands
    /// need one to use as their working directory.
    fn base_dir(&self) -> Option<&Path> {
        None
    }

    fn exists(&self, path: &str) -> bool {
        match self.read(path) {
            Ok(_) => true,
            Err(e) => !e.is_not_found(),
        }
    }

    /// Read a file, mapping absence to `None`.
    fn read_optional(&self, path: &str) -> Result<Option<String>, ProjectError> {
        match self.read(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Paths matching a glob such as `src/**/*.clj`, sorted.
    fn files_matching(&self, pattern: &str) -> Result<Vec<String>, ProjectError> {
        let pattern = Pattern::new(pattern).map_err(|e| ProjectError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(self
            .files()?
            .into_iter()
            .filter(|f| pattern.matches(f))
            .collect())
    }

    /// True when any file ends with `.<extension>`.
    fn has_file_with_extension(&self, extension: &str) -> Result<bool, ProjectError> {
        let suffix = format!(".{}", extension.trim_start_matches('.'));
        Ok(self.files()?.iter().any(|f| f.ends_with(&suffix)))
    }
}

/// Reject absolute paths and traversal.
fn check_relative(path: &str) -> Result<(), ProjectError> {
    if path.is_empty()
        || path.starts_with('/')
        || path.split(['/', '\\']).any(|segment| segment == "..")
    {
        return Err(ProjectError::PathTraversal {
            path: path.to_string(),
        });
    }
    Ok(())
}

/// A project checked out into a directory on disk.
pub struct LocalProject {
    id: RepoId,
    base_dir: PathBuf,
}

impl LocalProject {
    pub fn new(id: RepoId, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            id,
            base_dir: base_dir.into(),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, ProjectError> {
        check_relative(path)?;
        Ok(self.base_dir.join(path))
    }

    /// Recursively walk a directory and collect relative file paths.
    /// `.git` is skipped; it is never part of a fingerprinted tree.
    fn walk_dir(&self, dir: &Path, files: &mut Vec<String>) -> Result<(), ProjectError> {
        let entries = fs::read_dir(dir).map_err(|source| ProjectError::IoError {
            path: dir.to_path_buf(),
            source,
        })?;

        for entry in entries {
            let entry = entry.map_err(|source| ProjectError::IoError {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();

            if path.is_dir() {
                if entry.file_name() == ".git" {
                    continue;
                }
                self.walk_dir(&path, files)?;
            } else if let Ok(rel) = path.strip_prefix(&self.base_dir) {
                let rel = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push(rel);
            }
        }
        Ok(())
    }
}

impl Project for LocalProject {
    fn id(&self) -> &RepoId {
        &self.id
    }

    fn read(&self, path: &str) -> Result<String, ProjectError> {
        let full = self.resolve(path)?;
        if !full.is_file() {
            return Err(ProjectError::NotFound {
                path: path.to_string(),
            });
        }
        fs::read_to_string(&full).map_err(|source| ProjectError::IoError { path: full, source })
    }

    fn write(&self, path: &str, content: &str) -> Result<(), ProjectError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|source| ProjectError::IoError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&full, content).map_err(|source| ProjectError::IoError { path: full, source })
    }

    fn delete(&self, path: &str) -> Result<bool, ProjectError> {
        let full = self.resolve(path)?;
        if !full.is_file() {
            return Ok(false);
        }
        fs::remove_file(&full).map_err(|source| ProjectError::IoError { path: full, source })?;
        Ok(true)
    }

    fn files(&self) -> Result<Vec<String>, ProjectError> {
        let mut files = Vec::new();
        if self.base_dir.is_dir() {
            self.walk_dir(&self.base_dir, &mut files)?;
        }
        files.sort();
        Ok(files)
    }

    fn base_dir(&self) -> Option<&Path> {
        Some(&self.base_dir)
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }
}

/// A project held entirely in memory.
pub struct InMemoryProject {
    id: RepoId,
    files: RwLock<BTreeMap<String, String>>,
}

impl InMemoryProject {
    pub fn new(id: RepoId) -> Self {
        Self {
            id,
            files: RwLock::new(BTreeMap::new()),
        }
    }

    /// Build from `(path, content)` pairs.
    pub fn of<I, P, C>(id: RepoId, files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        let map = files
            .into_iter()
            .map(|(p, c)| (p.into(), c.into()))
            .collect();
        Self {
            id,
            files: RwLock::new(map),
        }
    }

    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, String>> {
        self.files.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_map(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, String>> {
        self.files
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Project for InMemoryProject {
    fn id(&self) -> &RepoId {
        &self.id
    }

    fn read(&self, path: &str) -> Result<String, ProjectError> {
        check_relative(path)?;
        self.read_map()
            .get(path)
            .cloned()
            .ok_or_else(|| ProjectError::NotFound {
                path: path.to_string(),
            })
    }

    fn write(&self, path: &str, content: &str) -> Result<(), ProjectError> {
        check_relative(path)?;
        self.write_map()
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<bool, ProjectError> {
        check_relative(path)?;
        Ok(self.write_map().remove(path).is_some())
    }

    fn files(&self) -> Result<Vec<String>, ProjectError> {
        Ok(self.read_map().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn repo() -> RepoId {
        RepoId::parse("acme/widget")
    }

    #[test]
    fn in_memory_read_write_delete() {
        let p = InMemoryProject::of(repo(), [("project.clj", "(defproject x \"1.0\")")]);
        assert!(p.exists("project.clj"));
        assert!(!p.exists("missing.txt"));

        p.write("src/core.clj", "(ns core)").unwrap();
        assert_eq!(p.read("src/core.clj").unwrap(), "(ns core)");
        assert_eq!(p.files().unwrap(), vec!["project.clj", "src/core.clj"]);

        assert!(p.delete("src/core.clj").unwrap());
        assert!(!p.delete("src/core.clj").unwrap());
    }

    #[test]
    fn missing_file_is_not_found() {
        let p = InMemoryProject::new(repo());
        let err = p.read("nope").unwrap_err();
        assert!(err.is_not_found());
        assert!(p.read_optional("nope").unwrap().is_none());
    }

    #[test]
    fn traversal_is_rejected() {
        let p = InMemoryProject::new(repo());
        assert!(matches!(
            p.write("../escape", "x"),
            Err(ProjectError::PathTraversal { .. })
        ));
        assert!(matches!(
            p.read("/etc/passwd"),
            Err(ProjectError::PathTraversal { .. })
        ));
    }

    #[test]
    fn files_matching_glob() {
        let p = InMemoryProject::of(
            repo(),
            [
                ("src/a.clj", ""),
                ("src/nested/b.clj", ""),
                ("README.md", ""),
            ],
        );
        let clj = p.files_matching("src/**/*.clj").unwrap();
        assert_eq!(clj, vec!["src/a.clj", "src/nested/b.clj"]);
        assert!(p.has_file_with_extension("clj").unwrap());
        assert!(p.has_file_with_extension(".md").unwrap());
        assert!(!p.has_file_with_extension("java").unwrap());
    }

    #[test]
    fn local_project_walks_and_skips_git() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        let p = LocalProject::new(repo(), dir.path());

        p.write("src/core.clj", "(ns core)").unwrap();
        p.write("project.clj", "(defproject)").unwrap();

        assert_eq!(p.files().unwrap(), vec!["project.clj", "src/core.clj"]);
        assert_eq!(p.read("src/core.clj").unwrap(), "(ns core)");
        assert!(p.exists("project.clj"));
        assert!(p.read("missing").unwrap_err().is_not_found());
        assert_eq!(p.base_dir(), Some(dir.path()));
    }
}
