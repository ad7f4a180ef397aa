// store.rs — Persistence for target baselines and previous-push snapshots.
//
// The pipeline itself never persists fingerprints; goals load targets and
// the previous snapshot from a store before diffing and write the new
// snapshot afterwards. Two stores of the same type (different directories)
// hold targets and previous snapshots respectively.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use sdm_core::RepoId;

use crate::error::StoreError;
use crate::fingerprint::Fingerprint;

/// Fingerprints keyed by repository, then by fingerprint name.
pub trait FingerprintStore: Send + Sync {
    fn get(&self, repo: &RepoId, name: &str) -> Result<Option<Fingerprint>, StoreError>;

    /// All fingerprints for a repository, sorted by name.
    fn list(&self, repo: &RepoId) -> Result<Vec<Fingerprint>, StoreError>;

    /// Insert or replace one fingerprint.
    fn put(&self, repo: &RepoId, fingerprint: Fingerprint) -> Result<(), StoreError>;

    /// Delete one fingerprint. Returns whether it existed.
    fn remove(&self, repo: &RepoId, name: &str) -> Result<bool, StoreError>;

    /// Replace the repository's whole set.
    fn replace_all(&self, repo: &RepoId, fingerprints: &[Fingerprint]) -> Result<(), StoreError>;
}

type FingerprintMap = BTreeMap<String, Fingerprint>;

fn to_map(fingerprints: &[Fingerprint]) -> FingerprintMap {
    fingerprints
        .iter()
        .map(|fp| (fp.name.clone(), fp.clone()))
        .collect()
}

/// One pretty-printed JSON file per repository: `<dir>/<owner>__<name>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileFingerprintStore {
    dir: PathBuf,
}

impl JsonFileFingerprintStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, repo: &RepoId) -> PathBuf {
        self.dir.join(format!("{}.json", repo.key()))
    }

    fn load(&self, repo: &RepoId) -> Result<FingerprintMap, StoreError> {
        let path = self.path_for(repo);
        if !path.exists() {
            return Ok(FingerprintMap::new());
        }
        let data = fs::read_to_string(&path).map_err(|source| StoreError::IoError {
            path: path.clone(),
            source,
        })?;
        let map: FingerprintMap = serde_json::from_str(&data)?;
        for fp in map.values().filter(|fp| !fp.verify()) {
            tracing::warn!(
                repo = %repo,
                fingerprint = %fp.name,
                path = %path.display(),
                "stored fingerprint sha does not match its data"
            );
        }
        Ok(map)
    }

    fn save(&self, repo: &RepoId, map: &FingerprintMap) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::IoError {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(repo);
        let json = serde_json::to_string_pretty(map)?;
        fs::write(&path, json).map_err(|source| StoreError::IoError { path, source })?;
        Ok(())
    }
}

impl FingerprintStore for JsonFileFingerprintStore {
    fn get(&self, repo: &RepoId, name: &str) -> Result<Option<Fingerprint>, StoreError> {
        Ok(self.load(repo)?.remove(name))
    }

    fn list(&self, repo: &RepoId) -> Result<Vec<Fingerprint>, StoreError> {
        Ok(self.load(repo)?.into_values().collect())
    }

    fn put(&self, repo: &RepoId, fingerprint: Fingerprint) -> Result<(), StoreError> {
        let mut map = self.load(repo)?;
        map.insert(fingerprint.name.clone(), fingerprint);
        self.save(repo, &map)
    }

    fn remove(&self, repo: &RepoId, name: &str) -> Result<bool, StoreError> {
        let mut map = self.load(repo)?;
        let existed = map.remove(name).is_some();
        if existed {
            self.save(repo, &map)?;
        }
        Ok(existed)
    }

    fn replace_all(&self, repo: &RepoId, fingerprints: &[Fingerprint]) -> Result<(), StoreError> {
        self.save(repo, &to_map(fingerprints))
    }
}

/// In-process store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryFingerprintStore {
    repos: RwLock<BTreeMap<RepoId, FingerprintMap>>,
}

impl MemoryFingerprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with one repository's fingerprints.
    pub fn with(self, repo: &RepoId, fingerprints: &[Fingerprint]) -> Self {
        self.write().insert(repo.clone(), to_map(fingerprints));
        self
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<RepoId, FingerprintMap>> {
        self.repos.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<RepoId, FingerprintMap>> {
        self.repos
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FingerprintStore for MemoryFingerprintStore {
    fn get(&self, repo: &RepoId, name: &str) -> Result<Option<Fingerprint>, StoreError> {
        Ok(self.read().get(repo).and_then(|m| m.get(name)).cloned())
    }

    fn list(&self, repo: &RepoId) -> Result<Vec<Fingerprint>, StoreError> {
        Ok(self
            .read()
            .get(repo)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    fn put(&self, repo: &RepoId, fingerprint: Fingerprint) -> Result<(), StoreError> {
        self.write()
            .entry(repo.clone())
            .or_default()
            .insert(fingerprint.name.clone(), fingerprint);
        Ok(())
    }

    fn remove(&self, repo: &RepoId, name: &str) -> Result<bool, StoreError> {
        Ok(self
            .write()
            .get_mut(repo)
            .map(|m| m.remove(name).is_some())
            .unwrap_or(false))
    }

    fn replace_all(&self, repo: &RepoId, fingerprints: &[Fingerprint]) -> Result<(), StoreError> {
        self.write().insert(repo.clone(), to_map(fingerprints));
        Ok(())
    }
}
