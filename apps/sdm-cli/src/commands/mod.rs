// mod.rs — Shared context for sdm subcommands.

pub mod evaluate;
pub mod fingerprint;
pub mod reports;
pub mod target;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sdm_core::{LocalProject, Project, RepoId};
use sdm_delivery::{DeliveryConfig, DeliveryMachine, DEFAULT_CONFIG_PATH};

/// Everything a subcommand needs to know about where it is working.
pub struct Context {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub repo: RepoId,
    pub config: DeliveryConfig,
}

impl Context {
    pub fn resolve(
        project_root: PathBuf,
        config: Option<&Path>,
        state_dir: Option<&Path>,
        repo: Option<&str>,
    ) -> anyhow::Result<Self> {
        let config_path = match config {
            Some(path) => path.to_path_buf(),
            None => project_root.join(DEFAULT_CONFIG_PATH),
        };
        let config = DeliveryConfig::load_or_default(&config_path)?;
        let repo = match repo {
            Some(slug) => RepoId::parse(slug),
            None => default_repo(&project_root),
        };
        let state_dir = state_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| project_root.clone());

        tracing::debug!(
            repo = %repo,
            root = %project_root.display(),
            state = %state_dir.display(),
            config = %config_path.display(),
            "resolved context"
        );
        Ok(Self {
            project_root,
            state_dir,
            repo,
            config,
        })
    }

    pub fn project(&self) -> Arc<dyn Project> {
        Arc::new(LocalProject::new(self.repo.clone(), &self.project_root))
    }

    pub fn machine(&self) -> anyhow::Result<DeliveryMachine> {
        Ok(DeliveryMachine::builder(self.config.clone(), &self.state_dir).build()?)
    }
}

/// `local/<directory name>` for a checkout without an explicit slug.
fn default_repo(project_root: &Path) -> RepoId {
    let name = project_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());
    RepoId::new("local", name)
}
