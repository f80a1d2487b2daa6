//! Project registry: one [`Repository`] per project over a shared object
//! store.

use crate::api::ApiError;
use crate::config::StorageBackend;
use eng_storage::ObjectStore;
use eng_types::{ProjectId, UserId};
use eng_vcs::{MergeStrategy, Repository, RepositoryOptions};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Registry of initialized projects.
#[derive(Debug)]
pub struct ProjectRegistry {
    store: ObjectStore,
    refs_dir: Option<PathBuf>,
    merge_strategy: MergeStrategy,
    projects: RwLock<HashMap<ProjectId, Arc<Repository>>>,
}

impl ProjectRegistry {
    /// Creates an in-memory registry.
    pub fn in_memory(merge_strategy: MergeStrategy) -> Self {
        Self {
            store: ObjectStore::in_memory(),
            refs_dir: None,
            merge_strategy,
            projects: RwLock::new(HashMap::new()),
        }
    }

    /// Opens a registry persisted under `data_dir`, loading every project
    /// saved there.
    ///
    /// Objects live in `data_dir/objects`; each project's branches and tags
    /// in `data_dir/projects/<id>.json`.
    pub fn open(data_dir: &Path, merge_strategy: MergeStrategy) -> Result<Self, ApiError> {
        let store = ObjectStore::open(data_dir.join("objects"))?;
        let refs_dir = data_dir.join("projects");
        std::fs::create_dir_all(&refs_dir).map_err(|e| ApiError::Internal(e.to_string()))?;

        let registry = Self {
            store,
            refs_dir: Some(refs_dir.clone()),
            merge_strategy,
            projects: RwLock::new(HashMap::new()),
        };

        let entries = std::fs::read_dir(&refs_dir).map_err(|e| ApiError::Internal(e.to_string()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(project) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| ProjectId::parse(s).ok())
            else {
                warn!(path = %path.display(), "Skipping unrecognized project file");
                continue;
            };
            let repo = Repository::load(project.clone(), registry.store.clone(), registry.options(&project))?;
            registry.projects.write().insert(project, Arc::new(repo));
        }

        info!(
            data_dir = %data_dir.display(),
            projects = registry.projects.read().len(),
            "Project registry opened"
        );
        Ok(registry)
    }

    /// Opens the registry for the configured backend.
    pub fn for_backend(
        backend: StorageBackend,
        data_dir: &Path,
        merge_strategy: MergeStrategy,
    ) -> Result<Self, ApiError> {
        match backend {
            StorageBackend::Memory => Ok(Self::in_memory(merge_strategy)),
            StorageBackend::Filesystem => Self::open(data_dir, merge_strategy),
        }
    }

    fn options(&self, project: &ProjectId) -> RepositoryOptions {
        RepositoryOptions {
            merge_strategy: self.merge_strategy,
            snapshot_path: self
                .refs_dir
                .as_ref()
                .map(|dir| dir.join(format!("{}.json", project))),
        }
    }

    /// Initializes a project with a `main` branch.
    pub fn create(&self, project: ProjectId, author: UserId) -> Result<Arc<Repository>, ApiError> {
        let mut projects = self.projects.write();
        if projects.contains_key(&project) {
            return Err(ApiError::ProjectExists(project.to_string()));
        }

        let repo = Arc::new(Repository::init(
            project.clone(),
            self.store.clone(),
            self.options(&project),
            author,
        )?);
        projects.insert(project, repo.clone());
        Ok(repo)
    }

    /// Gets a project's repository.
    pub fn get(&self, project: &ProjectId) -> Result<Arc<Repository>, ApiError> {
        self.projects
            .read()
            .get(project)
            .cloned()
            .ok_or_else(|| ApiError::ProjectNotFound(project.to_string()))
    }

    /// Every loaded repository.
    pub fn all(&self) -> Vec<Arc<Repository>> {
        self.projects.read().values().cloned().collect()
    }

    /// Lists project ids.
    pub fn list(&self) -> Vec<ProjectId> {
        let mut ids: Vec<ProjectId> = self.projects.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The shared object store.
    pub fn store(&self) -> &ObjectStore {
        &self.store
    }
}
