// src/project/list.rs

//! All projects served by this process, keyed by name. Each project lives
//! in `<projects_dir>/<name>`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{error, info, warn};

use crate::dataflow::item_path::is_valid_name;
use crate::errors::{CpcError, Result};
use crate::persistence;
use crate::project::project::{Project, ProjectContext};

#[derive(Debug)]
pub struct ProjectList {
    dir: PathBuf,
    ctx: ProjectContext,
    projects: RwLock<BTreeMap<String, Arc<Project>>>,
}

impl ProjectList {
    pub fn new(dir: impl Into<PathBuf>, ctx: ProjectContext) -> Self {
        Self {
            dir: dir.into(),
            ctx,
            projects: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create an empty project and its base directory.
    pub fn add(&self, name: &str) -> Result<Arc<Project>> {
        if !is_valid_name(name) {
            return Err(CpcError::domain(format!("invalid project name '{name}'")));
        }
        let mut projects = self.projects.write().unwrap_or_else(PoisonError::into_inner);
        if projects.contains_key(name) {
            return Err(CpcError::ProjectExists(name.to_string()));
        }
        let base = self.dir.join(name);
        self.ctx.fs.create_dir_all(&base)?;
        let project = Project::new(name, base, self.ctx.clone());
        projects.insert(name.to_string(), Arc::clone(&project));
        info!(project = %name, "project created");
        Ok(project)
    }

    pub fn get(&self, name: &str) -> Result<Arc<Project>> {
        self.projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| CpcError::ProjectNotFound(name.to_string()))
    }

    /// Forget a project and drop its commands. Its directory stays on disk.
    pub fn delete(&self, name: &str) -> Result<()> {
        let project = self
            .projects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .ok_or_else(|| CpcError::ProjectNotFound(name.to_string()))?;
        let purged = project.purge_commands();
        info!(project = %name, purged, "project deleted");
        Ok(())
    }

    pub fn list(&self) -> Vec<String> {
        self.projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<Project>> {
        self.projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.projects.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load every project directory holding a state file. A project that
    /// fails to load is logged and left out; the others still come up.
    pub fn load_all(&self) -> Result<usize> {
        let fs = &self.ctx.fs;
        if !fs.is_dir(&self.dir) {
            fs.create_dir_all(&self.dir)?;
            return Ok(0);
        }
        let mut loaded = 0;
        for dir in fs.read_dir(&self.dir)? {
            if !fs.is_dir(&dir) || !fs.is_file(&persistence::store::state_path(&dir)) {
                continue;
            }
            match persistence::load(&dir, self.ctx.clone()) {
                Ok(project) => {
                    let name = project.name().to_string();
                    let mut projects = self.projects.write().unwrap_or_else(PoisonError::into_inner);
                    if projects.contains_key(&name) {
                        warn!(project = %name, dir = %dir.display(), "duplicate project name; skipped");
                        project.purge_commands();
                        continue;
                    }
                    projects.insert(name, project);
                    loaded += 1;
                }
                Err(e) => error!(dir = %dir.display(), error = %e, "project failed to load"),
            }
        }
        Ok(loaded)
    }

    /// Save every project; returns how many failed.
    pub fn save_all(&self) -> usize {
        let mut failed = 0;
        for project in self.all() {
            if let Err(e) = project.save() {
                error!(project = %project.name(), error = %e, "saving project failed");
                failed += 1;
            }
        }
        failed
    }
}
