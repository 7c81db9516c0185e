// src/server/state.rs

//! Process-wide server state handed to every request handler.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::command::{CmdQueue, Command, RunningCmdList};
use crate::config::ServerConfig;
use crate::dataflow::function::FunctionRegistry;
use crate::dataflow::task::TaskQueue;
use crate::errors::Result;
use crate::fs::FileSystem;
use crate::heartbeat::{HeartbeatTracker, LostCommand, LostCommandHandler};
use crate::project::{ProjectContext, ProjectList};

#[derive(Debug)]
pub struct ServerState {
    config: ServerConfig,
    ctx: ProjectContext,
    projects: ProjectList,
}

impl ServerState {
    /// State with the built-in library registered.
    pub fn new(config: ServerConfig, fs: Arc<dyn FileSystem>) -> Arc<Self> {
        Self::with_registry(config, Arc::new(FunctionRegistry::with_builtins()), fs)
    }

    pub fn with_registry(
        config: ServerConfig,
        registry: Arc<FunctionRegistry>,
        fs: Arc<dyn FileSystem>,
    ) -> Arc<Self> {
        let ctx = ProjectContext::new(registry, fs);
        let projects = ProjectList::new(config.server.projects_dir.clone(), ctx.clone());
        Arc::new(Self {
            config,
            ctx,
            projects,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn server_name(&self) -> &str {
        &self.config.server.server_name
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.ctx.registry
    }

    pub fn context(&self) -> &ProjectContext {
        &self.ctx
    }

    pub fn projects(&self) -> &ProjectList {
        &self.projects
    }

    pub fn queue(&self) -> &Arc<CmdQueue> {
        &self.ctx.queue
    }

    pub fn running(&self) -> &Arc<RunningCmdList> {
        &self.ctx.running
    }

    pub fn tracker(&self) -> &Arc<HeartbeatTracker> {
        &self.ctx.tracker
    }

    pub fn tasks(&self) -> &TaskQueue {
        &self.ctx.tasks
    }

    /// Load every project under the configured projects directory.
    pub fn load_projects(&self) -> Result<usize> {
        let n = self.projects.load_all()?;
        info!(projects = n, dir = %self.projects.dir().display(), "projects loaded");
        Ok(n)
    }

    /// Copy whatever the worker left in `run_dir` into the command's
    /// working directory. Returns the number of files copied.
    fn salvage(&self, cmd: &Command, run_dir: &str) -> usize {
        let fs = &self.ctx.fs;
        let src = Path::new(run_dir);
        if !fs.is_dir(src) {
            return 0;
        }
        let Some(project) = cmd.project().and_then(|p| self.projects.get(p).ok()) else {
            return 0;
        };
        let dest = project.base_dir().join(&cmd.dir);
        let Ok(entries) = fs.read_dir(src) else {
            return 0;
        };
        let mut copied = 0;
        for file in entries.iter().filter(|p| fs.is_file(p)) {
            let Some(name) = file.file_name() else {
                continue;
            };
            match fs.copy(file, &dest.join(name)) {
                Ok(()) => copied += 1,
                Err(e) => warn!(cmd_id = %cmd.id, file = %file.display(), error = %e, "could not salvage file"),
            }
        }
        copied
    }
}

impl LostCommandHandler for ServerState {
    fn command_lost(&self, lost: LostCommand) {
        let Ok(cmd) = self.ctx.running.remove(&lost.cmd_id) else {
            debug!(cmd_id = %lost.cmd_id, "lost command already gone");
            return;
        };
        if let Some(run_dir) = &lost.run_dir {
            let copied = self.salvage(&cmd, run_dir);
            if copied > 0 {
                info!(cmd_id = %cmd.id, files = copied, "salvaged partial output");
            }
        }
        let Some(project) = cmd.project().and_then(|p| self.projects.get(p).ok()) else {
            warn!(cmd_id = %cmd.id, "lost command has no project");
            return;
        };
        let reason = format!(
            "no heartbeat from worker {} for {}s",
            lost.worker_id,
            lost.silent_for.as_secs()
        );
        warn!(project = %project.name(), cmd_id = %cmd.id, worker = %lost.worker_id, "{reason}");
        project.command_lost(cmd, &reason, self.config.heartbeat.lost_command_policy);
    }
}
