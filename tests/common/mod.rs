#![allow(dead_code)]

use std::sync::Arc;

use copernicus::config::ServerConfig;
use copernicus::fs::mock::MockFileSystem;
use copernicus::project::Project;
use copernicus::server::ServerState;
use copernicus_test_utils::builders::ServerConfigBuilder;
use copernicus_test_utils::fake_executor::FakeExecutor;
use copernicus_test_utils::library;

pub use copernicus_test_utils::init_tracing;

/// A server over an in-memory filesystem with one project `p` that imports
/// `builtin` and the test library. Tasks only run when `exec.drain()` is
/// awaited.
pub struct Harness {
    pub fs: MockFileSystem,
    pub state: Arc<ServerState>,
    pub project: Arc<Project>,
    pub exec: FakeExecutor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ServerConfigBuilder::new().projects_dir("/projects").build())
    }

    pub fn with_config(cfg: ServerConfig) -> Self {
        init_tracing();
        let fs = MockFileSystem::new();
        let state = ServerState::with_registry(cfg, library::registry(), Arc::new(fs.clone()));
        let project = state.projects().add("p").expect("create project");
        project.import("builtin").expect("import builtin");
        project.import(library::LIBRARY).expect("import test library");
        let exec = FakeExecutor::new(state.tasks().clone());
        Self {
            fs,
            state,
            project,
            exec,
        }
    }

    /// Add and activate instances of `function`.
    pub fn instances(&self, names: &[&str], function: &str) {
        for name in names {
            self.project.add_instance(name, function).expect("add instance");
            self.project.activate(name).expect("activate instance");
        }
    }
}
