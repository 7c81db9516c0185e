#![allow(dead_code)]

use std::path::Path;

use copernicus::command::resource::CORES;
use copernicus::command::{Command, CommandOwner, Platform, Version, WorkerRequest};
use copernicus::config::{RawServerConfig, ServerConfig};
use copernicus::heartbeat::{Heartbeat, HeartbeatItem};
use copernicus::types::LostCommandPolicy;

/// Builder for `ServerConfig` to simplify test setup.
pub struct ServerConfigBuilder {
    config: RawServerConfig,
}

impl ServerConfigBuilder {
    pub fn new() -> Self {
        let mut config = RawServerConfig::default();
        config.server.exec_threads = 1;
        Self { config }
    }

    pub fn projects_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.server.projects_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn server_name(mut self, name: &str) -> Self {
        self.config.server.server_name = name.to_string();
        self
    }

    pub fn exec_threads(mut self, n: usize) -> Self {
        self.config.server.exec_threads = n;
        self
    }

    pub fn heartbeat_time_secs(mut self, secs: u64) -> Self {
        self.config.heartbeat.heartbeat_time_secs = secs;
        self
    }

    pub fn timeout_factor(mut self, k: u32) -> Self {
        self.config.heartbeat.timeout_factor = k;
        self
    }

    pub fn min_sweep_interval_secs(mut self, secs: u64) -> Self {
        self.config.heartbeat.min_sweep_interval_secs = secs;
        self
    }

    pub fn lost_command_policy(mut self, policy: LostCommandPolicy) -> Self {
        self.config.heartbeat.lost_command_policy = policy;
        self
    }

    pub fn dispatch_wait_secs(mut self, secs: u64) -> Self {
        self.config.dispatch.wait_secs = secs;
        self
    }

    pub fn build(self) -> ServerConfig {
        ServerConfig::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `Command`, owned by an instance of project `p` unless told
/// otherwise.
pub struct CommandBuilder {
    cmd: Command,
    owner: CommandOwner,
}

impl CommandBuilder {
    pub fn new(executable: &str) -> Self {
        Self {
            cmd: Command::new(executable).with_min_required(CORES, 1),
            owner: CommandOwner {
                project: "p".to_string(),
                instance_path: "a".to_string(),
                task_seq: 1,
                task_priority: 0,
            },
        }
    }

    pub fn cores(mut self, n: i64) -> Self {
        self.cmd = self.cmd.with_min_required(CORES, n);
        self
    }

    pub fn max_cores(mut self, n: i64) -> Self {
        self.cmd = self.cmd.with_max_allowed(CORES, n);
        self
    }

    pub fn priority(mut self, p: i32) -> Self {
        self.owner.task_priority = p;
        self
    }

    pub fn modifier(mut self, m: i32) -> Self {
        self.cmd = self.cmd.with_priority_modifier(m);
        self
    }

    pub fn project(mut self, name: &str) -> Self {
        self.owner.project = name.to_string();
        self
    }

    pub fn instance(mut self, path: &str) -> Self {
        self.owner.instance_path = path.to_string();
        self
    }

    pub fn build(self) -> Command {
        self.cmd.with_owner(self.owner)
    }
}

/// Builder for a worker's `WorkerRequest`.
pub struct WorkerBuilder {
    req: WorkerRequest,
}

impl WorkerBuilder {
    pub fn new(worker_id: &str) -> Self {
        Self {
            req: WorkerRequest {
                worker_id: worker_id.to_string(),
                server_name: "localhost".to_string(),
                platform: Platform::new("smp").with_resource(CORES, 1),
            },
        }
    }

    pub fn cores(mut self, n: i64) -> Self {
        self.req.platform = self.req.platform.with_resource(CORES, n);
        self
    }

    pub fn executable(mut self, name: &str, version: &str) -> Self {
        let version: Version = version.parse().expect("valid version in test");
        self.req.platform = self.req.platform.with_executable(name, version);
        self
    }

    pub fn build(self) -> WorkerRequest {
        self.req
    }
}

/// A heartbeat from `worker` for the given commands.
pub fn heartbeat(worker: &str, cmds: &[&Command]) -> Heartbeat {
    Heartbeat {
        worker_id: worker.to_string(),
        server_name: "localhost".to_string(),
        items: cmds
            .iter()
            .map(|c| HeartbeatItem {
                cmd_id: c.id.clone(),
                run_dir: None,
            })
            .collect(),
        shutdown: false,
        interval_secs: None,
    }
}
