// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::LostCommandPolicy;

/// Server configuration as read from a TOML file.
///
/// ```toml
/// [server]
/// server_name = "cpc1.example.org"
/// projects_dir = "/var/lib/cpc/projects"
/// exec_threads = 4
///
/// [heartbeat]
/// heartbeat_time_secs = 120
/// timeout_factor = 2
/// lost_command_policy = "fail"
///
/// [dispatch]
/// wait_secs = 0
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawServerConfig {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub heartbeat: HeartbeatSection,

    #[serde(default)]
    pub dispatch: DispatchSection,
}

/// `[server]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    /// Name this server reports to workers and records on commands.
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Directory holding one sub-directory per project.
    #[serde(default = "default_projects_dir")]
    pub projects_dir: PathBuf,

    /// Number of task executors. `0` means one per available CPU.
    #[serde(default)]
    pub exec_threads: usize,

    /// Save all projects every N seconds. `0` saves only on shutdown.
    #[serde(default)]
    pub save_interval_secs: u64,
}

fn default_server_name() -> String {
    "localhost".to_string()
}

fn default_projects_dir() -> PathBuf {
    PathBuf::from("projects")
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            projects_dir: default_projects_dir(),
            exec_threads: 0,
            save_interval_secs: 0,
        }
    }
}

/// `[heartbeat]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatSection {
    /// Interval workers are asked to send heartbeats at.
    #[serde(default = "default_heartbeat_time_secs")]
    pub heartbeat_time_secs: u64,

    /// A command is lost after `timeout_factor * heartbeat_time` of silence.
    #[serde(default = "default_timeout_factor")]
    pub timeout_factor: u32,

    /// Lower bound on the sweeper's sleep between checks.
    #[serde(default = "default_min_sweep_interval_secs")]
    pub min_sweep_interval_secs: u64,

    #[serde(default)]
    pub lost_command_policy: LostCommandPolicy,
}

fn default_heartbeat_time_secs() -> u64 {
    120
}

fn default_timeout_factor() -> u32 {
    2
}

fn default_min_sweep_interval_secs() -> u64 {
    5
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            heartbeat_time_secs: default_heartbeat_time_secs(),
            timeout_factor: default_timeout_factor(),
            min_sweep_interval_secs: default_min_sweep_interval_secs(),
            lost_command_policy: LostCommandPolicy::default(),
        }
    }
}

/// `[dispatch]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchSection {
    /// How long a worker request may wait for work when the queue is empty.
    #[serde(default)]
    pub wait_secs: u64,
}

/// Validated server configuration.
///
/// Only constructed through `TryFrom<RawServerConfig>`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub heartbeat: HeartbeatSection,
    pub dispatch: DispatchSection,
}

impl ServerConfig {
    pub(crate) fn new_unchecked(raw: RawServerConfig) -> Self {
        Self {
            server: raw.server,
            heartbeat: raw.heartbeat,
            dispatch: raw.dispatch,
        }
    }

    pub fn heartbeat_time(&self) -> Duration {
        Duration::from_secs(self.heartbeat.heartbeat_time_secs)
    }

    /// Silence after which a running command is declared lost.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_time() * self.heartbeat.timeout_factor
    }

    pub fn min_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat.min_sweep_interval_secs)
    }

    /// Sweeper period: half the heartbeat time, no shorter than the
    /// configured minimum and never longer than the heartbeat time.
    pub fn sweep_interval(&self) -> Duration {
        (self.heartbeat_time() / 2)
            .max(self.min_sweep_interval())
            .min(self.heartbeat_time())
    }

    pub fn dispatch_wait(&self) -> Duration {
        Duration::from_secs(self.dispatch.wait_secs)
    }

    /// Effective executor count, resolving `0` to the CPU count.
    pub fn exec_threads(&self) -> usize {
        if self.server.exec_threads > 0 {
            return self.server.exec_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new_unchecked(RawServerConfig::default())
    }
}
