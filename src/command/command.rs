// src/command/command.rs

use std::collections::BTreeMap;
use std::fmt;

use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::command::resource::ResourceMap;
use crate::command::version::Version;

/// Opaque 40-hex-character command identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(String);

impl CommandId {
    /// Fresh id: blake3 of four random words from the OS, cut to 160 bits.
    pub fn generate() -> Self {
        let mut hasher = blake3::Hasher::new();
        for _ in 0..4 {
            hasher.update(&OsRng.next_u32().to_le_bytes());
        }
        let hex = hasher.finalize().to_hex();
        CommandId(hex.as_str()[..40].to_string())
    }

    pub fn is_assigned(&self) -> bool {
        !self.0.is_empty()
    }

    fn is_unassigned(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CommandId {
    fn from(s: &str) -> Self {
        CommandId(s.to_string())
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Back-reference from a command to the task that emitted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOwner {
    pub project: String,
    pub instance_path: String,
    pub task_seq: u64,
    pub task_priority: i32,
}

/// The worker a running command was handed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerLocation {
    pub worker_id: String,
    pub server_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Command {
    #[serde(default, skip_serializing_if = "CommandId::is_unassigned")]
    pub id: CommandId,
    /// Working directory, relative to the project base.
    #[serde(default)]
    pub dir: String,
    pub executable: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub output_files: Vec<String>,
    #[serde(default)]
    pub priority_modifier: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_version: Option<Version>,
    #[serde(default)]
    pub min_required: ResourceMap,
    #[serde(default)]
    pub max_allowed: ResourceMap,
    #[serde(default)]
    pub reserved: ResourceMap,
    #[serde(skip)]
    pub owner: Option<CommandOwner>,
    #[serde(skip)]
    pub running: bool,
    #[serde(skip)]
    pub worker: Option<WorkerLocation>,
    #[serde(default)]
    pub cpu_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i32>,
}

impl Command {
    pub fn new(executable: impl Into<String>) -> Self {
        Command {
            id: CommandId::default(),
            dir: String::new(),
            executable: executable.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            output_files: Vec::new(),
            priority_modifier: 0,
            min_version: None,
            max_version: None,
            min_required: ResourceMap::new(),
            max_allowed: ResourceMap::new(),
            reserved: ResourceMap::new(),
            owner: None,
            running: false,
            worker: None,
            cpu_time: 0.0,
            return_code: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority_modifier(mut self, modifier: i32) -> Self {
        self.priority_modifier = modifier;
        self
    }

    pub fn with_min_required(mut self, name: &str, amount: i64) -> Self {
        self.min_required.set(name, amount);
        self
    }

    pub fn with_max_allowed(mut self, name: &str, amount: i64) -> Self {
        self.max_allowed.set(name, amount);
        self
    }

    pub fn with_versions(mut self, min: Option<Version>, max: Option<Version>) -> Self {
        self.min_version = min;
        self.max_version = max;
        self
    }

    pub fn with_owner(mut self, owner: CommandOwner) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Task priority plus this command's modifier.
    pub fn full_priority(&self) -> i32 {
        self.owner.as_ref().map_or(0, |o| o.task_priority) + self.priority_modifier
    }

    /// Called on partial completion so the command outranks fresh ones of
    /// the same task.
    pub fn increase_priority(&mut self) {
        self.priority_modifier += 1;
    }

    pub fn project(&self) -> Option<&str> {
        self.owner.as_ref().map(|o| o.project.as_str())
    }

    /// Whether `version` satisfies this command's plugin version bounds.
    pub fn accepts_version(&self, version: &Version) -> bool {
        self.min_version.as_ref().is_none_or(|min| version >= min)
            && self.max_version.as_ref().is_none_or(|max| version <= max)
    }
}
