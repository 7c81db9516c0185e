// src/persistence/doc.rs

//! Serialized form of a project (`_state.json`).
//!
//! Documents refuse unknown fields and newer versions, so a file written by
//! a later server fails to load instead of loading half.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandId};
use crate::dataflow::instance::InstanceState;
use crate::dataflow::network::Connection;
use crate::dataflow::run::FunctionRunInput;
use crate::dataflow::transaction::Op;

pub const STATE_VERSION: u32 = 1;
pub const STATE_FILE: &str = "_state.json";

fn is_zero(n: &u64) -> bool {
    *n == 0
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ProjectDoc {
    pub version: u32,
    pub name: String,
    #[serde(default)]
    pub imports: Vec<String>,
    /// Last sequence number handed out.
    pub seq: u64,
    #[serde(default)]
    pub input_counter: u32,
    /// Explicit connections of the top-level network.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<Connection>,
    /// Instances in creation order; parents come before children.
    #[serde(default)]
    pub instances: Vec<InstanceDoc>,
    /// Queued and running commands; all are queued again on load.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<CommandDoc>,
    /// Operations of transactions that were open when saved.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transactions: Vec<Vec<Op>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct InstanceDoc {
    pub path: String,
    pub function: String,
    /// Created by its parent's network body rather than explicitly.
    #[serde(default, skip_serializing_if = "is_false")]
    pub implicit: bool,
    pub state: InstanceState,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub seq_nr: u64,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default)]
    pub cpu_time: f64,
    #[serde(default)]
    pub tasks_started: u64,
    #[serde(default)]
    pub run_counter: u32,
    #[serde(default, skip_serializing_if = "is_false")]
    pub rerun_requested: bool,
    pub inputs: ValueDoc,
    pub outputs: ValueDoc,
    pub sub_inputs: ValueDoc,
    pub sub_outputs: ValueDoc,
    /// Explicit connections of this instance's subnet.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<Connection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PendingDoc {
    pub seq_nr: u64,
    pub priority: i32,
    pub input: FunctionRunInput,
    #[serde(default)]
    pub commands: Vec<CommandId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finished: Vec<CommandDoc>,
    pub in_flight: bool,
    pub run_dir: String,
}

/// A command with the task it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CommandDoc {
    pub instance_path: String,
    pub task_seq: u64,
    pub task_priority: i32,
    pub command: Command,
}

/// One node of a value tree with its sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValueDoc {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub seq: u64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub updated: bool,
    pub data: DataDoc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataDoc {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    File(String),
    Record(BTreeMap<String, ValueDoc>),
    Array(Vec<ValueDoc>),
    Dict(BTreeMap<String, ValueDoc>),
}
