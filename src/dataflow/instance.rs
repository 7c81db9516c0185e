// src/dataflow/instance.rs

//! Runtime state of one function instance.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandId};
use crate::dataflow::file_list::FileHandle;
use crate::dataflow::function::Function;
use crate::dataflow::item_path::IoSlot;
use crate::dataflow::network::Network;
use crate::dataflow::run::FunctionRunInput;
use crate::dataflow::value::Value;

/// Index of an instance in its project's instance arena. Id 0 is the
/// project's top-level network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub usize);

impl InstanceId {
    pub const ROOT: InstanceId = InstanceId(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Held,
    Active,
    Blocked,
    Running,
    Error,
    Warning,
}

impl InstanceState {
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceState::Held => "held",
            InstanceState::Active => "active",
            InstanceState::Blocked => "blocked",
            InstanceState::Running => "running",
            InstanceState::Error => "error",
            InstanceState::Warning => "warning",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The one task an instance may have in flight.
#[derive(Debug)]
pub struct PendingTask {
    pub seq_nr: u64,
    pub priority: i32,
    pub input: FunctionRunInput,
    /// Files referenced by the input snapshot, kept alive for the run.
    pub pins: Vec<FileHandle>,
    /// Commands emitted by this task that have not finished yet.
    pub commands: Vec<CommandId>,
    /// Finished commands waiting for the controller to see them.
    pub finished: VecDeque<Command>,
    /// A controller run for this task is queued or executing.
    pub in_flight: bool,
    /// Output directory of this task, relative to the project base.
    pub run_dir: String,
}

#[derive(Debug)]
pub struct ActiveInstance {
    pub id: InstanceId,
    pub name: String,
    /// Canonical path: instance names from the top joined by `:`.
    pub path: String,
    pub parent: Option<InstanceId>,
    pub function: Arc<Function>,
    pub state: InstanceState,
    pub seq_nr: u64,
    pub priority: i32,
    pub inputs: Value,
    pub outputs: Value,
    pub sub_inputs: Value,
    pub sub_outputs: Value,
    pub subnet: Network,
    pub error: Option<String>,
    pub warning: Option<String>,
    pub cpu_time: f64,
    pub pending: Option<PendingTask>,
    pub tasks_started: u64,
    pub run_counter: u32,
    /// Run again even without new input, or input arrived while a task
    /// was in flight.
    pub rerun_requested: bool,
}

impl ActiveInstance {
    pub fn new(
        id: InstanceId,
        name: &str,
        parent: Option<(InstanceId, &str)>,
        function: Arc<Function>,
    ) -> Self {
        let path = match parent {
            Some((_, parent_path)) if !parent_path.is_empty() => format!("{parent_path}:{name}"),
            _ => name.to_string(),
        };
        Self {
            id,
            name: name.to_string(),
            path,
            parent: parent.map(|(p, _)| p),
            inputs: Value::new(Arc::clone(function.inputs())),
            outputs: Value::new(Arc::clone(function.outputs())),
            sub_inputs: Value::new(Arc::clone(function.sub_inputs())),
            sub_outputs: Value::new(Arc::clone(function.sub_outputs())),
            function,
            state: InstanceState::Held,
            seq_nr: 0,
            priority: 0,
            subnet: Network::default(),
            error: None,
            warning: None,
            cpu_time: 0.0,
            pending: None,
            tasks_started: 0,
            run_counter: 0,
            rerun_requested: false,
        }
    }

    pub fn value(&self, slot: IoSlot) -> &Value {
        match slot {
            IoSlot::In => &self.inputs,
            IoSlot::Out => &self.outputs,
            IoSlot::SubIn => &self.sub_inputs,
            IoSlot::SubOut => &self.sub_outputs,
        }
    }

    pub fn value_mut(&mut self, slot: IoSlot) -> &mut Value {
        match slot {
            IoSlot::In => &mut self.inputs,
            IoSlot::Out => &mut self.outputs,
            IoSlot::SubIn => &mut self.sub_inputs,
            IoSlot::SubOut => &mut self.sub_outputs,
        }
    }

    /// Directory of this instance, relative to the project base.
    pub fn dir(&self) -> String {
        self.path.replace(':', "/")
    }

    pub fn persistent_dir(&self) -> String {
        join_rel(&self.dir(), "_persistent")
    }

    /// Runnable: accepting work, all required inputs present, something new
    /// since the last task, and no task in flight.
    pub fn can_run(&self) -> bool {
        matches!(self.state, InstanceState::Active | InstanceState::Warning)
            && self.function.generates_tasks()
            && self.pending.is_none()
            && (self.rerun_requested || self.inputs.is_updated() || self.sub_inputs.is_updated())
            && self.inputs.has_required_values()
    }

    /// Ids of commands this instance still waits for.
    pub fn outstanding_commands(&self) -> Vec<CommandId> {
        self.pending
            .as_ref()
            .map(|p| p.commands.clone())
            .unwrap_or_default()
    }
}

/// Join two relative path fragments with `/`, skipping empty ones.
pub fn join_rel(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_string(),
        (_, true) => a.to_string(),
        _ => format!("{a}/{b}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::file_list::FileList;
    use crate::dataflow::literal::Literal;
    use crate::dataflow::item_path::ItemKey;
    use crate::dataflow::run::FunctionRunOutput;
    use crate::dataflow::vtype::{Field, Type};
    use crate::fs::mock::MockFileSystem;

    fn func() -> Arc<Function> {
        Function::builder("t", "id")
            .input(Field::new("x", Type::int()))
            .input(Field::new("label", Type::string()).optional())
            .output(Field::new("x", Type::int()))
            .extended(|_| Ok(FunctionRunOutput::new()))
            .build()
    }

    #[test]
    fn paths_join_with_colons() {
        let top = ActiveInstance::new(InstanceId(1), "outer", Some((InstanceId::ROOT, "")), func());
        assert_eq!(top.path, "outer");
        let inner = ActiveInstance::new(InstanceId(2), "inner", Some((InstanceId(1), "outer")), func());
        assert_eq!(inner.path, "outer:inner");
        assert_eq!(inner.dir(), "outer/inner");
        assert_eq!(inner.persistent_dir(), "outer/inner/_persistent");
    }

    #[test]
    fn can_run_needs_active_state_and_required_inputs() {
        let files = FileList::new("/p", Arc::new(MockFileSystem::new()));
        let mut inst = ActiveInstance::new(InstanceId(1), "a", Some((InstanceId::ROOT, "")), func());
        inst.inputs
            .write_at(&[ItemKey::Field("x".into())], Literal::Int(1), 1, &files)
            .unwrap();
        assert!(!inst.can_run(), "held instances never run");
        inst.state = InstanceState::Active;
        assert!(inst.can_run());
        inst.inputs.clear_updated();
        assert!(!inst.can_run(), "nothing new since the last task");
    }
}
