// src/dataflow/graph.rs

//! The active graph of one project: an arena of instances, the ACP index,
//! and the project-wide sequence counter.
//!
//! All mutation goes through `&mut ProjectGraph`, so the project's write
//! lock is the single-writer update lock. Operations that may start tasks
//! return [`TaskSeed`]s; the owning project turns those into queued tasks
//! once the graph is consistent again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::command::{Command, CommandId};
use crate::dataflow::acp::{AcpGraph, AcpKey};
use crate::dataflow::file_list::FileList;
use crate::dataflow::function::{Function, MSG_FIELD, Resolver};
use crate::dataflow::instance::{ActiveInstance, InstanceId, InstanceState};
use crate::dataflow::item_path::{IoSlot, ItemKey, ItemPath, SELF_NAME, is_valid_name};
use crate::dataflow::literal::Literal;
use crate::dataflow::network::Connection;
use crate::dataflow::propagation::Sweep;
use crate::dataflow::run::FunctionRunOutput;
use crate::dataflow::transaction::{Op, ops_from_output};
use crate::dataflow::vtype::Type;
use crate::errors::{CpcError, Result};
use crate::fs::FileSystem;

/// A task the graph has decided to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSeed {
    pub instance: InstanceId,
    pub seq_nr: u64,
}

/// Side effects of a graph operation that the project must carry out.
#[derive(Debug, Default)]
pub struct Effects {
    pub seeds: Vec<TaskSeed>,
    /// Commands to push on the command queue.
    pub enqueue: Vec<Command>,
    /// Outstanding commands to withdraw from the queue and running list.
    pub cancel: Vec<CommandId>,
    /// Queued commands to withdraw; running ones may finish.
    pub dequeue: Vec<CommandId>,
}

impl Effects {
    pub fn merge(&mut self, other: Effects) {
        self.seeds.extend(other.seeds);
        self.enqueue.extend(other.enqueue);
        self.cancel.extend(other.cancel);
        self.dequeue.extend(other.dequeue);
    }
}

/// A resolved item path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub instance: InstanceId,
    pub slot: IoSlot,
    pub items: Vec<ItemKey>,
    pub is_self: bool,
}

impl Endpoint {
    pub fn acp_key(&self) -> AcpKey {
        AcpKey::new(self.instance, self.slot, self.items.clone())
    }
}

#[derive(Debug)]
pub struct ProjectGraph {
    project: String,
    base_dir: PathBuf,
    fs: Arc<dyn FileSystem>,
    pub(crate) files: Arc<FileList>,
    pub(crate) instances: Vec<ActiveInstance>,
    pub(crate) acps: AcpGraph,
    by_path: HashMap<String, InstanceId>,
    next_seq: u64,
    input_counter: u32,
}

impl ProjectGraph {
    pub fn new(
        project: impl Into<String>,
        base_dir: impl Into<PathBuf>,
        fs: Arc<dyn FileSystem>,
        files: Arc<FileList>,
    ) -> Self {
        let mut root = ActiveInstance::new(InstanceId::ROOT, "", None, Function::root());
        root.state = InstanceState::Active;
        Self {
            project: project.into(),
            base_dir: base_dir.into(),
            fs,
            files,
            instances: vec![root],
            acps: AcpGraph::new(),
            by_path: HashMap::from([(String::new(), InstanceId::ROOT)]),
            next_seq: 0,
            input_counter: 0,
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub(crate) fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn files(&self) -> &Arc<FileList> {
        &self.files
    }

    /// Allocate the next project-wide sequence number.
    pub fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    pub fn current_seq(&self) -> u64 {
        self.next_seq
    }

    pub(crate) fn restore_counters(&mut self, seq: u64, inputs: u32) {
        self.next_seq = seq;
        self.input_counter = inputs;
    }

    pub fn input_counter(&self) -> u32 {
        self.input_counter
    }

    pub(crate) fn next_input_dir(&mut self) -> String {
        self.input_counter += 1;
        format!("_inputs/{:04}", self.input_counter)
    }

    pub fn instance(&self, id: InstanceId) -> &ActiveInstance {
        &self.instances[id.0]
    }

    pub(crate) fn instance_mut(&mut self, id: InstanceId) -> &mut ActiveInstance {
        &mut self.instances[id.0]
    }

    /// All instances except the root, in creation order.
    pub fn instances(&self) -> impl Iterator<Item = &ActiveInstance> {
        self.instances.iter().skip(1)
    }

    pub fn len(&self) -> usize {
        self.instances.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look an instance up by canonical path (`""` is the top level).
    pub fn find(&self, path: &str) -> Option<InstanceId> {
        self.by_path.get(path).copied()
    }

    pub fn find_or_err(&self, path: &str) -> Result<InstanceId> {
        self.find(path)
            .ok_or_else(|| CpcError::domain(format!("no instance '{path}'")))
    }

    /// Id the next created instance will get.
    pub(crate) fn next_instance_id(&self) -> InstanceId {
        InstanceId(self.instances.len())
    }

    /// Resolve `path` relative to the network owned by `scope`.
    pub fn resolve(&self, scope: InstanceId, path: &ItemPath) -> Result<Endpoint> {
        let mut cur = scope;
        let mut is_self = false;
        for (i, name) in path.instances.iter().enumerate() {
            if name == SELF_NAME {
                if i + 1 != path.instances.len() {
                    return Err(CpcError::domain(format!(
                        "'{SELF_NAME}' must be the last instance in '{path}'"
                    )));
                }
                is_self = true;
                break;
            }
            cur = self.instances[cur.0].subnet.get(name).ok_or_else(|| {
                CpcError::domain(format!("no instance '{name}' in '{path}'"))
            })?;
        }
        Ok(Endpoint {
            instance: cur,
            slot: path.direction.resolve(is_self)?,
            items: path.items.clone(),
            is_self,
        })
    }

    pub fn resolve_str(&self, scope: InstanceId, path: &str) -> Result<Endpoint> {
        self.resolve(scope, &ItemPath::parse(path)?)
    }

    /// Type of the node an endpoint addresses.
    pub fn endpoint_type(&self, ep: &Endpoint) -> Result<Arc<Type>> {
        let inst = &self.instances[ep.instance.0];
        slot_type(&inst.function, ep.slot)
            .descend(&ep.items)
            .ok_or_else(|| {
                CpcError::domain(format!(
                    "'{}' has no item {}",
                    display_tree(&inst.path, ep.slot),
                    crate::dataflow::item_path::format_items(&ep.items)
                ))
            })
    }

    /// Current value and sequence number at `path`, from the top level.
    pub fn value_at(&self, path: &str) -> Result<(Literal, u64)> {
        let ep = self.resolve_str(InstanceId::ROOT, path)?;
        self.endpoint_type(&ep)?;
        let tree = self.instances[ep.instance.0].value(ep.slot);
        Ok(tree
            .get(&ep.items)
            .map(|v| (v.to_literal(), v.seq_nr()))
            .unwrap_or((Literal::Null, 0)))
    }

    /// Create an instance of `function` in the network owned by `scope`,
    /// instantiating its body if it is a network function. Names are
    /// assumed to be checked already. On error nothing of the new
    /// instance is left in the graph.
    pub(crate) fn create_instance(
        &mut self,
        scope: InstanceId,
        name: &str,
        function: Arc<Function>,
        resolver: &dyn Resolver,
    ) -> Result<InstanceId> {
        let mark = self.next_instance_id();
        let acp_mark = self.acps.len();
        self.build_instance(scope, name, function, resolver)
            .inspect_err(|_| self.discard_from(scope, mark, acp_mark))
    }

    /// Drop instances from `mark` on, and ACP points from `acp_mark` on.
    /// Only valid while nothing older refers to them.
    pub(crate) fn discard_from(&mut self, scope: InstanceId, mark: InstanceId, acp_mark: usize) {
        self.instances.truncate(mark.0);
        self.by_path.retain(|_, id| id.0 < mark.0);
        self.instances[scope.0].subnet.instances.retain(|_, id| id.0 < mark.0);
        self.acps.truncate(acp_mark);
    }

    fn build_instance(
        &mut self,
        scope: InstanceId,
        name: &str,
        function: Arc<Function>,
        resolver: &dyn Resolver,
    ) -> Result<InstanceId> {
        let id = self.next_instance_id();
        let parent_path = self.instances[scope.0].path.clone();
        let inst = ActiveInstance::new(id, name, Some((scope, &parent_path)), Arc::clone(&function));
        debug!(project = %self.project, instance = %inst.path, function = %function.full_name(), "instance created");
        self.by_path.insert(inst.path.clone(), id);
        self.instances.push(inst);
        self.instances[scope.0].subnet.instances.insert(name.to_string(), id);

        if let Some(def) = function.network_def() {
            for child in &def.instances {
                let f = resolver.function(&child.function)?;
                self.build_instance(id, &child.id, f, resolver)?;
            }
            for conn in &def.connections {
                let dst = self.resolve_str(id, &conn.dst)?;
                match (&conn.src, &conn.value) {
                    (Some(src), _) => {
                        let src = self.resolve_str(id, src)?;
                        self.acps.connect(src.acp_key(), dst.acp_key());
                    }
                    (None, Some(value)) => {
                        let tree = self.instances[dst.instance.0].value_mut(dst.slot);
                        tree.write_at(&dst.items, value.clone(), 0, &self.files)
                            .map_err(CpcError::Domain)?;
                    }
                    (None, None) => {}
                }
                self.instances[id.0].subnet.connections.push(Connection {
                    src: conn.src.clone(),
                    dst: conn.dst.clone(),
                    initial: conn.value.clone(),
                    implicit: true,
                });
            }
        }
        Ok(id)
    }

    /// Check that `name` can be added to the network owned by `scope`.
    pub(crate) fn check_new_name(&self, scope: InstanceId, name: &str) -> Result<()> {
        if name == SELF_NAME || !is_valid_name(name) {
            return Err(CpcError::domain(format!("invalid instance name '{name}'")));
        }
        if self.instances[scope.0].subnet.get(name).is_some() {
            return Err(CpcError::domain(format!("instance '{name}' already exists")));
        }
        Ok(())
    }

    /// Ids of `id` and every instance nested in its subnet, depth first.
    pub fn subtree(&self, id: InstanceId) -> Vec<InstanceId> {
        let mut out = vec![id];
        let mut i = 0;
        while i < out.len() {
            let cur = out[i];
            out.extend(self.instances[cur.0].subnet.instances.values().copied());
            i += 1;
        }
        out
    }

    /// `held → active` for `id` and its whole subnet; newly active
    /// instances that can run start a task.
    pub fn activate(&mut self, id: InstanceId) -> Effects {
        let mut sweep = Sweep::default();
        for cur in self.subtree(id) {
            let inst = &mut self.instances[cur.0];
            if inst.state == InstanceState::Held {
                inst.state = InstanceState::Active;
                info!(project = %self.project, instance = %inst.path, "instance activated");
            }
            sweep.notify.insert(cur);
        }
        Effects {
            seeds: self.notify(sweep),
            ..Effects::default()
        }
    }

    /// Put `id` and its subnet on hold. Pending tasks are dropped, queued
    /// commands withdrawn; running commands may finish but their results
    /// are discarded.
    pub fn deactivate(&mut self, id: InstanceId) -> Effects {
        let mut effects = Effects::default();
        for cur in self.subtree(id) {
            let inst = &mut self.instances[cur.0];
            if cur != InstanceId::ROOT {
                inst.state = InstanceState::Held;
            }
            inst.rerun_requested = false;
            if let Some(pending) = inst.pending.take() {
                debug!(project = %self.project, instance = %inst.path, "pending task dropped");
                effects.dequeue.extend(pending.commands);
            }
        }
        effects
    }

    pub fn block(&mut self, id: InstanceId) -> Result<()> {
        let inst = &mut self.instances[id.0];
        match inst.state {
            InstanceState::Active | InstanceState::Warning => {
                inst.state = InstanceState::Blocked;
                Ok(())
            }
            state => Err(CpcError::domain(format!(
                "cannot block '{}' while {state}",
                inst.path
            ))),
        }
    }

    /// `blocked → active`, then run if possible.
    pub fn unblock(&mut self, id: InstanceId) -> Effects {
        let mut sweep = Sweep::default();
        let inst = &mut self.instances[id.0];
        if inst.state == InstanceState::Blocked {
            inst.state = InstanceState::Active;
            sweep.notify.insert(id);
        }
        Effects {
            seeds: self.notify(sweep),
            ..Effects::default()
        }
    }

    /// Clear errors and force a new run. Returns the number of errors
    /// cleared.
    pub fn rerun(&mut self, id: InstanceId, recursive: bool, clear_error: bool) -> (usize, Effects) {
        let targets = if recursive { self.subtree(id) } else { vec![id] };
        let mut cleared = 0;
        let mut sweep = Sweep::default();
        for cur in targets {
            if clear_error && self.instances[cur.0].state == InstanceState::Error {
                let seq = self.next_seq();
                let inst = &mut self.instances[cur.0];
                inst.error = None;
                inst.state = InstanceState::Active;
                cleared += 1;
                self.write_msg(cur, "error", Literal::Null, seq, &mut sweep);
            }
            let inst = &mut self.instances[cur.0];
            if matches!(inst.state, InstanceState::Active | InstanceState::Warning)
                && inst.function.generates_tasks()
            {
                inst.rerun_requested = true;
                sweep.notify.insert(cur);
            }
        }
        (
            cleared,
            Effects {
                seeds: self.notify(sweep),
                ..Effects::default()
            },
        )
    }

    pub fn set_priority(&mut self, id: InstanceId, priority: i32) {
        self.instances[id.0].priority = priority;
    }

    /// Put `id` in `error`: cancel its outstanding commands, drop its task,
    /// and publish `msg` on its `msg.error` output.
    pub fn mark_error(&mut self, id: InstanceId, msg: &str) -> Effects {
        let seq = self.next_seq();
        let inst = &mut self.instances[id.0];
        warn!(project = %self.project, instance = %inst.path, error = %msg, "instance failed");
        let mut effects = Effects::default();
        if let Some(pending) = inst.pending.take() {
            effects.cancel.extend(pending.commands);
        }
        inst.state = InstanceState::Error;
        inst.error = Some(msg.to_string());
        inst.rerun_requested = false;

        let mut sweep = Sweep::default();
        self.write_msg(id, "error", Literal::String(msg.to_string()), seq, &mut sweep);
        effects.seeds = self.notify(sweep);
        effects
    }

    fn write_msg(&mut self, id: InstanceId, field: &str, lit: Literal, seq: u64, sweep: &mut Sweep) {
        let path = [ItemKey::Field(MSG_FIELD.into()), ItemKey::Field(field.into())];
        let tree = self.instances[id.0].value_mut(IoSlot::Out);
        match tree.write_at(&path, lit, seq, &self.files) {
            Ok(true) => self.propagate_from(id, IoSlot::Out, &path, seq, sweep),
            Ok(false) => {}
            Err(e) => warn!(project = %self.project, error = %e, "could not write msg output"),
        }
    }

    /// Apply a controller's result to the task it belongs to.
    pub fn complete_task(
        &mut self,
        id: InstanceId,
        task_seq: u64,
        result: std::result::Result<FunctionRunOutput, String>,
        resolver: &dyn Resolver,
    ) -> Effects {
        let inst = &mut self.instances[id.0];
        let Some(pending) = inst.pending.as_mut().filter(|p| p.seq_nr == task_seq) else {
            debug!(project = %self.project, instance = %inst.path, task_seq, "result of a dropped task discarded");
            return Effects::default();
        };
        pending.in_flight = false;
        pending.input.commands.clear();

        let output = match result {
            Ok(output) => output,
            Err(msg) => return self.mark_error(id, &msg),
        };
        let outstanding = if output.commands.cancel_prev { 0 } else { pending.commands.len() };
        if output.has_outputs() && (outstanding > 0 || !output.commands.items.is_empty()) {
            return self.mark_error(id, "task returned both outputs and commands");
        }

        let warning = output.warning.clone();
        let ops = ops_from_output(output);
        let mut effects = match self.commit(id, ops, resolver, Some(task_seq)) {
            Ok(effects) => effects,
            Err(e) => return self.mark_error(id, &e.to_string()),
        };

        let inst = &mut self.instances[id.0];
        if warning.is_some() {
            inst.warning = warning;
        }
        let Some(pending) = inst.pending.as_mut() else {
            return effects;
        };
        if let Some(next) = pending.finished.pop_front() {
            pending.input.commands = vec![next];
            pending.in_flight = true;
            effects.seeds.push(TaskSeed {
                instance: id,
                seq_nr: task_seq,
            });
        } else if pending.commands.is_empty() {
            inst.pending = None;
            if inst.state == InstanceState::Running {
                inst.state = if inst.warning.is_some() {
                    InstanceState::Warning
                } else {
                    InstanceState::Active
                };
            }
            debug!(project = %self.project, instance = %inst.path, task_seq, "task finished");
            let mut sweep = Sweep::default();
            sweep.notify.insert(id);
            effects.seeds.extend(self.notify(sweep));
        }
        effects
    }

    /// A command of `instance_path`'s task finished. Returns a follow-up
    /// run when the controller is idle; otherwise the command waits.
    pub fn command_finished(&mut self, cmd: Command) -> Option<TaskSeed> {
        let owner = cmd.owner.clone()?;
        let id = self.find(&owner.instance_path)?;
        let inst = &mut self.instances[id.0];
        let pending = inst
            .pending
            .as_mut()
            .filter(|p| p.seq_nr == owner.task_seq && p.commands.contains(&cmd.id));
        let Some(pending) = pending else {
            debug!(project = %self.project, cmd_id = %cmd.id, "finished command no longer wanted");
            return None;
        };
        pending.commands.retain(|c| c != &cmd.id);
        inst.cpu_time += cmd.cpu_time;
        if pending.in_flight {
            pending.finished.push_back(cmd);
            return None;
        }
        pending.input.commands = vec![cmd];
        pending.in_flight = true;
        Some(TaskSeed {
            instance: id,
            seq_nr: owner.task_seq,
        })
    }

    /// Owner of a command, if its task is still waiting for it.
    pub fn command_owner(&self, cmd: &Command) -> Option<InstanceId> {
        let owner = cmd.owner.as_ref()?;
        let id = self.find(&owner.instance_path)?;
        self.instances[id.0]
            .pending
            .as_ref()
            .filter(|p| p.seq_nr == owner.task_seq)
            .map(|_| id)
    }

    /// Run a batch of operations as one transaction in the network owned
    /// by `scope`.
    pub fn apply(&mut self, scope: InstanceId, ops: Vec<Op>, resolver: &dyn Resolver) -> Result<Effects> {
        self.commit(scope, ops, resolver, None)
    }
}

pub(crate) fn slot_type(function: &Function, slot: IoSlot) -> &Arc<Type> {
    match slot {
        IoSlot::In => function.inputs(),
        IoSlot::Out => function.outputs(),
        IoSlot::SubIn => function.sub_inputs(),
        IoSlot::SubOut => function.sub_outputs(),
    }
}

fn display_tree(path: &str, slot: IoSlot) -> String {
    if path.is_empty() {
        format!("{SELF_NAME}:{}", slot.as_str())
    } else {
        format!("{path}:{}", slot.as_str())
    }
}
