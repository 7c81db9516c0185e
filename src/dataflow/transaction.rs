// src/dataflow/transaction.rs

//! Atomic batches of graph mutations.
//!
//! A commit runs in two phases. Planning resolves and type-checks every
//! operation against the current graph without touching it; any error
//! rejects the whole batch. Applying then creates instances, adds
//! connections, stages all writes at one fresh sequence number, promotes
//! them together and only then propagates, so no observer sees half a
//! batch.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::command::{Command, CommandId, CommandOwner};
use crate::dataflow::acp::AcpKey;
use crate::dataflow::function::{Function, Resolver};
use crate::dataflow::graph::{Effects, Endpoint, ProjectGraph, slot_type};
use crate::dataflow::instance::{InstanceId, InstanceState, join_rel};
use crate::dataflow::item_path::{IoSlot, ItemKey, ItemPath, SELF_NAME, is_valid_name, parse_items};
use crate::dataflow::literal::Literal;
use crate::dataflow::network::Connection;
use crate::dataflow::propagation::Sweep;
use crate::dataflow::run::FunctionRunOutput;
use crate::dataflow::vtype::Type;
use crate::errors::{CpcError, Result};

/// Nesting limit for network function bodies.
const MAX_NETWORK_DEPTH: usize = 32;

/// One graph mutation. Paths are relative to the network the batch is
/// committed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Set {
        path: String,
        literal: Literal,
        /// Type to read a string literal as, e.g. `"2.5"` as `float`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        print_name: Option<String>,
    },
    Connect {
        src: String,
        dst: String,
    },
    ConnectInitial {
        dst: String,
        literal: Literal,
    },
    AddInstance {
        name: String,
        function: String,
    },
    Activate {
        name: String,
    },
    /// Output of the committing task's own instance.
    SetOutput {
        id: String,
        literal: Literal,
    },
    SetSubOutput {
        id: String,
        literal: Literal,
    },
    AddCommand {
        command: Command,
    },
    CancelPrevCommands,
}

/// Translate a controller result into the operations that apply it.
pub fn ops_from_output(output: FunctionRunOutput) -> Vec<Op> {
    let mut ops = Vec::new();
    for inst in output.new_instances {
        ops.push(Op::AddInstance {
            name: inst.id,
            function: inst.function,
        });
    }
    for conn in output.new_connections {
        match (conn.src, conn.value) {
            (Some(src), _) => ops.push(Op::Connect { src, dst: conn.dst }),
            (None, Some(literal)) => ops.push(Op::ConnectInitial {
                dst: conn.dst,
                literal,
            }),
            (None, None) => {}
        }
    }
    for out in output.outputs {
        ops.push(Op::SetOutput {
            id: out.id,
            literal: out.value,
        });
    }
    for out in output.subnet_outputs {
        ops.push(Op::SetSubOutput {
            id: out.id,
            literal: out.value,
        });
    }
    if let Some(text) = output.warning {
        ops.push(Op::SetOutput {
            id: "msg.warning".into(),
            literal: Literal::String(text),
        });
    }
    if output.commands.cancel_prev {
        ops.push(Op::CancelPrevCommands);
    }
    for command in output.commands.items {
        ops.push(Op::AddCommand { command });
    }
    ops
}

/// A write checked during planning.
#[derive(Debug)]
struct PlannedWrite {
    target: Target,
    slot: IoSlot,
    items: Vec<ItemKey>,
    literal: Literal,
}

/// Instance a planned operation refers to; new instances only get real
/// ids when applied.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Existing(InstanceId),
    New(String),
}

#[derive(Debug)]
struct PlannedConnect {
    src_text: String,
    dst_text: String,
}

#[derive(Debug, Default)]
struct Plan {
    instances: Vec<(String, Arc<Function>)>,
    connects: Vec<PlannedConnect>,
    initials: Vec<Connection>,
    writes: Vec<PlannedWrite>,
    activate: Vec<Target>,
    commands: Vec<Command>,
    cancel_prev: bool,
}

/// Endpoint as seen during planning.
struct Resolved {
    target: Target,
    slot: IoSlot,
    is_self: bool,
    items: Vec<ItemKey>,
    ty: Arc<Type>,
    key: AcpKey,
}

/// Endpoint inside a network body that is still being planned.
struct BodyEnd {
    slot: IoSlot,
    is_self: bool,
    ty: Arc<Type>,
    key: AcpKey,
}

fn is_source(is_self: bool, slot: IoSlot) -> bool {
    matches!(
        (is_self, slot),
        (false, IoSlot::Out) | (true, IoSlot::SubOut | IoSlot::In)
    )
}

fn is_dest(is_self: bool, slot: IoSlot) -> bool {
    matches!(
        (is_self, slot),
        (false, IoSlot::In) | (true, IoSlot::SubIn | IoSlot::Out)
    )
}

/// Resolve `text` inside the body of `function`, instantiated at `base`
/// with `children` at their predicted ids.
fn resolve_in_body(
    function: &Function,
    base: usize,
    children: &HashMap<&str, (InstanceId, Arc<Function>)>,
    text: &str,
) -> Result<BodyEnd> {
    let path = ItemPath::parse(text)?;
    if path.instances.len() != 1 {
        return Err(CpcError::domain(format!(
            "'{text}' in '{}' must name one child or '{SELF_NAME}'",
            function.full_name()
        )));
    }
    let name = path.instances[0].as_str();
    let is_self = name == SELF_NAME;
    let (id, owner) = if is_self {
        (InstanceId(base), function)
    } else {
        let (id, f) = children.get(name).ok_or_else(|| {
            CpcError::domain(format!("no instance '{name}' in '{}'", function.full_name()))
        })?;
        (*id, f.as_ref())
    };
    let slot = path.direction.resolve(is_self)?;
    let ty = slot_type(owner, slot).descend(&path.items).ok_or_else(|| {
        CpcError::domain(format!("'{text}' in '{}' does not name an item", function.full_name()))
    })?;
    Ok(BodyEnd {
        slot,
        is_self,
        ty,
        key: AcpKey::new(id, slot, path.items),
    })
}

struct Planner<'a> {
    graph: &'a ProjectGraph,
    scope: InstanceId,
    resolver: &'a dyn Resolver,
    /// New instances by name, with their predicted ids.
    new: HashMap<String, (InstanceId, Arc<Function>)>,
    next_id: usize,
}

impl<'a> Planner<'a> {
    fn resolve(&self, text: &str) -> Result<Resolved> {
        let path = ItemPath::parse(text)?;
        if path.instances.len() != 1 {
            return Err(CpcError::domain(format!(
                "'{text}' must name one instance of this network or '{SELF_NAME}'"
            )));
        }
        let name = &path.instances[0];
        let is_self = name == SELF_NAME;
        let (target, id, function) = if is_self {
            let inst = self.graph.instance(self.scope);
            (Target::Existing(self.scope), self.scope, Arc::clone(&inst.function))
        } else if let Some(id) = self.graph.instance(self.scope).subnet.get(name) {
            (Target::Existing(id), id, Arc::clone(&self.graph.instance(id).function))
        } else if let Some((id, f)) = self.new.get(name) {
            (Target::New(name.clone()), *id, Arc::clone(f))
        } else {
            return Err(CpcError::domain(format!("no instance '{name}' in '{text}'")));
        };
        let slot = path.direction.resolve(is_self)?;
        let ty = slot_type(&function, slot)
            .descend(&path.items)
            .ok_or_else(|| CpcError::domain(format!("'{text}' does not name an item")))?;
        Ok(Resolved {
            key: AcpKey::new(id, slot, path.items.clone()),
            target,
            slot,
            is_self,
            items: path.items,
            ty,
        })
    }

    fn check_source(&self, r: &Resolved, text: &str) -> Result<()> {
        if is_source(r.is_self, r.slot) {
            Ok(())
        } else {
            Err(CpcError::domain(format!("'{text}' cannot be a connection source")))
        }
    }

    fn check_dest(&self, r: &Resolved, text: &str) -> Result<()> {
        if !is_dest(r.is_self, r.slot) {
            return Err(CpcError::domain(format!("'{text}' cannot be written to")));
        }
        if let Target::Existing(id) = r.target {
            let acps = &self.graph.acps;
            let fed = acps
                .tree_acps(id, r.slot)
                .iter()
                .any(|a| acps.direct_source(*a).is_some() && acps.key(*a).overlaps(&r.items));
            if fed {
                return Err(CpcError::domain(format!("'{text}' is connected")));
            }
        }
        Ok(())
    }

    /// Check a network function body as if instantiated at id `base`:
    /// every child resolves and every body connection type-checks. Body
    /// edges are added to `edges`. Returns the number of instances the
    /// body creates, including the top one.
    fn check_body(
        &self,
        function: &Function,
        base: usize,
        depth: usize,
        edges: &mut Vec<(AcpKey, AcpKey)>,
    ) -> Result<usize> {
        if depth > MAX_NETWORK_DEPTH {
            return Err(CpcError::domain(format!(
                "network '{}' nests too deep",
                function.full_name()
            )));
        }
        let Some(def) = function.network_def() else {
            return Ok(1);
        };
        // children are created depth first right after their parent
        let mut size = 1;
        let mut children: HashMap<&str, (InstanceId, Arc<Function>)> = HashMap::new();
        for child in &def.instances {
            if child.id == SELF_NAME || !is_valid_name(&child.id) {
                return Err(CpcError::domain(format!(
                    "network '{}' declares invalid instance name '{}'",
                    function.full_name(),
                    child.id
                )));
            }
            let f = self.resolver.function(&child.function)?;
            let id = base + size;
            size += self.check_body(&f, id, depth + 1, edges)?;
            if children.insert(child.id.as_str(), (InstanceId(id), f)).is_some() {
                return Err(CpcError::domain(format!(
                    "network '{}' declares '{}' twice",
                    function.full_name(),
                    child.id
                )));
            }
        }
        for conn in &def.connections {
            let d = resolve_in_body(function, base, &children, &conn.dst)?;
            if !is_dest(d.is_self, d.slot) {
                return Err(CpcError::domain(format!(
                    "'{}' in '{}' cannot be written to",
                    conn.dst,
                    function.full_name()
                )));
            }
            match (&conn.src, &conn.value) {
                (Some(src), _) => {
                    let s = resolve_in_body(function, base, &children, src)?;
                    if !is_source(s.is_self, s.slot) {
                        return Err(CpcError::domain(format!(
                            "'{src}' in '{}' cannot be a connection source",
                            function.full_name()
                        )));
                    }
                    if !d.ty.accepts(&s.ty) {
                        return Err(CpcError::domain(format!(
                            "cannot connect '{src}' ({}) to '{}' ({}) in '{}'",
                            s.ty,
                            conn.dst,
                            d.ty,
                            function.full_name()
                        )));
                    }
                    edges.push((s.key, d.key));
                }
                (None, Some(value)) => {
                    value.clone().coerce_to(&d.ty).map_err(CpcError::Domain)?;
                }
                (None, None) => {}
            }
        }
        Ok(size)
    }
}

impl ProjectGraph {
    /// Validate and apply `ops` in the network owned by `scope`. `task`
    /// is the sequence number of the committing task, if any; only tasks
    /// may set their own outputs or emit commands.
    pub(crate) fn commit(
        &mut self,
        scope: InstanceId,
        ops: Vec<Op>,
        resolver: &dyn Resolver,
        task: Option<u64>,
    ) -> Result<Effects> {
        let plan = self.plan(scope, ops, resolver, task)?;
        self.apply_plan(scope, plan, resolver)
    }

    fn plan(
        &mut self,
        scope: InstanceId,
        ops: Vec<Op>,
        resolver: &dyn Resolver,
        task: Option<u64>,
    ) -> Result<Plan> {
        let mut plan = Plan::default();
        let mut edges: Vec<(AcpKey, AcpKey)> = Vec::new();
        let mut imports: Vec<usize> = Vec::new();
        {
            let mut planner = Planner {
                graph: self,
                scope,
                resolver,
                new: HashMap::new(),
                next_id: self.next_instance_id().0,
            };
            let reject = |msg: String| CpcError::Transaction(msg);

            for op in ops {
                match op {
                    Op::AddInstance { name, function } => {
                        self.check_new_name(scope, &name)?;
                        if planner.new.contains_key(&name) {
                            return Err(CpcError::domain(format!("instance '{name}' already exists")));
                        }
                        let f = resolver.function(&function)?;
                        let size = planner.check_body(&f, planner.next_id, 1, &mut edges)?;
                        planner.new.insert(name.clone(), (InstanceId(planner.next_id), Arc::clone(&f)));
                        planner.next_id += size;
                        plan.instances.push((name, f));
                    }
                    Op::Activate { name } => {
                        let target = if let Some(id) = self.instance(scope).subnet.get(&name) {
                            Target::Existing(id)
                        } else if planner.new.contains_key(&name) {
                            Target::New(name)
                        } else {
                            return Err(CpcError::domain(format!("no instance '{name}'")));
                        };
                        plan.activate.push(target);
                    }
                    Op::Connect { src, dst } => {
                        let s = planner.resolve(&src)?;
                        let d = planner.resolve(&dst)?;
                        planner.check_source(&s, &src)?;
                        planner.check_dest(&d, &dst)?;
                        if !d.ty.accepts(&s.ty) {
                            return Err(CpcError::domain(format!(
                                "cannot connect '{src}' ({}) to '{dst}' ({})",
                                s.ty, d.ty
                            )));
                        }
                        edges.push((s.key, d.key));
                        plan.connects.push(PlannedConnect {
                            src_text: src,
                            dst_text: dst,
                        });
                    }
                    Op::ConnectInitial { dst, literal } => {
                        let d = planner.resolve(&dst)?;
                        planner.check_dest(&d, &dst)?;
                        let literal = literal.coerce_to(&d.ty).map_err(CpcError::Domain)?;
                        plan.initials.push(Connection {
                            src: None,
                            dst,
                            initial: Some(literal.clone()),
                            implicit: false,
                        });
                        imports.push(plan.writes.len());
                        plan.writes.push(PlannedWrite {
                            target: d.target,
                            slot: d.slot,
                            items: d.items,
                            literal,
                        });
                    }
                    Op::Set {
                        path,
                        literal,
                        source_type,
                        print_name,
                    } => {
                        let d = planner.resolve(&path)?;
                        planner.check_dest(&d, &path)?;
                        let literal = match source_type {
                            Some(name) => {
                                let ty = resolver.type_named(&name)?;
                                literal.from_source_type(&ty).map_err(CpcError::Domain)?
                            }
                            None => literal,
                        };
                        let literal = literal.coerce_to(&d.ty).map_err(CpcError::Domain)?;
                        debug!(path = %print_name.as_deref().unwrap_or(&path), "set planned");
                        imports.push(plan.writes.len());
                        plan.writes.push(PlannedWrite {
                            target: d.target,
                            slot: d.slot,
                            items: d.items,
                            literal,
                        });
                    }
                    Op::SetOutput { .. } | Op::SetSubOutput { .. } if task.is_none() => {
                        return Err(reject("outputs can only be set by a running task".into()));
                    }
                    Op::SetOutput { id, literal } => {
                        plan.writes.push(self.plan_own_write(scope, IoSlot::Out, &id, literal)?);
                    }
                    Op::SetSubOutput { id, literal } => {
                        plan.writes.push(self.plan_own_write(scope, IoSlot::SubOut, &id, literal)?);
                    }
                    Op::AddCommand { command } => {
                        if task.is_none() {
                            return Err(reject("commands can only be emitted by a running task".into()));
                        }
                        plan.commands.push(command);
                    }
                    Op::CancelPrevCommands => {
                        if task.is_none() {
                            return Err(reject("no task to cancel commands of".into()));
                        }
                        plan.cancel_prev = true;
                    }
                }
            }
            self.acps.check_new_edges(&edges).map_err(CpcError::Domain)?;
        }

        // user-supplied files from outside the project are copied in
        for idx in imports {
            let write = &mut plan.writes[idx];
            let literal = std::mem::take(&mut write.literal);
            write.literal = self.import_files(literal)?;
        }
        Ok(plan)
    }

    fn plan_own_write(
        &self,
        scope: InstanceId,
        slot: IoSlot,
        id: &str,
        literal: Literal,
    ) -> Result<PlannedWrite> {
        let inst = self.instance(scope);
        let items = parse_items(id)?;
        let ty = slot_type(&inst.function, slot)
            .descend(&items)
            .ok_or_else(|| CpcError::domain(format!("{} has no output '{id}'", inst.function.full_name())))?;
        let literal = literal.coerce_to(&ty).map_err(CpcError::Domain)?;
        Ok(PlannedWrite {
            target: Target::Existing(scope),
            slot,
            items,
            literal,
        })
    }

    /// Copy absolute file references outside the project base into a fresh
    /// `_inputs/NNNN/` directory and rewrite them as relative paths.
    fn import_files(&mut self, literal: Literal) -> Result<Literal> {
        let mut dir: Option<String> = None;
        self.import_walk(literal, &mut dir)
    }

    fn import_walk(&mut self, literal: Literal, dir: &mut Option<String>) -> Result<Literal> {
        Ok(match literal {
            Literal::File(path) => {
                let p = Path::new(&path);
                if !p.is_absolute() || p.starts_with(self.base_dir()) {
                    return Ok(Literal::File(path));
                }
                let d = match dir {
                    Some(d) => d.clone(),
                    None => dir.insert(self.next_input_dir()).clone(),
                };
                let name = p
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| CpcError::domain(format!("'{path}' is not a file")))?;
                let rel = join_rel(&d, &name);
                self.fs().copy(p, &self.base_dir().join(&rel))?;
                debug!(from = %path, to = %rel, "input file imported");
                Literal::File(rel)
            }
            Literal::Record(map) => Literal::Record(
                map.into_iter()
                    .map(|(k, v)| Ok((k, self.import_walk(v, dir)?)))
                    .collect::<Result<_>>()?,
            ),
            Literal::Dict(map) => Literal::Dict(
                map.into_iter()
                    .map(|(k, v)| Ok((k, self.import_walk(v, dir)?)))
                    .collect::<Result<_>>()?,
            ),
            Literal::Array(items) => Literal::Array(
                items
                    .into_iter()
                    .map(|v| self.import_walk(v, dir))
                    .collect::<Result<_>>()?,
            ),
            other => other,
        })
    }

    fn target_id(&self, scope: InstanceId, target: &Target) -> Option<InstanceId> {
        match target {
            Target::Existing(id) => Some(*id),
            Target::New(name) => self.instance(scope).subnet.get(name),
        }
    }

    fn apply_plan(&mut self, scope: InstanceId, plan: Plan, resolver: &dyn Resolver) -> Result<Effects> {
        let mark = self.next_instance_id();
        let acp_mark = self.acps.len();
        let mut created = Vec::new();
        for (name, function) in plan.instances {
            match self.create_instance(scope, &name, function, resolver) {
                Ok(id) => created.push(id),
                Err(e) => {
                    self.discard_from(scope, mark, acp_mark);
                    warn!(project = %self.project(), instance = %name, error = %e, "transaction rolled back");
                    return Err(e);
                }
            }
        }

        let seq = self.next_seq();
        let mut effects = Effects::default();

        let mut touched: BTreeSet<(InstanceId, IoSlot)> = BTreeSet::new();
        for conn in &plan.connects {
            let ends = self
                .resolve_str(scope, &conn.src_text)
                .and_then(|s| Ok((s, self.resolve_str(scope, &conn.dst_text)?)));
            let (src, dst): (Endpoint, Endpoint) = match ends {
                Ok(ends) => ends,
                Err(e) => {
                    warn!(project = %self.project(), error = %e, "connection skipped");
                    continue;
                }
            };
            self.acps.connect(src.acp_key(), dst.acp_key());
            self.instance_mut(scope).subnet.connections.push(Connection {
                src: Some(conn.src_text.clone()),
                dst: conn.dst_text.clone(),
                initial: None,
                implicit: false,
            });
            // a new destination starts out with the source's current value
            let current = self
                .instance(src.instance)
                .value(src.slot)
                .get(&src.items)
                .filter(|v| !v.is_null())
                .map(|v| v.to_literal());
            if let Some(literal) = current {
                let tree = self.instance_mut(dst.instance).value_mut(dst.slot);
                if let Err(e) = tree.stage_at(&dst.items, literal, seq) {
                    warn!(error = %e, "initial value not copied");
                }
                touched.insert((dst.instance, dst.slot));
            }
        }
        self.instance_mut(scope).subnet.connections.extend(plan.initials);

        for write in plan.writes {
            let Some(id) = self.target_id(scope, &write.target) else {
                continue;
            };
            let tree = self.instance_mut(id).value_mut(write.slot);
            match tree.stage_at(&write.items, write.literal, seq) {
                Ok(_) => {
                    touched.insert((id, write.slot));
                }
                Err(e) => warn!(project = %self.project(), error = %e, "write dropped"),
            }
        }

        let mut sweep = Sweep::default();
        for (id, slot) in touched {
            let files = Arc::clone(self.files());
            let written = self.instance_mut(id).value_mut(slot).promote_staged(&files);
            if !written.is_empty() && slot.is_input() {
                sweep.notify.insert(id);
            }
            for path in written {
                self.propagate_from(id, slot, &path, seq, &mut sweep);
            }
        }

        if plan.cancel_prev {
            if let Some(pending) = self.instance_mut(scope).pending.as_mut() {
                effects.cancel.append(&mut pending.commands);
            }
        }
        if !plan.commands.is_empty() {
            effects.enqueue = self.emit_commands(scope, plan.commands);
        }

        let mut to_activate: Vec<InstanceId> = plan
            .activate
            .iter()
            .filter_map(|t| self.target_id(scope, t))
            .collect();
        // instances created by a running task start out active
        if scope != InstanceId::ROOT && self.instance(scope).state != InstanceState::Held {
            to_activate.extend(created.iter().copied());
        }
        effects.seeds = self.notify(sweep);
        for id in to_activate {
            effects.merge(self.activate(id));
        }
        info!(project = %self.project(), seq, created = created.len(), "transaction committed");
        Ok(effects)
    }

    fn emit_commands(&mut self, scope: InstanceId, commands: Vec<Command>) -> Vec<Command> {
        let project = self.project().to_string();
        let base = self.base_dir().to_path_buf();
        let fs = Arc::clone(self.fs());
        let inst = self.instance_mut(scope);
        let Some(pending) = inst.pending.as_mut() else {
            warn!(instance = %inst.path, "commands from a task that is gone");
            return Vec::new();
        };
        let mut out = Vec::new();
        for mut cmd in commands {
            cmd.id = CommandId::generate();
            let n = pending.commands.len() + pending.finished.len() + out.len();
            cmd.dir = join_rel(&pending.run_dir, &format!("cmd_{n:03}"));
            if let Err(e) = fs.create_dir_all(&base.join(&cmd.dir)) {
                warn!(cmd_id = %cmd.id, error = %e, "could not create command dir");
            }
            cmd.owner = Some(CommandOwner {
                project: project.clone(),
                instance_path: inst.path.clone(),
                task_seq: pending.seq_nr,
                task_priority: pending.priority,
            });
            pending.commands.push(cmd.id.clone());
            debug!(cmd_id = %cmd.id, instance = %inst.path, executable = %cmd.executable, "command emitted");
            out.push(cmd);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ops_use_a_tagged_json_form() {
        let op: Op = serde_json::from_str(
            r#"{"op":"set","path":"a:in.x","literal":{"float":1.0}}"#,
        )
        .unwrap();
        assert_eq!(
            op,
            Op::Set {
                path: "a:in.x".into(),
                literal: Literal::Float(1.0),
                source_type: None,
                print_name: None,
            }
        );
        let json = serde_json::to_string(&Op::CancelPrevCommands).unwrap();
        assert_eq!(json, r#"{"op":"cancel_prev_commands"}"#);
    }

    #[test]
    fn output_translation_keeps_cancel_before_new_commands() {
        let out = FunctionRunOutput::new()
            .instance("b", "builtin:add")
            .command(Command::new("sleep"))
            .cancel_prev()
            .warning("slow");
        let ops = ops_from_output(out);
        assert!(matches!(ops[0], Op::AddInstance { .. }));
        let cancel = ops.iter().position(|o| matches!(o, Op::CancelPrevCommands)).unwrap();
        let add = ops.iter().position(|o| matches!(o, Op::AddCommand { .. })).unwrap();
        assert!(cancel < add);
        assert!(ops.iter().any(|o| matches!(o, Op::SetOutput { id, .. } if id == "msg.warning")));
    }
}
