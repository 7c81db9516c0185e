// src/project/project.rs

//! One project: its graph behind the update lock, its imports and its
//! transaction stack, wired to the process-wide queues.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use tracing::{debug, info, warn};

use crate::command::{CmdQueue, Command, CommandId, RunningCmdList};
use crate::dataflow::file_list::FileList;
use crate::dataflow::function::{Function, FunctionRegistry, Resolver, scalar_type, split_full_name};
use crate::dataflow::graph::{Effects, ProjectGraph};
use crate::dataflow::instance::{InstanceId, InstanceState};
use crate::dataflow::literal::Literal;
use crate::dataflow::run::FunctionRunOutput;
use crate::dataflow::task::{Task, TaskItem, TaskQueue};
use crate::dataflow::transaction::Op;
use crate::dataflow::vtype::Type;
use crate::errors::{CpcError, Result};
use crate::fs::FileSystem;
use crate::heartbeat::HeartbeatTracker;
use crate::types::LostCommandPolicy;

/// Process-wide services every project talks to.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub registry: Arc<FunctionRegistry>,
    pub queue: Arc<CmdQueue>,
    pub running: Arc<RunningCmdList>,
    pub tracker: Arc<HeartbeatTracker>,
    pub tasks: TaskQueue,
    pub fs: Arc<dyn FileSystem>,
}

impl ProjectContext {
    /// Fresh queues around `registry` and `fs`.
    pub fn new(registry: Arc<FunctionRegistry>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            registry,
            queue: Arc::new(CmdQueue::new()),
            running: Arc::new(RunningCmdList::new()),
            tracker: Arc::new(HeartbeatTracker::new()),
            tasks: TaskQueue::new(),
            fs,
        }
    }
}

/// Everything guarded by the project's update lock.
#[derive(Debug)]
pub struct ProjectState {
    pub graph: ProjectGraph,
    pub imports: BTreeSet<String>,
    /// Open transactions, innermost last.
    pub txn: Vec<Vec<Op>>,
}

/// Resolves names against imported libraries only.
pub(crate) struct ImportResolver<'a> {
    pub registry: &'a FunctionRegistry,
    pub imports: &'a BTreeSet<String>,
}

impl ImportResolver<'_> {
    fn check(&self, full_name: &str) -> Result<()> {
        let (lib, _) = split_full_name(full_name)?;
        if self.imports.contains(lib) {
            Ok(())
        } else {
            Err(CpcError::domain(format!("library '{lib}' is not imported")))
        }
    }
}

impl Resolver for ImportResolver<'_> {
    fn function(&self, full_name: &str) -> Result<Arc<Function>> {
        self.check(full_name)?;
        self.registry.function(full_name)
    }

    fn type_named(&self, name: &str) -> Result<Arc<Type>> {
        if let Some(ty) = scalar_type(name) {
            return Ok(ty);
        }
        self.check(name)?;
        self.registry.type_named(name)
    }
}

/// Summary of one instance for listings.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceInfo {
    pub path: String,
    pub function: String,
    pub state: InstanceState,
    pub error: Option<String>,
    pub tasks_started: u64,
    pub cpu_time: f64,
}

#[derive(Debug)]
pub struct Project {
    name: String,
    base_dir: PathBuf,
    ctx: ProjectContext,
    state: RwLock<ProjectState>,
    this: Weak<Project>,
}

impl Project {
    pub fn new(name: impl Into<String>, base_dir: impl Into<PathBuf>, ctx: ProjectContext) -> Arc<Self> {
        let name = name.into();
        let base_dir = base_dir.into();
        let files = FileList::new(&base_dir, Arc::clone(&ctx.fs));
        let graph = ProjectGraph::new(&name, &base_dir, Arc::clone(&ctx.fs), files);
        Self::from_state(
            name,
            base_dir,
            ctx,
            ProjectState {
                graph,
                imports: BTreeSet::new(),
                txn: Vec::new(),
            },
        )
    }

    pub(crate) fn from_state(name: String, base_dir: PathBuf, ctx: ProjectContext, state: ProjectState) -> Arc<Self> {
        state.graph.files().set_deletions_enabled(true);
        Arc::new_cyclic(|this| Project {
            name,
            base_dir,
            ctx,
            state: RwLock::new(state),
            this: this.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn context(&self) -> &ProjectContext {
        &self.ctx
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, ProjectState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ProjectState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on the graph under the update lock, then carry out the
    /// effects it reports while the graph is still consistent.
    fn mutate<T>(&self, f: impl FnOnce(&mut ProjectGraph, &dyn Resolver) -> Result<(T, Effects)>) -> Result<T> {
        let mut guard = self.write();
        let st = &mut *guard;
        let resolver = ImportResolver {
            registry: &self.ctx.registry,
            imports: &st.imports,
        };
        let (value, effects) = f(&mut st.graph, &resolver)?;
        self.handle_effects(&st.graph, effects);
        Ok(value)
    }

    /// Write the project state to `_state.json` in its base directory.
    pub fn save(&self) -> Result<()> {
        crate::persistence::save(self)
    }

    pub fn import(&self, library: &str) -> Result<()> {
        if self.ctx.registry.library(library).is_none() {
            return Err(CpcError::domain(format!("no library '{library}'")));
        }
        if self.write().imports.insert(library.to_string()) {
            info!(project = %self.name, library, "library imported");
        }
        Ok(())
    }

    pub fn imports(&self) -> Vec<String> {
        self.read().imports.iter().cloned().collect()
    }

    /// Open a (possibly nested) transaction.
    pub fn begin(&self) {
        self.write().txn.push(Vec::new());
    }

    /// Add `op` to the innermost open transaction, or apply it right away
    /// when none is open.
    pub fn schedule(&self, op: Op) -> Result<()> {
        {
            let mut st = self.write();
            if let Some(open) = st.txn.last_mut() {
                open.push(op);
                return Ok(());
            }
        }
        self.apply(vec![op])
    }

    /// Close the innermost transaction. Nested ones fold into their parent;
    /// the outermost is applied.
    pub fn commit(&self) -> Result<()> {
        let ops = {
            let mut st = self.write();
            let ops = st
                .txn
                .pop()
                .ok_or_else(|| CpcError::Transaction("no open transaction".into()))?;
            if let Some(parent) = st.txn.last_mut() {
                parent.extend(ops);
                return Ok(());
            }
            ops
        };
        self.apply(ops)
    }

    pub fn rollback(&self) -> Result<()> {
        self.write()
            .txn
            .pop()
            .map(|ops| debug!(project = %self.name, dropped = ops.len(), "transaction rolled back"))
            .ok_or_else(|| CpcError::Transaction("no open transaction".into()))
    }

    /// Apply `ops` atomically at the top level.
    pub fn apply(&self, ops: Vec<Op>) -> Result<()> {
        self.mutate(|graph, resolver| {
            let effects = graph.apply(InstanceId::ROOT, ops, resolver)?;
            Ok(((), effects))
        })
    }

    pub fn add_instance(&self, name: &str, function: &str) -> Result<()> {
        self.schedule(Op::AddInstance {
            name: name.into(),
            function: function.into(),
        })
    }

    pub fn connect(&self, src: &str, dst: &str) -> Result<()> {
        self.schedule(Op::Connect {
            src: src.into(),
            dst: dst.into(),
        })
    }

    pub fn set(&self, path: &str, literal: Literal) -> Result<()> {
        self.schedule(Op::Set {
            path: path.into(),
            literal,
            source_type: None,
            print_name: None,
        })
    }

    pub fn activate(&self, path: &str) -> Result<()> {
        self.mutate(|graph, _| {
            let id = graph.find_or_err(path)?;
            Ok(((), graph.activate(id)))
        })
    }

    pub fn deactivate(&self, path: &str) -> Result<()> {
        self.mutate(|graph, _| {
            let id = graph.find_or_err(path)?;
            Ok(((), graph.deactivate(id)))
        })
    }

    pub fn block(&self, path: &str) -> Result<()> {
        self.mutate(|graph, _| {
            let id = graph.find_or_err(path)?;
            graph.block(id)?;
            Ok(((), Effects::default()))
        })
    }

    pub fn unblock(&self, path: &str) -> Result<()> {
        self.mutate(|graph, _| {
            let id = graph.find_or_err(path)?;
            Ok(((), graph.unblock(id)))
        })
    }

    /// Returns the number of errors cleared.
    pub fn rerun(&self, path: &str, recursive: bool, clear_error: bool) -> Result<usize> {
        self.mutate(|graph, _| {
            let id = graph.find_or_err(path)?;
            Ok(graph.rerun(id, recursive, clear_error))
        })
    }

    pub fn set_priority(&self, path: &str, priority: i32) -> Result<()> {
        self.mutate(|graph, _| {
            let id = graph.find_or_err(path)?;
            graph.set_priority(id, priority);
            Ok(((), Effects::default()))
        })
    }

    /// Value at `path` as a literal, with its sequence number.
    pub fn value(&self, path: &str) -> Result<(Literal, u64)> {
        self.read().graph.value_at(path)
    }

    pub fn instance_state(&self, path: &str) -> Result<InstanceState> {
        let st = self.read();
        let id = st.graph.find_or_err(path)?;
        Ok(st.graph.instance(id).state)
    }

    pub fn instance_info(&self, path: &str) -> Result<InstanceInfo> {
        let st = self.read();
        let id = st.graph.find_or_err(path)?;
        Ok(info_of(&st.graph, id))
    }

    pub fn instances(&self) -> Vec<InstanceInfo> {
        let st = self.read();
        st.graph.instances().map(|i| info_of(&st.graph, i.id)).collect()
    }

    /// Commands the instance at `path` still waits for.
    pub fn outstanding_commands(&self, path: &str) -> Result<Vec<CommandId>> {
        let st = self.read();
        let id = st.graph.find_or_err(path)?;
        Ok(st.graph.instance(id).outstanding_commands())
    }

    /// Apply a controller result for task `seq_nr` of `instance`.
    pub fn complete_task(
        &self,
        instance: InstanceId,
        seq_nr: u64,
        result: std::result::Result<FunctionRunOutput, String>,
    ) {
        let done = self.mutate(|graph, resolver| {
            Ok(((), graph.complete_task(instance, seq_nr, result, resolver)))
        });
        if let Err(e) = done {
            warn!(project = %self.name, error = %e, "task result not applied");
        }
    }

    /// A worker finished `cmd`; schedule the follow-up run.
    pub fn command_finished(&self, cmd: Command) {
        let cmd_id = cmd.id.clone();
        let done = self.mutate(|graph, _| {
            let seeds = graph.command_finished(cmd).into_iter().collect();
            Ok((
                (),
                Effects {
                    seeds,
                    ..Effects::default()
                },
            ))
        });
        if let Err(e) = done {
            warn!(project = %self.name, cmd_id = %cmd_id, error = %e, "finished command not applied");
        }
    }

    /// A worker stopped reporting on `cmd`.
    pub fn command_lost(&self, mut cmd: Command, reason: &str, policy: LostCommandPolicy) {
        match policy {
            LostCommandPolicy::Requeue => {
                cmd.increase_priority();
                cmd.worker = None;
                info!(project = %self.name, cmd_id = %cmd.id, "lost command requeued");
                self.ctx.queue.add(cmd);
            }
            LostCommandPolicy::Fail => {
                let failed = self.mutate(|graph, _| {
                    let Some(id) = graph.command_owner(&cmd) else {
                        return Ok(((), Effects::default()));
                    };
                    Ok(((), graph.mark_error(id, &format!("worker lost: {reason}"))))
                });
                if let Err(e) = failed {
                    warn!(project = %self.name, cmd_id = %cmd.id, error = %e, "lost command not recorded");
                }
            }
        }
    }

    /// Drop every queued and running command of this project.
    pub fn purge_commands(&self) -> usize {
        let mine = |c: &Command| c.project() == Some(self.name.as_str());
        let queued = self.ctx.queue.delete_by_project(&self.name);
        let running = self.ctx.running.remove_where(mine);
        for cmd in &running {
            self.ctx.tracker.forget(&cmd.id);
        }
        queued.len() + running.len()
    }

    /// Put the next run of every task that was in flight back on the task
    /// queue, e.g. after loading.
    pub(crate) fn requeue_in_flight(&self) -> usize {
        let st = self.read();
        let seeds: Vec<_> = st
            .graph
            .instances()
            .filter_map(|i| {
                let p = i.pending.as_ref().filter(|p| p.in_flight)?;
                Some(crate::dataflow::graph::TaskSeed {
                    instance: i.id,
                    seq_nr: p.seq_nr,
                })
            })
            .collect();
        let n = seeds.len();
        self.handle_effects(
            &st.graph,
            Effects {
                seeds,
                ..Effects::default()
            },
        );
        n
    }

    fn handle_effects(&self, graph: &ProjectGraph, effects: Effects) {
        for id in &effects.cancel {
            self.ctx.queue.remove(id);
            if self.ctx.running.remove(id).is_ok() {
                self.ctx.tracker.forget(id);
                debug!(project = %self.name, cmd_id = %id, "running command cancelled");
            }
        }
        for id in &effects.dequeue {
            self.ctx.queue.remove(id);
        }
        for cmd in effects.enqueue {
            self.ctx.queue.add(cmd);
        }
        let Some(this) = self.this.upgrade() else {
            return;
        };
        for seed in effects.seeds {
            let inst = graph.instance(seed.instance);
            let Some(pending) = inst.pending.as_ref().filter(|p| p.seq_nr == seed.seq_nr) else {
                continue;
            };
            let task = Task {
                project: Arc::clone(&this),
                instance: seed.instance,
                instance_path: inst.path.clone(),
                function: Arc::clone(&inst.function),
                input: pending.input.clone(),
                priority: pending.priority,
                seq_nr: seed.seq_nr,
                pins: pending.pins.clone(),
            };
            self.ctx.tasks.put(TaskItem::Run(Box::new(task)));
        }
    }
}

impl Drop for Project {
    fn drop(&mut self) {
        // tearing down the value trees must not delete project files
        let st = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        st.graph.files().set_deletions_enabled(false);
    }
}

fn info_of(graph: &ProjectGraph, id: InstanceId) -> InstanceInfo {
    let inst = graph.instance(id);
    InstanceInfo {
        path: inst.path.clone(),
        function: inst.function.full_name().to_string(),
        state: inst.state,
        error: inst.error.clone(),
        tasks_started: inst.tasks_started,
        cpu_time: inst.cpu_time,
    }
}
