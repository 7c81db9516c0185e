// src/dataflow/propagation.rs

//! Moving written values along connections, and turning fresh input into
//! tasks.

use std::collections::HashSet;

use tracing::{debug, trace, warn};

use crate::dataflow::acp::AcpId;
use crate::dataflow::function::Controller;
use crate::dataflow::graph::{ProjectGraph, TaskSeed};
use crate::dataflow::instance::{InstanceId, InstanceState, PendingTask, join_rel};
use crate::dataflow::item_path::{IoSlot, ItemKey};
use crate::dataflow::literal::Literal;
use crate::dataflow::run::{FunctionRunInput, RunEnv};

/// Bookkeeping for one propagation pass.
#[derive(Debug, Default)]
pub struct Sweep {
    visited: HashSet<AcpId>,
    /// Instances whose inputs changed.
    pub notify: HashSet<InstanceId>,
}

impl ProjectGraph {
    /// Push the value written at `(instance, slot, path)` to every
    /// connected destination, recursively. Destinations newer than `seq`
    /// keep their value.
    pub(crate) fn propagate_from(
        &mut self,
        instance: InstanceId,
        slot: IoSlot,
        path: &[ItemKey],
        seq: u64,
        sweep: &mut Sweep,
    ) {
        for acp in self.acps.listeners(instance, slot, path) {
            if !sweep.visited.insert(acp) {
                continue;
            }
            let key = self.acps.key(acp).clone();
            let literal = self.instances[key.instance.0]
                .value(key.slot)
                .get(&key.path)
                .map(|v| v.to_literal())
                .unwrap_or(Literal::Null);
            let dests = self.acps.direct_dests(acp).to_vec();
            for dst in dests {
                let dst_key = self.acps.key(dst).clone();
                let tree = self.instances[dst_key.instance.0].value_mut(dst_key.slot);
                match tree.write_at(&dst_key.path, literal.clone(), seq, &self.files) {
                    Ok(true) => {
                        trace!(project = %self.project(), to = %self.instances[dst_key.instance.0].path, slot = dst_key.slot.as_str(), seq, "value propagated");
                        if dst_key.slot.is_input() {
                            sweep.notify.insert(dst_key.instance);
                        }
                        self.propagate_from(dst_key.instance, dst_key.slot, &dst_key.path, seq, sweep);
                    }
                    Ok(false) => {}
                    Err(e) => warn!(project = %self.project(), error = %e, "propagation failed"),
                }
            }
        }
    }

    /// Give every notified instance a chance to start a task, in canonical
    /// path order.
    pub(crate) fn notify(&mut self, sweep: Sweep) -> Vec<TaskSeed> {
        let mut ids: Vec<InstanceId> = sweep.notify.into_iter().collect();
        ids.sort_by(|a, b| self.instances[a.0].path.cmp(&self.instances[b.0].path));
        ids.into_iter()
            .filter_map(|id| self.handle_new_input(id))
            .collect()
    }

    /// Start a task for `id` if it is runnable.
    pub fn handle_new_input(&mut self, id: InstanceId) -> Option<TaskSeed> {
        let inst = &self.instances[id.0];
        if !matches!(inst.state, InstanceState::Active | InstanceState::Warning) {
            return None;
        }
        if !inst.can_run() {
            return None;
        }
        Some(self.gen_task(id))
    }

    fn gen_task(&mut self, id: InstanceId) -> TaskSeed {
        let seq = self.next_seq();
        let base = self.base_dir().to_path_buf();
        let fs = std::sync::Arc::clone(self.fs());

        let inst = &mut self.instances[id.0];
        inst.run_counter += 1;
        let run_dir = join_rel(&inst.dir(), &format!("run_{:03}", inst.run_counter));
        let flags = inst.function.flags();
        let external = matches!(inst.function.controller(), Controller::External { .. });

        let mut env = RunEnv {
            output_dir: None,
            persistent_dir: None,
            base_dir: base.display().to_string(),
        };
        if flags.needs_output_dir || external {
            let dir = base.join(&run_dir);
            if let Err(e) = fs.create_dir_all(&dir) {
                warn!(instance = %inst.path, error = %e, "could not create output dir");
            }
            env.output_dir = Some(dir.display().to_string());
        }
        if flags.needs_persistent_dir {
            let dir = base.join(inst.persistent_dir());
            if let Err(e) = fs.create_dir_all(&dir) {
                warn!(instance = %inst.path, error = %e, "could not create persistent dir");
            }
            env.persistent_dir = Some(dir.display().to_string());
        }

        let mut pins = Vec::new();
        let mut input = FunctionRunInput::new(env, inst.inputs.snapshot(&mut pins));
        input.subnet_inputs = inst.sub_inputs.snapshot(&mut pins);
        if flags.reads_current_outputs {
            input.outputs = Some(inst.outputs.snapshot(&mut pins));
            input.subnet_outputs = Some(inst.sub_outputs.snapshot(&mut pins));
        }
        inst.inputs.clear_updated();
        inst.sub_inputs.clear_updated();
        inst.rerun_requested = false;
        inst.state = InstanceState::Running;
        inst.tasks_started += 1;
        inst.pending = Some(PendingTask {
            seq_nr: seq,
            priority: inst.priority,
            input,
            pins,
            commands: Vec::new(),
            finished: Default::default(),
            in_flight: true,
            run_dir,
        });
        debug!(instance = %inst.path, seq, "task generated");
        TaskSeed {
            instance: id,
            seq_nr: seq,
        }
    }
}
