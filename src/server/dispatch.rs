// src/server/dispatch.rs

//! Worker-facing operations: handing out commands, taking finish reports
//! and heartbeats.

use tracing::{debug, info, warn};

use crate::command::{Command, CommandId, ResourceBudget, Selection, WorkerLocation, WorkerRequest};
use crate::errors::{CpcError, Result};
use crate::heartbeat::{self, Heartbeat};
use crate::server::state::ServerState;

impl ServerState {
    /// Take every queued command this worker can run, highest priority
    /// first, until its cores are used up. Taken commands move to the
    /// running list and are tracked for heartbeats.
    pub fn request_work(&self, req: &WorkerRequest) -> Vec<Command> {
        let mut budget = ResourceBudget::new(&req.platform);
        let taken = self.queue().get_until(|cmd| {
            if budget.cores_exhausted() {
                return Selection::STOP;
            }
            if !budget.fits(cmd) {
                return Selection::SKIP;
            }
            budget.reserve(cmd);
            if budget.cores_exhausted() {
                Selection::TAKE_AND_STOP
            } else {
                Selection::TAKE
            }
        });

        let location = WorkerLocation {
            worker_id: req.worker_id.clone(),
            server_name: req.server_name.clone(),
        };
        let now = heartbeat::now();
        let mut handed = Vec::with_capacity(taken.len());
        for cmd in taken {
            if let Err(e) = self.running().add(cmd.clone(), location.clone()) {
                warn!(cmd_id = %cmd.id, error = %e, "command already running; not handed out");
                continue;
            }
            self.tracker()
                .track(cmd.id.clone(), &req.worker_id, &req.server_name, now);
            handed.push(cmd);
        }
        if !handed.is_empty() {
            info!(worker = %req.worker_id, commands = handed.len(), "commands dispatched");
        }
        handed
    }

    /// Like [`request_work`](Self::request_work), but when nothing is
    /// available wait up to the configured dispatch wait for the queue to
    /// fill, then try once more.
    pub async fn request_work_wait(&self, req: &WorkerRequest) -> Vec<Command> {
        let cmds = self.request_work(req);
        let wait = self.config().dispatch_wait();
        if !cmds.is_empty() || wait.is_zero() {
            return cmds;
        }
        if self.queue().wait_nonempty(wait).await {
            self.request_work(req)
        } else {
            Vec::new()
        }
    }

    /// A worker reports `cmd_id` as done.
    pub fn finish_command(
        &self,
        worker_id: &str,
        cmd_id: &CommandId,
        return_code: i32,
        cpu_time: f64,
    ) -> Result<()> {
        let current = self.running().get(cmd_id)?;
        let owner = current
            .worker
            .as_ref()
            .map(|w| w.worker_id.as_str())
            .unwrap_or_default();
        if owner != worker_id {
            return Err(CpcError::WrongWorker {
                cmd_id: cmd_id.to_string(),
                owner: owner.to_string(),
                reporter: worker_id.to_string(),
            });
        }
        let mut cmd = self.running().remove(cmd_id)?;
        self.tracker().forget(cmd_id);
        cmd.return_code = Some(return_code);
        cmd.cpu_time = cpu_time;
        cmd.worker = None;
        debug!(cmd_id = %cmd_id, worker = %worker_id, return_code, "command finished");

        let project = cmd
            .project()
            .ok_or_else(|| CpcError::CommandNotFound(format!("{cmd_id} has no project")))?;
        self.projects().get(project)?.command_finished(cmd);
        Ok(())
    }

    /// Ingest a heartbeat. Items for commands that are not running on the
    /// reporting worker are ignored. On a shutdown heartbeat the worker's
    /// commands go back on the queue with their priority unchanged; returns
    /// how many.
    pub fn heartbeat(&self, hb: &Heartbeat) -> usize {
        let (owned, foreign): (Vec<_>, Vec<_>) = hb
            .items
            .iter()
            .cloned()
            .partition(|item| self.running().is_owned_by(&item.cmd_id, &hb.worker_id));
        for item in &foreign {
            warn!(worker = %hb.worker_id, cmd_id = %item.cmd_id, "heartbeat for a command this worker does not run");
        }
        let hb = Heartbeat {
            items: owned,
            ..hb.clone()
        };

        let released = self.tracker().ingest(&hb, heartbeat::now());
        let mut requeued = 0;
        for id in released {
            let Some(mut cmd) = self.running().remove_owned(&id, &hb.worker_id) else {
                continue;
            };
            cmd.worker = None;
            self.queue().add(cmd);
            requeued += 1;
        }
        if requeued > 0 {
            info!(worker = %hb.worker_id, requeued, "worker shut down; commands requeued");
        }
        requeued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::resource::CORES;
    use crate::command::{CommandOwner, Platform};
    use crate::config::ServerConfig;
    use crate::fs::mock::MockFileSystem;
    use crate::heartbeat::HeartbeatItem;
    use std::sync::Arc;

    fn state() -> Arc<ServerState> {
        ServerState::new(ServerConfig::default(), Arc::new(MockFileSystem::new()))
    }

    fn owned(exe: &str, cores: i64, priority: i32) -> Command {
        Command::new(exe)
            .with_min_required(CORES, cores)
            .with_owner(CommandOwner {
                project: "p".into(),
                instance_path: "a".into(),
                task_seq: 1,
                task_priority: priority,
            })
    }

    fn request(worker: &str, cores: i64) -> WorkerRequest {
        WorkerRequest {
            worker_id: worker.into(),
            server_name: "localhost".into(),
            platform: Platform::new("smp")
                .with_resource(CORES, cores)
                .with_executable("mdrun", "4.6".parse().unwrap()),
        }
    }

    #[test]
    fn dispatch_fills_the_worker_in_priority_order() {
        let st = state();
        let low = st.queue().add(owned("mdrun", 2, 0));
        let high = st.queue().add(owned("mdrun", 2, 5));
        let other = st.queue().add(owned("grompp", 1, 9));

        let got = st.request_work(&request("w1", 2));
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, high);
        assert_eq!(got[0].reserved.get(CORES), Some(2));
        assert!(st.running().contains(&high));
        assert!(st.tracker().get(&high).is_some());
        assert!(st.queue().exists(&low));
        assert!(st.queue().exists(&other), "no worker offers grompp");
    }

    #[test]
    fn finish_from_the_wrong_worker_is_refused() {
        let st = state();
        let id = st.queue().add(owned("mdrun", 1, 0));
        st.request_work(&request("w1", 4));
        let err = st.finish_command("w2", &id, 0, 1.0).unwrap_err();
        assert!(matches!(err, CpcError::WrongWorker { .. }));
        assert!(st.running().contains(&id));
    }

    #[test]
    fn shutdown_heartbeat_requeues_with_priority_kept() {
        let st = state();
        let id = st.queue().add(owned("mdrun", 1, 3).with_priority_modifier(1));
        st.request_work(&request("w1", 4));
        assert!(st.queue().is_empty());

        let n = st.heartbeat(&Heartbeat {
            worker_id: "w1".into(),
            server_name: "localhost".into(),
            items: vec![HeartbeatItem {
                cmd_id: id.clone(),
                run_dir: None,
            }],
            shutdown: true,
            interval_secs: None,
        });
        assert_eq!(n, 1);
        let queued = st.queue().list();
        assert_eq!(queued[0].id, id);
        assert_eq!(queued[0].full_priority(), 4);
        assert!(!st.running().contains(&id));
        assert!(st.tracker().get(&id).is_none());
    }

    fn bye(worker: &str, ids: &[&CommandId]) -> Heartbeat {
        Heartbeat {
            worker_id: worker.into(),
            server_name: "localhost".into(),
            items: ids
                .iter()
                .map(|id| HeartbeatItem {
                    cmd_id: (*id).clone(),
                    run_dir: None,
                })
                .collect(),
            shutdown: true,
            interval_secs: None,
        }
    }

    #[test]
    fn shutdown_heartbeat_cannot_release_another_workers_command() {
        let st = state();
        let id = st.queue().add(owned("mdrun", 1, 0));
        st.request_work(&request("w1", 4));

        assert_eq!(st.heartbeat(&bye("w2", &[&id])), 0);
        let running = st.running().get(&id).unwrap();
        assert_eq!(running.worker.map(|w| w.worker_id), Some("w1".to_string()));
        assert!(st.queue().is_empty());
        assert_eq!(st.tracker().get(&id).map(|e| e.worker_id), Some("w1".to_string()));
    }

    #[test]
    fn heartbeat_from_a_stranger_does_not_move_the_timing() {
        let st = state();
        let id = st.queue().add(owned("mdrun", 1, 0));
        st.request_work(&request("w1", 4));
        let before = st.tracker().get(&id).unwrap();

        let mut hb = bye("w2", &[&id, &CommandId::from("unknown")]);
        hb.shutdown = false;
        st.heartbeat(&hb);

        assert_eq!(st.tracker().get(&id), Some(before));
        assert!(st.tracker().get(&CommandId::from("unknown")).is_none());
        assert!(st.tracker().worker_commands("w2").is_empty());
    }

    #[tokio::test]
    async fn waiting_dispatch_returns_empty_after_the_wait() {
        let mut cfg = ServerConfig::default();
        cfg.dispatch.wait_secs = 1;
        let st = ServerState::new(cfg, Arc::new(MockFileSystem::new()));
        tokio::time::pause();
        let got = st.request_work_wait(&request("w1", 4)).await;
        assert!(got.is_empty());
    }
}
