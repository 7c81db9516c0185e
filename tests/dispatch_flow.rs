// tests/dispatch_flow.rs

mod common;

use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::Harness;
use copernicus::command::{Command, WorkerRequest};
use copernicus::dataflow::instance::InstanceState;
use copernicus::dataflow::literal::Literal;
use copernicus::errors::CpcError;
use copernicus::fs::FileSystem;
use copernicus::heartbeat::{Heartbeat, HeartbeatItem, HeartbeatMonitor, HeartbeatMonitorConfig};
use copernicus::server::{Server, ServerState};
use copernicus::types::LostCommandPolicy;
use copernicus_test_utils::builders::{ServerConfigBuilder, WorkerBuilder, heartbeat};
use copernicus_test_utils::{eventually, with_timeout};
use tokio::task::JoinHandle;

type TestResult = Result<(), Box<dyn Error>>;

fn worker(id: &str, cores: i64) -> WorkerRequest {
    WorkerBuilder::new(id).cores(cores).executable("mdrun", "4.6").build()
}

/// `j` of `t:job` with `in.x = 21`, its command queued.
async fn queued_job(h: &Harness) -> Result<(), Box<dyn Error>> {
    h.instances(&["j"], "t:job");
    h.project.set("j:in.x", Literal::Int(21))?;
    with_timeout(h.exec.drain()).await;
    Ok(())
}

fn spawn_monitor(state: &Arc<ServerState>) -> (Arc<tokio::sync::Notify>, JoinHandle<()>) {
    let monitor = HeartbeatMonitor::new(
        Arc::clone(state.tracker()),
        state.clone(),
        HeartbeatMonitorConfig {
            poll_interval: Duration::from_millis(500),
            heartbeat_time: state.config().heartbeat_time(),
            timeout_factor: state.config().heartbeat.timeout_factor,
        },
    );
    let stop = monitor.shutdown_handle();
    (stop, tokio::spawn(async move { monitor.run().await }))
}

#[tokio::test]
async fn finished_command_feeds_the_follow_up_run() -> TestResult {
    let h = Harness::new();
    queued_job(&h).await?;
    assert_eq!(h.project.instance_state("j")?, InstanceState::Running);
    let outstanding = h.project.outstanding_commands("j")?;
    assert_eq!(outstanding.len(), 1);

    let got = h.state.request_work(&worker("w1", 4));
    assert_eq!(got.len(), 1);
    let cmd = &got[0];
    assert_eq!(cmd.id, outstanding[0]);
    assert_eq!(cmd.dir, "j/run_001/cmd_000");
    assert!(h.fs.is_dir(Path::new("/projects/p/j/run_001/cmd_000")));
    assert!(h.state.queue().is_empty());

    h.state.finish_command("w1", &cmd.id, 0, 2.5)?;
    assert!(!h.state.running().contains(&cmd.id));
    assert!(h.state.tracker().get(&cmd.id).is_none());
    with_timeout(h.exec.drain()).await;

    assert_eq!(h.project.value("j:out.y")?.0, Literal::Int(42));
    let j = h.project.instance_info("j")?;
    assert_eq!(j.state, InstanceState::Active);
    assert_eq!(j.cpu_time, 2.5);
    assert!(h.project.outstanding_commands("j")?.is_empty());
    Ok(())
}

#[tokio::test]
async fn failing_command_puts_the_instance_in_error() -> TestResult {
    let h = Harness::new();
    queued_job(&h).await?;
    let got = h.state.request_work(&worker("w1", 1));
    h.state.finish_command("w1", &got[0].id, 3, 0.0)?;
    with_timeout(h.exec.drain()).await;

    let j = h.project.instance_info("j")?;
    assert_eq!(j.state, InstanceState::Error);
    assert!(j.error.unwrap_or_default().contains("mdrun exited"));
    Ok(())
}

#[tokio::test]
async fn cancel_prev_withdraws_queued_and_running_commands() -> TestResult {
    let h = Harness::new();
    h.instances(&["fw"], "t:first_wins");
    h.project.set("fw:in.n", Literal::Int(3))?;
    with_timeout(h.exec.drain()).await;
    let all = h.project.outstanding_commands("fw")?;
    assert_eq!(all.len(), 3);
    assert_eq!(h.state.queue().size(), 3);

    let got = h.state.request_work(&worker("w1", 2));
    assert_eq!(got.len(), 2);
    h.state.finish_command("w1", &got[0].id, 0, 1.0)?;
    with_timeout(h.exec.drain()).await;

    let queued: Vec<_> = h.state.queue().list().into_iter().map(|c| c.id).collect();
    let running: Vec<_> = h.state.running().list().into_iter().map(|c| c.id).collect();
    for id in &all {
        assert!(!queued.contains(id), "{id} still queued");
        assert!(!running.contains(id), "{id} still running");
    }
    assert!(h.state.tracker().is_empty());
    assert_eq!(
        h.project.value("fw:out.winner")?.0,
        Literal::String(got[0].id.to_string())
    );
    assert_eq!(h.project.instance_state("fw")?, InstanceState::Active);

    // the loser's late report is refused
    let late = h.state.finish_command("w1", &got[1].id, 0, 1.0);
    assert!(matches!(late, Err(CpcError::CommandNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn silent_worker_fails_the_instance() -> TestResult {
    let cfg = ServerConfigBuilder::new()
        .projects_dir("/projects")
        .heartbeat_time_secs(2)
        .timeout_factor(2)
        .build();
    let h = Harness::with_config(cfg);
    queued_job(&h).await?;

    tokio::time::pause();
    let got = h.state.request_work(&worker("w1", 1));
    let k = got[0].id.clone();
    let (stop, monitor) = spawn_monitor(&h.state);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(h.state.running().contains(&k));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(matches!(h.state.running().get(&k), Err(CpcError::CommandNotFound(_))));
    assert_eq!(h.project.instance_state("j")?, InstanceState::Error);
    let (msg, _) = h.project.value("j:out.msg.error")?;
    assert!(msg.as_str().unwrap_or_default().contains("worker lost"), "{msg:?}");

    stop.notify_one();
    monitor.await?;
    Ok(())
}

#[tokio::test]
async fn heartbeats_keep_a_command_alive() -> TestResult {
    let cfg = ServerConfigBuilder::new()
        .projects_dir("/projects")
        .heartbeat_time_secs(2)
        .timeout_factor(2)
        .build();
    let h = Harness::with_config(cfg);
    queued_job(&h).await?;

    tokio::time::pause();
    let got = h.state.request_work(&worker("w1", 1));
    let (stop, monitor) = spawn_monitor(&h.state);

    for _ in 0..8 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.state.heartbeat(&heartbeat("w1", &[&got[0]]));
    }
    assert!(h.state.running().contains(&got[0].id));
    assert_eq!(h.project.instance_state("j")?, InstanceState::Running);

    stop.notify_one();
    monitor.await?;
    Ok(())
}

#[tokio::test]
async fn lost_command_is_requeued_and_partial_output_salvaged() -> TestResult {
    let cfg = ServerConfigBuilder::new()
        .projects_dir("/projects")
        .heartbeat_time_secs(2)
        .timeout_factor(2)
        .lost_command_policy(LostCommandPolicy::Requeue)
        .build();
    let h = Harness::with_config(cfg);
    queued_job(&h).await?;

    tokio::time::pause();
    let got = h.state.request_work(&worker("w1", 1));
    let cmd: &Command = &got[0];
    h.fs.add_file("/scratch/w1/run7/traj.xtc", "frames");
    h.state.heartbeat(&Heartbeat {
        worker_id: "w1".into(),
        server_name: "localhost".into(),
        items: vec![HeartbeatItem {
            cmd_id: cmd.id.clone(),
            run_dir: Some("/scratch/w1/run7".into()),
        }],
        shutdown: false,
        interval_secs: None,
    });
    let (stop, monitor) = spawn_monitor(&h.state);
    tokio::time::sleep(Duration::from_secs(5)).await;
    stop.notify_one();
    monitor.await?;

    let salvaged = Path::new("/projects/p").join(&cmd.dir).join("traj.xtc");
    assert_eq!(h.fs.contents(&salvaged), Some(b"frames".to_vec()));
    let queued = h.state.queue().list();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].id, cmd.id);
    assert_eq!(queued[0].priority_modifier, 1);
    assert_eq!(h.project.instance_state("j")?, InstanceState::Running);

    // another worker picks it up and the task completes
    let again = h.state.request_work(&worker("w2", 1));
    h.state.finish_command("w2", &again[0].id, 0, 1.0)?;
    h.exec.drain().await;
    assert_eq!(h.project.value("j:out.y")?.0, Literal::Int(42));
    Ok(())
}

#[tokio::test]
async fn shutdown_heartbeat_hands_commands_to_the_next_worker() -> TestResult {
    let h = Harness::new();
    queued_job(&h).await?;
    let got = h.state.request_work(&worker("w1", 1));
    let mut bye = heartbeat("w1", &[&got[0]]);
    bye.shutdown = true;

    assert_eq!(h.state.heartbeat(&bye), 1);
    assert_eq!(h.state.heartbeat(&bye), 0, "nothing left to release");
    assert!(h.state.running().is_empty());

    let again = h.state.request_work(&worker("w2", 1));
    assert_eq!(again[0].id, got[0].id);
    let running = h.state.running().get(&got[0].id)?;
    assert_eq!(running.worker.map(|w| w.worker_id), Some("w2".to_string()));
    Ok(())
}

#[tokio::test]
async fn shutdown_heartbeat_leaves_other_workers_commands_alone() -> TestResult {
    let h = Harness::new();
    queued_job(&h).await?;
    let got = h.state.request_work(&worker("w1", 1));
    let mut bye = heartbeat("w2", &[&got[0]]);
    bye.shutdown = true;

    assert_eq!(h.state.heartbeat(&bye), 0);
    let running = h.state.running().get(&got[0].id)?;
    assert_eq!(running.worker.map(|w| w.worker_id), Some("w1".to_string()));
    assert!(h.state.queue().is_empty());

    // the owner still finishes it
    h.state.finish_command("w1", &got[0].id, 0, 1.0)?;
    with_timeout(h.exec.drain()).await;
    assert_eq!(h.project.value("j:out.y")?.0, Literal::Int(42));
    Ok(())
}

#[tokio::test]
async fn deleting_a_project_purges_its_commands() -> TestResult {
    let h = Harness::new();
    h.instances(&["fw"], "t:first_wins");
    h.project.set("fw:in.n", Literal::Int(4))?;
    with_timeout(h.exec.drain()).await;
    h.state.request_work(&worker("w1", 1));

    let other = h.state.projects().add("q")?;
    other.import("t")?;
    other.add_instance("j", "t:job")?;
    other.activate("j")?;
    other.set("j:in.x", Literal::Int(1))?;
    with_timeout(h.exec.drain()).await;

    h.state.projects().delete("p")?;
    assert!(h.state.queue().list().iter().all(|c| c.project() != Some("p")));
    assert!(h.state.running().list().iter().all(|c| c.project() != Some("p")));
    assert!(h.state.tracker().is_empty());
    assert_eq!(h.state.queue().size(), 1, "q keeps its command");
    assert!(matches!(h.state.projects().get("p"), Err(CpcError::ProjectNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn deactivating_withdraws_queued_commands() -> TestResult {
    let h = Harness::new();
    h.instances(&["fw"], "t:first_wins");
    h.project.set("fw:in.n", Literal::Int(2))?;
    with_timeout(h.exec.drain()).await;
    assert_eq!(h.state.queue().size(), 2);

    h.project.deactivate("fw")?;
    assert!(h.state.queue().is_empty());
    assert_eq!(h.project.instance_state("fw")?, InstanceState::Held);
    assert!(h.project.outstanding_commands("fw")?.is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn started_server_runs_tasks_and_saves_on_shutdown() -> TestResult {
    let h = Harness::new();
    h.instances(&["a"], "builtin:add");
    let server = Server::start(Arc::clone(&h.state));

    h.project.set("a:in.a", Literal::Float(1.0))?;
    h.project.set("a:in.b", Literal::Float(2.5))?;
    eventually(|| h.project.value("a:out.c").map(|v| v.0).ok() == Some(Literal::Float(3.5))).await;

    assert_eq!(with_timeout(server.shutdown()).await, 0);
    assert!(h.fs.is_file(Path::new("/projects/p/_state.json")));
    Ok(())
}
