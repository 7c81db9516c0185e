// src/server/mod.rs

//! The running server: shared state plus the background loops around it.
//!
//! - [`state`] holds the project list and the process-wide queues.
//! - [`dispatch`] implements the worker-facing operations on that state.

pub mod dispatch;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::exec::ExecPool;
use crate::heartbeat::{HeartbeatMonitor, HeartbeatMonitorConfig};

pub use state::ServerState;

/// Handles to everything [`Server::start`] spawned.
pub struct Server {
    state: Arc<ServerState>,
    pool: ExecPool,
    monitor_stop: Arc<Notify>,
    monitor: JoinHandle<()>,
    saver: Option<JoinHandle<()>>,
}

impl Server {
    /// Spawn the executors, the heartbeat sweeper and, when configured, the
    /// periodic saver. Must be called inside a tokio runtime.
    pub fn start(state: Arc<ServerState>) -> Self {
        let cfg = state.config();
        let pool = ExecPool::start(state.tasks().clone(), cfg.exec_threads());

        let monitor = HeartbeatMonitor::new(
            Arc::clone(state.tracker()),
            state.clone(),
            HeartbeatMonitorConfig::from_server_config(cfg),
        );
        let monitor_stop = monitor.shutdown_handle();
        let monitor = tokio::spawn(async move { monitor.run().await });

        let saver = (cfg.server.save_interval_secs > 0).then(|| {
            let every = Duration::from_secs(cfg.server.save_interval_secs);
            let state = Arc::clone(&state);
            tokio::spawn(async move { save_loop(state, every).await })
        });

        info!(server = %state.server_name(), executors = pool.size(), "server started");
        Self {
            state,
            pool,
            monitor_stop,
            monitor,
            saver,
        }
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Quiesce the executors, stop the sweeper and save every project.
    /// Returns the number of projects that failed to save.
    pub async fn shutdown(self) -> usize {
        info!("server shutting down");
        self.pool.shutdown().await;
        self.monitor_stop.notify_one();
        if let Err(e) = self.monitor.await {
            warn!(error = %e, "heartbeat monitor ended abnormally");
        }
        if let Some(saver) = self.saver {
            saver.abort();
        }
        let failed = self.state.projects().save_all();
        info!(projects = self.state.projects().len(), failed, "server stopped");
        failed
    }
}

async fn save_loop(state: Arc<ServerState>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    // the first tick fires immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let failed = state.projects().save_all();
        if failed > 0 {
            warn!(failed, "periodic save incomplete");
        }
    }
}
