// src/heartbeat/monitor.rs

//! Background sweeper that declares silent commands lost.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::heartbeat::now;
use crate::heartbeat::tracker::{HeartbeatTracker, LostCommand};

/// Receives commands the sweeper gave up on.
pub trait LostCommandHandler: Send + Sync {
    fn command_lost(&self, lost: LostCommand);
}

#[derive(Debug, Clone)]
pub struct HeartbeatMonitorConfig {
    /// How often to sweep.
    pub poll_interval: Duration,
    /// Interval assumed for workers that did not announce their own.
    pub heartbeat_time: Duration,
    /// A command is lost after this many intervals of silence.
    pub timeout_factor: u32,
}

impl HeartbeatMonitorConfig {
    pub fn from_server_config(cfg: &ServerConfig) -> Self {
        Self {
            poll_interval: cfg.sweep_interval(),
            heartbeat_time: cfg.heartbeat_time(),
            timeout_factor: cfg.heartbeat.timeout_factor,
        }
    }
}

impl Default for HeartbeatMonitorConfig {
    fn default() -> Self {
        Self::from_server_config(&ServerConfig::default())
    }
}

pub struct HeartbeatMonitor {
    tracker: Arc<HeartbeatTracker>,
    handler: Arc<dyn LostCommandHandler>,
    config: HeartbeatMonitorConfig,
    shutdown: Arc<Notify>,
}

impl HeartbeatMonitor {
    pub fn new(
        tracker: Arc<HeartbeatTracker>,
        handler: Arc<dyn LostCommandHandler>,
        config: HeartbeatMonitorConfig,
    ) -> Self {
        Self {
            tracker,
            handler,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Handle used to stop [`run`](Self::run).
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    pub async fn run(&self) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            heartbeat_time_secs = self.config.heartbeat_time.as_secs(),
            timeout_factor = self.config.timeout_factor,
            "heartbeat monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("heartbeat monitor received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.sweep_once();
                }
            }
        }

        info!("heartbeat monitor stopped");
    }

    /// One sweep; returns how many commands were declared lost.
    pub fn sweep_once(&self) -> usize {
        let lost = self
            .tracker
            .sweep(now(), self.config.heartbeat_time, self.config.timeout_factor);
        if lost.is_empty() {
            debug!("no silent commands");
            return 0;
        }
        let count = lost.len();
        for cmd in lost {
            warn!(
                cmd_id = %cmd.cmd_id,
                worker = %cmd.worker_id,
                silent_secs = cmd.silent_for.as_secs(),
                "command lost"
            );
            self.handler.command_lost(cmd);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandId;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<CommandId>>);

    impl LostCommandHandler for Collect {
        fn command_lost(&self, lost: LostCommand) {
            self.0.lock().unwrap().push(lost.cmd_id);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_command_is_reported_after_the_timeout() {
        let tracker = Arc::new(HeartbeatTracker::new());
        let sink = Arc::new(Collect::default());
        let monitor = Arc::new(HeartbeatMonitor::new(
            Arc::clone(&tracker),
            sink.clone(),
            HeartbeatMonitorConfig {
                poll_interval: Duration::from_millis(500),
                heartbeat_time: Duration::from_secs(2),
                timeout_factor: 2,
            },
        ));
        tracker.track(CommandId::from("k"), "w", "localhost", now());

        let shutdown = monitor.shutdown_handle();
        let m = Arc::clone(&monitor);
        let handle = tokio::spawn(async move { m.run().await });

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(sink.0.lock().unwrap().is_empty());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(*sink.0.lock().unwrap(), vec![CommandId::from("k")]);

        shutdown.notify_one();
        handle.await.unwrap();
    }
}
