// src/heartbeat/mod.rs

pub mod monitor;
pub mod tracker;

pub use monitor::{HeartbeatMonitor, HeartbeatMonitorConfig, LostCommandHandler};
pub use tracker::{Heartbeat, HeartbeatItem, HeartbeatTracker, LostCommand};

/// Current instant on the tokio clock, so paused-time tests move it too.
pub fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}
