// src/config/env.rs

//! Environment overrides applied on top of the TOML file.
//!
//! - `CPC_PROJECTS_DIR`: projects directory
//! - `CPC_SERVER_NAME`: server name
//! - `CPC_EXEC_THREADS`: executor count (0 = CPU count)
//! - `CPC_HEARTBEAT_TIME`: heartbeat interval in seconds

use std::path::PathBuf;

use crate::config::model::RawServerConfig;
use crate::errors::{CpcError, Result};

pub fn apply_env_overrides(raw: &mut RawServerConfig) -> Result<()> {
    if let Ok(dir) = std::env::var("CPC_PROJECTS_DIR") {
        raw.server.projects_dir = PathBuf::from(dir);
    }

    if let Ok(name) = std::env::var("CPC_SERVER_NAME") {
        raw.server.server_name = name;
    }

    if let Ok(n) = std::env::var("CPC_EXEC_THREADS") {
        raw.server.exec_threads = n.trim().parse().map_err(|_| {
            CpcError::Config("invalid value for CPC_EXEC_THREADS: must be a non-negative integer".to_string())
        })?;
    }

    if let Ok(secs) = std::env::var("CPC_HEARTBEAT_TIME") {
        raw.heartbeat.heartbeat_time_secs = secs.trim().parse().map_err(|_| {
            CpcError::Config("invalid value for CPC_HEARTBEAT_TIME: must be a number of seconds".to_string())
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    fn clear_all(guard: &mut EnvGuard) {
        for key in [
            "CPC_PROJECTS_DIR",
            "CPC_SERVER_NAME",
            "CPC_EXEC_THREADS",
            "CPC_HEARTBEAT_TIME",
        ] {
            guard.remove(key);
        }
    }

    #[test]
    fn no_env_leaves_config_untouched() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        clear_all(&mut guard);

        let mut raw = RawServerConfig::default();
        apply_env_overrides(&mut raw).unwrap();

        assert_eq!(raw.server.projects_dir, PathBuf::from("projects"));
        assert_eq!(raw.heartbeat.heartbeat_time_secs, 120);
    }

    #[test]
    fn env_overrides_file_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        clear_all(&mut guard);
        guard.set("CPC_PROJECTS_DIR", "/srv/cpc");
        guard.set("CPC_EXEC_THREADS", "8");
        guard.set("CPC_HEARTBEAT_TIME", "30");
        guard.set("CPC_SERVER_NAME", "node7");

        let mut raw = RawServerConfig::default();
        apply_env_overrides(&mut raw).unwrap();

        assert_eq!(raw.server.projects_dir, PathBuf::from("/srv/cpc"));
        assert_eq!(raw.server.exec_threads, 8);
        assert_eq!(raw.heartbeat.heartbeat_time_secs, 30);
        assert_eq!(raw.server.server_name, "node7");
    }

    #[test]
    fn invalid_exec_threads_is_config_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        clear_all(&mut guard);
        guard.set("CPC_EXEC_THREADS", "-2");

        let mut raw = RawServerConfig::default();
        let err = apply_env_overrides(&mut raw).unwrap_err();
        assert!(matches!(err, CpcError::Config(ref m) if m.contains("CPC_EXEC_THREADS")));
    }

    #[test]
    fn invalid_heartbeat_time_is_config_error() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        clear_all(&mut guard);
        guard.set("CPC_HEARTBEAT_TIME", "soon");

        let mut raw = RawServerConfig::default();
        assert!(apply_env_overrides(&mut raw).is_err());
    }
}
