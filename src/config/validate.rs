// src/config/validate.rs

use crate::config::model::{RawServerConfig, ServerConfig};
use crate::errors::{CpcError, Result};

impl TryFrom<RawServerConfig> for ServerConfig {
    type Error = CpcError;

    fn try_from(raw: RawServerConfig) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ServerConfig::new_unchecked(raw))
    }
}

pub(crate) fn validate_raw_config(cfg: &RawServerConfig) -> Result<()> {
    validate_server_section(cfg)?;
    validate_heartbeat_section(cfg)?;
    Ok(())
}

fn validate_server_section(cfg: &RawServerConfig) -> Result<()> {
    if cfg.server.server_name.trim().is_empty() {
        return Err(CpcError::Config(
            "[server].server_name must not be empty".to_string(),
        ));
    }
    if cfg.server.projects_dir.as_os_str().is_empty() {
        return Err(CpcError::Config(
            "[server].projects_dir must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_heartbeat_section(cfg: &RawServerConfig) -> Result<()> {
    if cfg.heartbeat.heartbeat_time_secs == 0 {
        return Err(CpcError::Config(
            "[heartbeat].heartbeat_time_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.heartbeat.timeout_factor == 0 {
        return Err(CpcError::Config(
            "[heartbeat].timeout_factor must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_heartbeat_time() {
        let mut raw = RawServerConfig::default();
        raw.heartbeat.heartbeat_time_secs = 0;
        match ServerConfig::try_from(raw) {
            Err(CpcError::Config(msg)) => assert!(msg.contains("heartbeat_time_secs")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_blank_server_name() {
        let mut raw = RawServerConfig::default();
        raw.server.server_name = "  ".to_string();
        assert!(ServerConfig::try_from(raw).is_err());
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = ServerConfig::try_from(RawServerConfig::default()).unwrap();
        assert_eq!(cfg.heartbeat_timeout().as_secs(), 240);
        assert!(cfg.exec_threads() >= 1);
    }
}
