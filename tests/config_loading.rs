// tests/config_loading.rs
//
// None of these set CPC_* variables; the env override tests live next to
// the override code.

use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use copernicus::config::{load_and_validate, load_from_path, load_or_default};
use copernicus::errors::CpcError;
use copernicus::types::LostCommandPolicy;

type TestResult = Result<(), Box<dyn Error>>;

fn write_config(dir: &tempfile::TempDir, text: &str) -> Result<PathBuf, Box<dyn Error>> {
    let path = dir.path().join("cpc-server.toml");
    std::fs::write(&path, text)?;
    Ok(path)
}

#[test]
fn full_file_drives_every_section() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let path = write_config(
        &tmp,
        r#"
[server]
server_name = "cpc1.example.org"
projects_dir = "/var/lib/cpc/projects"
exec_threads = 3
save_interval_secs = 60

[heartbeat]
heartbeat_time_secs = 30
timeout_factor = 3
min_sweep_interval_secs = 10
lost_command_policy = "requeue"

[dispatch]
wait_secs = 2
"#,
    )?;

    let cfg = load_and_validate(&path)?;
    assert_eq!(cfg.server.server_name, "cpc1.example.org");
    assert_eq!(cfg.server.projects_dir, PathBuf::from("/var/lib/cpc/projects"));
    assert_eq!(cfg.exec_threads(), 3);
    assert_eq!(cfg.server.save_interval_secs, 60);
    assert_eq!(cfg.heartbeat_timeout(), Duration::from_secs(90));
    assert_eq!(cfg.sweep_interval(), Duration::from_secs(15));
    assert_eq!(cfg.heartbeat.lost_command_policy, LostCommandPolicy::Requeue);
    assert_eq!(cfg.dispatch_wait(), Duration::from_secs(2));
    Ok(())
}

#[test]
fn omitted_sections_take_defaults() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let path = write_config(&tmp, "[server]\nserver_name = \"node7\"\n")?;

    let cfg = load_and_validate(&path)?;
    assert_eq!(cfg.server.server_name, "node7");
    assert_eq!(cfg.server.projects_dir, PathBuf::from("projects"));
    assert_eq!(cfg.heartbeat_timeout(), Duration::from_secs(240));
    assert_eq!(cfg.heartbeat.lost_command_policy, LostCommandPolicy::Fail);
    assert_eq!(cfg.dispatch_wait(), Duration::ZERO);
    Ok(())
}

#[test]
fn sweep_interval_is_bounded_by_the_heartbeat_time() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let path = write_config(
        &tmp,
        "[heartbeat]\nheartbeat_time_secs = 4\nmin_sweep_interval_secs = 30\n",
    )?;
    let cfg = load_and_validate(&path)?;
    assert_eq!(cfg.sweep_interval(), Duration::from_secs(4));
    Ok(())
}

#[test]
fn missing_file_falls_back_to_defaults() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let cfg = load_or_default(tmp.path().join("absent.toml"))?;
    assert_eq!(cfg.heartbeat.heartbeat_time_secs, 120);
    assert!(cfg.exec_threads() >= 1);

    assert!(matches!(
        load_and_validate(tmp.path().join("absent.toml")),
        Err(CpcError::Io(_))
    ));
    Ok(())
}

#[test]
fn unknown_keys_are_rejected() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let path = write_config(&tmp, "[heartbeat]\nheartbeat_secs = 10\n")?;
    assert!(matches!(load_from_path(&path), Err(CpcError::Toml(_))));

    let path = write_config(&tmp, "[scheduler]\nthreads = 2\n")?;
    assert!(matches!(load_from_path(&path), Err(CpcError::Toml(_))));
    Ok(())
}

#[test]
fn invalid_values_are_rejected() -> TestResult {
    let tmp = tempfile::tempdir()?;

    let path = write_config(&tmp, "[heartbeat]\ntimeout_factor = 0\n")?;
    match load_and_validate(&path) {
        Err(CpcError::Config(msg)) => assert!(msg.contains("timeout_factor"), "{msg}"),
        other => panic!("expected config error, got {other:?}"),
    }

    let path = write_config(&tmp, "[server]\nprojects_dir = \"\"\n")?;
    assert!(matches!(load_and_validate(&path), Err(CpcError::Config(_))));

    let path = write_config(&tmp, "[heartbeat]\nlost_command_policy = \"retry\"\n")?;
    assert!(matches!(load_from_path(&path), Err(CpcError::Toml(_))));
    Ok(())
}
