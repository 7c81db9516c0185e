// src/lib.rs

pub mod builtin;
pub mod cli;
pub mod command;
pub mod config;
pub mod dataflow;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod heartbeat;
pub mod logging;
pub mod persistence;
pub mod project;
pub mod server;
pub mod types;

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::load_or_default;
use crate::fs::RealFileSystem;
use crate::server::{Server, ServerState};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading (file, `CPC_*` environment, CLI overrides)
/// - the project list, loaded from `projects_dir`
/// - exec pool, heartbeat sweeper and periodic saver
/// - Ctrl-C handling and a saving shutdown
pub async fn run(args: CliArgs) -> Result<()> {
    let mut cfg = load_or_default(&args.config)?;
    if let Some(dir) = &args.projects_dir {
        cfg.server.projects_dir = dir.into();
    }
    if let Some(n) = args.exec_threads {
        cfg.server.exec_threads = n;
    }

    let state = ServerState::new(cfg, Arc::new(RealFileSystem));
    state.load_projects()?;

    if args.dry_run {
        print_dry_run(&state);
        return Ok(());
    }

    let server = Server::start(Arc::clone(&state));
    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received");

    let failed = server.shutdown().await;
    if failed > 0 {
        anyhow::bail!("{failed} project(s) could not be saved");
    }
    Ok(())
}

/// Simple dry-run output: print the effective config and loaded projects.
fn print_dry_run(state: &ServerState) {
    let cfg = state.config();
    println!("cpc-server dry-run");
    println!("  server.server_name = {}", cfg.server.server_name);
    println!("  server.projects_dir = {}", cfg.server.projects_dir.display());
    println!("  server.exec_threads = {}", cfg.exec_threads());
    println!("  server.save_interval_secs = {}", cfg.server.save_interval_secs);
    println!(
        "  heartbeat.time = {}s, timeout = {}s, sweep every {}s, policy = {:?}",
        cfg.heartbeat_time().as_secs(),
        cfg.heartbeat_timeout().as_secs(),
        cfg.sweep_interval().as_secs(),
        cfg.heartbeat.lost_command_policy
    );
    println!("  dispatch.wait_secs = {}", cfg.dispatch.wait_secs);
    println!("  libraries: {:?}", state.registry().library_names());
    println!();

    let projects = state.projects().all();
    println!("projects ({}):", projects.len());
    for project in projects {
        println!("  - {}", project.name());
        let imports = project.imports();
        if !imports.is_empty() {
            println!("      imports: {imports:?}");
        }
        for inst in project.instances() {
            match &inst.error {
                Some(err) => println!("      {} ({}) [{}]: {}", inst.path, inst.function, inst.state, err),
                None => println!("      {} ({}) [{}]", inst.path, inst.function, inst.state),
            }
        }
    }
    println!();
    println!("queued commands: {}", state.queue().size());

    debug!("dry-run complete (no execution)");
}
