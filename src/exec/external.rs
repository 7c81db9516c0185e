// src/exec/external.rs

//! External plugin controllers.
//!
//! The plugin is started with the task's output directory as working
//! directory, receives the `FunctionRunInput` as JSON on stdin and must print
//! a `FunctionRunOutput` as JSON on stdout. Exit status zero with parseable
//! output is success; anything else is a controller failure.

use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::dataflow::run::{FunctionRunInput, FunctionRunOutput};
use crate::exec::controller::ControllerError;

pub async fn run_plugin(
    executable: &Path,
    input: &FunctionRunInput,
) -> Result<FunctionRunOutput, ControllerError> {
    let spawn_err = |reason: String| ControllerError::Spawn {
        executable: executable.display().to_string(),
        reason,
    };
    let document = serde_json::to_vec(input).map_err(|e| spawn_err(e.to_string()))?;

    let mut cmd = Command::new(executable);
    if let Some(dir) = &input.env.output_dir {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    info!(plugin = %executable.display(), "starting plugin");
    let mut child = cmd.spawn().map_err(|e| spawn_err(e.to_string()))?;

    // feed stdin from its own task so a chatty plugin can't deadlock us
    let stdin = child.stdin.take();
    let writer = tokio::spawn(async move {
        if let Some(mut stdin) = stdin {
            stdin.write_all(&document).await?;
            stdin.shutdown().await?;
        }
        Ok::<(), std::io::Error>(())
    });

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| ControllerError::Failed(format!("waiting for plugin: {e}")))?;
    match writer.await {
        Ok(Err(e)) => warn!(plugin = %executable.display(), error = %e, "plugin did not read its input"),
        Err(e) => warn!(plugin = %executable.display(), error = %e, "stdin writer failed"),
        Ok(Ok(())) => {}
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !stderr.is_empty() {
        debug!(plugin = %executable.display(), "stderr: {}", stderr);
    }
    if !output.status.success() {
        return Err(ControllerError::ExitStatus {
            code: output.status.code().unwrap_or(-1),
            stderr,
        });
    }

    serde_json::from_slice(&output.stdout).map_err(|e| ControllerError::MalformedOutput(e.to_string()))
}
