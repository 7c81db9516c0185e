// src/exec/controller.rs

//! Invoking a function's controller for one task.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::dataflow::function::{Controller, Function};
use crate::dataflow::run::{FunctionRunInput, FunctionRunOutput};
use crate::exec::external::run_plugin;

/// Why a controller produced no usable output. The text becomes the
/// instance's error message.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("controller failed: {0}")]
    Failed(String),

    #[error("plugin exited with status {code}: {stderr}")]
    ExitStatus { code: i32, stderr: String },

    #[error("malformed controller output: {0}")]
    MalformedOutput(String),

    #[error("could not start plugin {executable}: {reason}")]
    Spawn { executable: String, reason: String },
}

/// Run `function`'s controller on `input`.
///
/// In-process controllers run on the blocking pool so a slow or panicking
/// controller never takes an exec worker down with it.
pub async fn run_controller(
    function: &Arc<Function>,
    input: FunctionRunInput,
) -> Result<FunctionRunOutput, ControllerError> {
    debug!(function = %function.full_name(), "running controller");
    match function.controller() {
        Controller::Network(_) => Ok(FunctionRunOutput::new()),
        Controller::Simple(f) => {
            let f = Arc::clone(f);
            let result = tokio::task::spawn_blocking(move || f(&input.input_map()))
                .await
                .map_err(|e| ControllerError::Failed(format!("controller panicked: {e}")))?;
            let values = result.map_err(ControllerError::Failed)?;
            Ok(values
                .into_iter()
                .fold(FunctionRunOutput::new(), |out, (name, value)| out.output(name, value)))
        }
        Controller::Extended(f) => {
            let f = Arc::clone(f);
            tokio::task::spawn_blocking(move || f(&input))
                .await
                .map_err(|e| ControllerError::Failed(format!("controller panicked: {e}")))?
                .map_err(ControllerError::Failed)
        }
        Controller::External { executable } => run_plugin(executable, &input).await,
    }
}
