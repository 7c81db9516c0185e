// src/exec/mod.rs

//! Task execution layer.
//!
//! - [`controller`] dispatches on the controller variant of a function.
//! - [`external`] runs plugin executables with `tokio::process`.
//! - [`pool`] owns the fixed set of executors draining the task queue.

pub mod controller;
pub mod external;
pub mod pool;

pub use controller::{ControllerError, run_controller};
pub use pool::{ExecPool, execute};
