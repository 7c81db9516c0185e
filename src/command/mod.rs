// src/command/mod.rs

//! Commands: units of external work emitted by controllers and pulled by
//! workers.
//!
//! - [`command`] defines the command record and its id.
//! - [`queue`] is the priority-bucketed queue workers pull from.
//! - [`running`] indexes commands currently claimed by a worker.
//! - [`platform`] describes what a worker offers and matches commands to it.

#[allow(clippy::module_inception)]
pub mod command;
pub mod platform;
pub mod queue;
pub mod resource;
pub mod running;
pub mod version;

pub use command::{Command, CommandId, CommandOwner, WorkerLocation};
pub use platform::{Platform, ResourceBudget, WorkerRequest};
pub use queue::{CmdQueue, Selection};
pub use resource::ResourceMap;
pub use running::RunningCmdList;
pub use version::Version;
