// src/project/mod.rs

//! Projects and the process-wide project list.

#[allow(clippy::module_inception)]
pub mod project;
pub mod list;

pub use list::ProjectList;
pub use project::{InstanceInfo, Project, ProjectContext, ProjectState};
