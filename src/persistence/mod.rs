// src/persistence/mod.rs

//! Project state on disk.
//!
//! - [`doc`] defines the `_state.json` document.
//! - [`store`] converts between a live project and that document.

pub mod doc;
pub mod store;

pub use doc::{ProjectDoc, STATE_FILE, STATE_VERSION};
pub use store::{load, save, snapshot};
