// src/config/mod.rs

pub mod env;
pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_or_default};
pub use model::{DispatchSection, HeartbeatSection, RawServerConfig, ServerConfig, ServerSection};
