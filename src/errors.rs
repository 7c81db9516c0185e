// src/errors.rs

//! Crate-wide error type.
//!
//! Controller and transaction failures are contained at the instance level
//! (the instance is put in `error`); only `Persistence` is fatal to a project.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CpcError {
    /// Malformed user input: unknown item path, type mismatch, unknown function.
    #[error("Domain error: {0}")]
    Domain(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Controller error: {0}")]
    Controller(String),

    #[error("Worker lost: {0}")]
    WorkerLost(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Duplicate command: {0}")]
    DuplicateCommand(String),

    #[error("Command {cmd_id} is claimed by worker {owner}, not {reporter}")]
    WrongWorker {
        cmd_id: String,
        owner: String,
        reporter: String,
    },

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Project already exists: {0}")]
    ProjectExists(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CpcError {
    pub fn domain(msg: impl Into<String>) -> Self {
        CpcError::Domain(msg.into())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, CpcError>;
