// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::dag::deadlock::Deadlock;

#[derive(Error, Debug)]
pub enum PlandagError {
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error(transparent)]
    Deadlock(#[from] Deadlock),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PlandagError {
    /// Whether this error is a fatal deadlock (as opposed to a load/IO error).
    pub fn is_deadlock(&self) -> bool {
        matches!(self, PlandagError::Deadlock(_))
    }
}

pub type Result<T> = std::result::Result<T, PlandagError>;
