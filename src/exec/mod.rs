// src/exec/mod.rs

//! Work performer layer.
//!
//! - [`backend`] defines the `WorkPerformer` trait and the result / error
//!   types every performer speaks.
//! - [`shell`] provides `ShellPerformer`, which runs a task's `cmd` with
//!   `tokio::process::Command`. It is what the CLI uses.

pub mod backend;
pub mod shell;

pub use backend::{
    STATUS_ERROR, STATUS_SUCCESS, WorkError, WorkErrorKind, WorkFuture, WorkPerformer, WorkResult,
};
pub use shell::ShellPerformer;
