// src/plan/mod.rs

//! Plan loading and validation for plandag.
//!
//! Responsibilities:
//! - Define the serde-backed data model (`model.rs`).
//! - Load a plan document from disk, JSON or TOML (`loader.rs`).
//! - Validate ids and dependency references (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, parse_str};
pub use model::{Plan, RawPlanFile, SchedulerSection, Task, TaskId};
