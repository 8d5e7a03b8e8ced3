// src/plan/loader.rs

use std::fs;
use std::path::Path;

use crate::errors::Result;
use crate::plan::model::{Plan, RawPlanFile};
use crate::types::{DependencyPolicy, PlanFormat};

/// Load a plan document from a given path and return the raw `RawPlanFile`.
///
/// The format is picked from the extension (`.toml` → TOML, anything else →
/// JSON). This only performs deserialization; use [`load_and_validate`] for
/// semantic checks.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawPlanFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    parse_str(&contents, PlanFormat::from_path(path))
}

/// Parse a plan document held in memory.
pub fn parse_str(contents: &str, format: PlanFormat) -> Result<RawPlanFile> {
    let raw = match format {
        PlanFormat::Json => serde_json::from_str(contents)?,
        PlanFormat::Toml => toml::from_str(contents)?,
    };
    Ok(raw)
}

/// Load a plan from path and run validation.
///
/// - Reads JSON or TOML.
/// - Applies defaults (handled by `serde` default functions).
/// - Checks ids, dependencies and the `scheduler` section.
pub fn load_and_validate(path: impl AsRef<Path>, policy: DependencyPolicy) -> Result<Plan> {
    let raw = load_from_path(&path)?;
    Plan::from_raw(raw, policy)
}
