pub mod lift;
pub mod plan;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::lifting::LiftOptions;
use std::path::Path;

/// Loads the engine configuration and extends its operation sets with the
/// ones given on the command line.
pub fn load_options(
    config_path: Option<&Path>,
    reactive: &[String],
    component: &[String],
) -> Result<(EngineConfig, LiftOptions)> {
    let config = match config_path {
        Some(path) => EngineConfig::load_path(path)?,
        None => EngineConfig::load()?,
    };

    let mut options = config.lift_options();
    options.reactive_operations.extend(reactive.iter().cloned());
    options.component_operations.extend(component.iter().cloned());
    Ok((config, options))
}
