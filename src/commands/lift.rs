use crate::Result;
use crate::lifting::{self, LiftOptions, LiftedScript};
use std::path::Path;
use tracing::info;

/// Prints the rewritten form of a script.
pub fn execute(script: &Path, options: &LiftOptions) -> Result<LiftedScript> {
    info!("Lifting {}", script.display());
    let lifted = lifting::transform_file(script, options)?;
    print!("{}", lifted.render());
    Ok(lifted)
}
