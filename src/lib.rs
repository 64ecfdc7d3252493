//! Capacity expansion and dispatch optimisation for multi-node energy systems.
#![warn(missing_docs)]
use std::path::PathBuf;

pub mod cli;
pub mod finance;
pub mod fuel;
pub mod id;
pub mod input;
pub mod kpi;
pub mod lcoe;
pub mod log;
pub mod model;
pub mod optimisation;
pub mod output;
pub mod results;
pub mod scenario;
pub mod settings;
pub mod solver;
pub mod tech;
pub mod time_index;

#[cfg(test)]
mod fixture;

/// Get the config dir for the program.
///
/// Falls back to the working directory on platforms without a config dir.
pub fn get_enopt_config_dir() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_default();
    path.push("enopt");

    path
}
