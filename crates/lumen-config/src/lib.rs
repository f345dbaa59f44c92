//! YAML configuration loading: parses the hierarchical config file (spec.md
//! §6) into `RawConfig`, then resolves it into the engine-ready types the
//! scheduler tasks consume.

mod build;
mod error;
mod raw;

use std::path::Path;

pub use build::{CaptureConfig, Config, NetworkConfig};
pub use error::ConfigError;
pub use raw::RawConfig;

/// Read and fully resolve a configuration file from disk.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: RawConfig = serde_yaml::from_str(&text)?;
    build::build(raw)
}
