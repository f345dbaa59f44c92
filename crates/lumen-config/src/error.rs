//! Errors raised while loading and resolving a configuration file. All of
//! these are fatal at startup (spec.md §7.1) — a config that fails to load
//! must stop the process before the scheduler ever runs.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("light '{0}' has unknown fixture type '{1}'")]
    UnknownFixtureType(String, String),

    #[error("fixture type '{0}' has unsupported RawType '{1}' (only \"dmx\" is supported)")]
    UnknownRawType(String, String),

    #[error("invalid `when` expression in state-effect '{0}' on light '{1}': {2}")]
    InvalidPredicate(String, String, lumen_mapper::MapperError),

    #[error("invalid mapping value on light '{0}': {1}")]
    InvalidMapping(String, String),

    #[error(transparent)]
    Engine(#[from] lumen_core::EngineError),
}
