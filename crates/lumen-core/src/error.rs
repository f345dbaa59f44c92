//! Error types for the fixture model and light engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("the light `{0}` is defined more than once")]
    DuplicateLight(String),

    #[error("no such light: {0}")]
    UnknownLight(String),

    #[error("invalid function `{1}` for light `{0}`")]
    UnknownFunction(String, String),

    #[error("a duration is required for effects on {0}/{1}")]
    MissingDuration(String, String),

    #[error("another sender is exclusive for {0}/{1}")]
    Exclusive(String, String),

    #[error("another sender has an active effect for {0}/{1}")]
    EffectConflict(String, String),

    #[error("no DMX devices are configured")]
    NoDevices,

    #[error("the default DMX device is not configured")]
    NoDefaultDevice,
}
