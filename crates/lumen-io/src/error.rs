//! Error types for the audio capture and DMX sink backends.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("no such capture device: {0}")]
    DeviceNotFound(String),

    #[error("failed to enumerate audio devices: {0}")]
    Enumeration(String),

    #[error("failed to build input stream: {0}")]
    Stream(String),

    #[error("`{0}` is not a valid VID:PID device id (expected e.g. `0403:6001`)")]
    InvalidDeviceId(String),

    #[cfg(feature = "serial")]
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, IoError>;
