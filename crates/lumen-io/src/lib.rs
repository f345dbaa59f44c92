//! Audio capture and DMX sink backends: the concrete implementations of
//! the two external contracts spec.md describes only at their interface
//! (§1) — a blocking mono int16 audio reader, and a `set_channel`/`render`
//! DMX sink.

mod capture;
mod dmx;
mod error;

pub use capture::{
    AudioCapture, AudioDevice, CpalCapture, DeviceSpec, MockCapture, find_device_by_index,
    find_device_fuzzy, list_input_devices,
};
pub use dmx::{DeviceLocator, NullLocator, SinkDevice, VirtualSinkDevice};
#[cfg(feature = "serial")]
pub use dmx::SerialDmxDevice;
pub use error::{IoError, Result};
