//! DMX sink backends: the `sink`/`vsink` no-op devices named in spec.md
//! §4.B/§6, plus the `DeviceLocator` seam for resolving a physical USB
//! transport by `VID:PID`.
//!
//! Physical USB enumeration is out of scope (spec.md §1) — `DeviceLocator`
//! is kept only as the documented interface a real transport would
//! implement, grounded in `lib/light/dmx.py::DMXDevice._find_device_file`.

use std::collections::HashMap;

use lumen_core::DmxSink;

use crate::error::{IoError, Result};

/// A no-op sink: `spec.md`'s `"sink"` device. Writes are accepted and
/// discarded without even logging.
pub struct SinkDevice;

impl DmxSink for SinkDevice {
    fn set_channel(&mut self, _chan: u16, _value: u8) {}
    fn render(&mut self) {}
}

/// Logs and discards: `spec.md`'s `"vsink"` device, grounded in
/// `lib/light/dmx.py::_DMXSink`.
#[derive(Default)]
pub struct VirtualSinkDevice {
    name: String,
    data: HashMap<u16, u8>,
}

impl VirtualSinkDevice {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: HashMap::new(),
        }
    }
}

impl DmxSink for VirtualSinkDevice {
    fn set_channel(&mut self, chan: u16, value: u8) {
        self.data.insert(chan, value);
    }

    fn render(&mut self) {
        tracing::debug!(device = %self.name, frame = ?self.data, "DMX OUT (virtual)");
        self.data.clear();
    }
}

/// Resolves a configured DMX device spec (a `VID:PID` string, or an
/// opaque path) to the thing a physical transport would open. A real
/// implementation would enumerate `/sys/bus/usb-serial/devices` (Linux) or
/// `ioreg` (macOS) the way `_find_device_file` does; out of scope here, so
/// `resolve` only validates the spec's shape.
pub trait DeviceLocator {
    fn resolve(&self, spec: &str) -> Result<String>;
}

/// Parses `VID:PID` (`"0403:6001"`) or passes a filesystem path through
/// unchanged, matching `_find_device_file`'s two accepted forms. Never
/// actually touches the filesystem or USB subsystem.
pub struct NullLocator;

impl DeviceLocator for NullLocator {
    fn resolve(&self, spec: &str) -> Result<String> {
        if spec.starts_with('/') {
            return Ok(spec.to_string());
        }
        let Some((vendor, product)) = spec.split_once(':') else {
            return Err(IoError::InvalidDeviceId(spec.to_string()));
        };
        if u16::from_str_radix(vendor, 16).is_err() || u16::from_str_radix(product, 16).is_err() {
            return Err(IoError::InvalidDeviceId(spec.to_string()));
        }
        Ok(spec.to_string())
    }
}

/// A serial-backed DMX sink, behind the `serial` feature. Device discovery
/// (the out-of-scope USB enumeration step) must already have resolved
/// `path` to an actual port name before constructing this.
#[cfg(feature = "serial")]
pub struct SerialDmxDevice {
    port: Box<dyn serialport::SerialPort>,
    data: HashMap<u16, u8>,
}

#[cfg(feature = "serial")]
impl SerialDmxDevice {
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(path, baud_rate).open()?;
        Ok(Self {
            port,
            data: HashMap::new(),
        })
    }
}

#[cfg(feature = "serial")]
impl DmxSink for SerialDmxDevice {
    fn set_channel(&mut self, chan: u16, value: u8) {
        self.data.insert(chan, value);
    }

    fn render(&mut self) {
        if self.data.is_empty() {
            return;
        }
        let max_chan = self.data.keys().copied().max().unwrap_or(0);
        let mut frame = vec![0u8; max_chan as usize + 1];
        for (&chan, &value) in &self.data {
            frame[chan as usize] = value;
        }
        if let Err(err) = std::io::Write::write_all(&mut self.port, &frame) {
            tracing::error!(error = %err, "failed to write DMX frame to serial port");
        }
        self.data.clear();
    }
}
