//! Audio capture: the blocking `read()` contract spec.md §1 assumes of its
//! single audio input source, plus a `cpal`-backed implementation and the
//! fuzzy device-name resolution from `lib/audio/input.py::_get_device_index`.

use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream};
use crossbeam_channel::{Receiver, bounded};

use crate::error::{IoError, Result};

/// One audio device as reported by the backend.
#[derive(Debug, Clone)]
pub struct AudioDevice {
    pub index: usize,
    pub name: String,
}

/// Enumerate input-capable devices in backend order.
pub fn list_input_devices() -> Result<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| IoError::Enumeration(e.to_string()))?;
    Ok(devices
        .enumerate()
        .filter_map(|(index, d)| d.name().ok().map(|name| AudioDevice { index, name }))
        .collect())
}

/// Resolve `Device` by its reported index, matching
/// `_get_device_index`'s first branch (`int(in_device)`).
pub fn find_device_by_index(index: usize) -> Result<AudioDevice> {
    list_input_devices()?
        .into_iter()
        .find(|d| d.index == index)
        .ok_or_else(|| IoError::DeviceNotFound(index.to_string()))
}

/// Resolve `Device` by exact name, then by substring, matching
/// `_get_device_index`'s fallback chain (`device == v`, then `device in v`).
pub fn find_device_fuzzy(name: &str) -> Result<AudioDevice> {
    let devices = list_input_devices()?;
    devices
        .iter()
        .find(|d| d.name == name)
        .or_else(|| devices.iter().find(|d| d.name.contains(name)))
        .cloned()
        .ok_or_else(|| IoError::DeviceNotFound(name.to_string()))
}

/// A configured `Device` value: a numeric index, an exact/substring name,
/// or the system default.
#[derive(Debug, Clone)]
pub enum DeviceSpec {
    Default,
    Index(usize),
    Name(String),
}

impl DeviceSpec {
    /// Parse a config `Device` value the way `_get_device_index` treats its
    /// `in_device` argument: numeric-looking strings are an index, anything
    /// else is a name.
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<usize>() {
            Ok(i) => DeviceSpec::Index(i),
            Err(_) => DeviceSpec::Name(raw.to_string()),
        }
    }
}

fn resolve_device(host: &cpal::Host, spec: &DeviceSpec) -> Result<Device> {
    match spec {
        DeviceSpec::Default => host
            .default_input_device()
            .ok_or_else(|| IoError::DeviceNotFound("<default>".to_string())),
        DeviceSpec::Index(i) => {
            let found = find_device_by_index(*i)?;
            host.input_devices()
                .map_err(|e| IoError::Enumeration(e.to_string()))?
                .nth(found.index)
                .ok_or_else(|| IoError::DeviceNotFound(i.to_string()))
        }
        DeviceSpec::Name(name) => {
            let found = find_device_fuzzy(name)?;
            host.input_devices()
                .map_err(|e| IoError::Enumeration(e.to_string()))?
                .find(|d| d.name().map(|n| n == found.name).unwrap_or(false))
                .ok_or_else(|| IoError::DeviceNotFound(name.clone()))
        }
    }
}

/// One mono int16 frame captured from the audio device, read by the
/// scheduler's audio task once per frame period. Implementations must
/// return `None` rather than block forever on a driver underrun.
pub trait AudioCapture: Send {
    fn read(&mut self) -> Option<Vec<i16>>;
}

/// `cpal`-backed realtime capture. The stream callback pushes converted
/// mono int16 samples into a bounded channel; `read()` blocks up to one
/// frame period waiting for the next buffer, matching the `PyAudioInput`/
/// `AlsaDeviceInput` blocking-read contract.
pub struct CpalCapture {
    _stream: Stream,
    rx: Receiver<Vec<i16>>,
    frame_period: Duration,
    samples_per_frame: usize,
    carry: Vec<i16>,
}

impl CpalCapture {
    pub fn open(spec: &DeviceSpec, sample_rate: u32, fps: u32) -> Result<Self> {
        let host = cpal::default_host();
        let device = resolve_device(&host, spec)?;
        let samples_per_frame = (sample_rate / fps) as usize;

        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        // Bound to a couple of frames' worth so a slow reader drops old
        // audio rather than building unbounded latency.
        let (tx, rx) = bounded::<Vec<i16>>(4);
        let default_config = device
            .default_input_config()
            .map_err(|e| IoError::Stream(e.to_string()))?;
        let sample_format = default_config.sample_format();

        let err_tx = tx.clone();
        let err_fn = move |err: cpal::StreamError| {
            tracing::error!(error = %err, "audio capture stream error");
            drop(&err_tx);
        };

        let stream = match sample_format {
            SampleFormat::I16 => device
                .build_input_stream(
                    &config,
                    move |data: &[i16], _| {
                        let _ = tx.try_send(data.to_vec());
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| IoError::Stream(e.to_string()))?,
            SampleFormat::F32 => device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _| {
                        let converted: Vec<i16> = data
                            .iter()
                            .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                            .collect();
                        let _ = tx.try_send(converted);
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| IoError::Stream(e.to_string()))?,
            other => return Err(IoError::Stream(format!("unsupported sample format {other:?}"))),
        };
        stream.play().map_err(|e| IoError::Stream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            rx,
            frame_period: Duration::from_secs_f64(f64::from(samples_per_frame as u32) / f64::from(sample_rate)),
            samples_per_frame,
            carry: Vec::new(),
        })
    }
}

impl AudioCapture for CpalCapture {
    fn read(&mut self) -> Option<Vec<i16>> {
        while self.carry.len() < self.samples_per_frame {
            match self.rx.recv_timeout(self.frame_period) {
                Ok(chunk) => self.carry.extend(chunk),
                Err(_) => return None,
            }
        }
        let rest = self.carry.split_off(self.samples_per_frame);
        let frame = std::mem::replace(&mut self.carry, rest);
        Some(frame)
    }
}

/// A deterministic capture backend for tests and CI, standing in for
/// `AudioBackend`'s documented "Testing" variant.
pub struct MockCapture {
    frames: std::collections::VecDeque<Vec<i16>>,
}

impl MockCapture {
    pub fn new(frames: Vec<Vec<i16>>) -> Self {
        Self {
            frames: frames.into(),
        }
    }
}

impl AudioCapture for MockCapture {
    fn read(&mut self) -> Option<Vec<i16>> {
        self.frames.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_capture_returns_none_when_exhausted() {
        let mut cap = MockCapture::new(vec![vec![1, 2, 3]]);
        assert_eq!(cap.read(), Some(vec![1, 2, 3]));
        assert_eq!(cap.read(), None);
    }

    #[test]
    fn device_spec_parses_numeric_as_index() {
        assert!(matches!(DeviceSpec::parse("2"), DeviceSpec::Index(2)));
        assert!(matches!(DeviceSpec::parse("USB Mic"), DeviceSpec::Name(_)));
    }
}
