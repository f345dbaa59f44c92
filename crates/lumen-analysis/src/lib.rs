//! Stateful audio analysis: rolling-window Mel FFT, onset/beat, pitch, and
//! idle/dead-silence detection. Each processor receives the same mono
//! int16 frame and a shared writable [`lumen_core::Blackboard`]; they share
//! nothing internally.

pub mod beat;
pub mod dsp;
pub mod idle;
pub mod pitch;
pub mod processor;
pub mod smoothing;

pub use beat::{BeatConfig, BeatProcessor};
pub use idle::{IdleConfig, IdleProcessor};
pub use pitch::{PitchConfig, PitchProcessor};
pub use processor::Processor;
pub use smoothing::{SmoothingConfig, SmoothingProcessor};
