//! The per-frame shared data structure passed through the task pipeline.
//!
//! Where the source implementation mutates a loose mapping, this models the
//! blackboard as a struct with typed slots. Each field is `None` exactly
//! when the corresponding producer had nothing to publish this frame (an
//! audio driver underrun, an idle processor with no signal, and so on).

use std::collections::HashMap;

/// One frame's worth of inter-task data.
#[derive(Debug, Clone, Default)]
pub struct Blackboard {
    /// Wall-clock time this frame began, in seconds, from a monotonic clock.
    pub now: f64,

    /// Raw mono int16 samples captured this frame, or `None` on underrun.
    pub raw_audio: Option<Vec<i16>>,

    /// Per-Mel-bin normalized energy, published by the smoothing processor.
    pub audio: Option<Vec<f32>>,

    pub is_onset: Option<bool>,
    pub is_beat: Option<bool>,

    /// Estimated pitch in MIDI note units, averaged over recent confident
    /// samples.
    pub pitch: Option<f32>,

    pub idle_for: Option<f64>,
    pub dead_for: Option<f64>,
    pub audio_v_sum: Option<f32>,
    pub audio_v_avg: Option<f32>,

    /// Snapshot of every light's current state, attached after the light
    /// engine's run, for the broker/GUI to publish.
    pub rendered_state: HashMap<String, HashMap<String, i32>>,
}

impl Blackboard {
    pub fn new(now: f64) -> Self {
        Self {
            now,
            ..Default::default()
        }
    }
}
