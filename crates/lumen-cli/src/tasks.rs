//! The concrete per-frame [`lumen_scheduler::Task`] adapters that wire the
//! rest of the workspace into the scheduler's fixed pipeline order: audio
//! analysis, then the mapper, then the light engine's own reconciliation.
//! `lumen-broker`'s `BrokerTask` is self-contained and registered directly.

use std::sync::Arc;

use parking_lot::Mutex;

use lumen_analysis::{BeatProcessor, IdleProcessor, PitchProcessor, Processor, SmoothingProcessor};
use lumen_core::{Blackboard, LightEngine};
use lumen_io::AudioCapture;
use lumen_mapper::Mapper;
use lumen_scheduler::{Task, TaskError};

/// Shared engine handle: the mapper stage writes into it during its own
/// `run`, and the lights stage reconciles and renders it immediately after,
/// matching spec.md's "mapper calls into the light engine, then lights
/// flushes" ordering within a single frame.
pub type SharedEngine = Arc<Mutex<LightEngine>>;

/// `audio.run(blackboard)`: blocks on the capture device for up to one
/// frame period, then runs every stateful processor in the order the
/// smoothed Mel spectrum and raw samples are needed downstream.
pub struct AudioTask {
    capture: Box<dyn AudioCapture>,
    smoothing: SmoothingProcessor,
    beat: BeatProcessor,
    pitch: PitchProcessor,
    idle: IdleProcessor,
}

impl AudioTask {
    pub fn new(
        capture: Box<dyn AudioCapture>,
        smoothing: SmoothingProcessor,
        beat: BeatProcessor,
        pitch: PitchProcessor,
        idle: IdleProcessor,
    ) -> Self {
        Self {
            capture,
            smoothing,
            beat,
            pitch,
            idle,
        }
    }
}

impl Task for AudioTask {
    fn name(&self) -> &str {
        "audio"
    }

    fn run(&mut self, blackboard: &mut Blackboard) -> Result<(), TaskError> {
        blackboard.raw_audio = self.capture.read();
        let raw = blackboard.raw_audio.as_deref();
        self.smoothing.process(raw, blackboard);
        self.beat.process(raw, blackboard);
        self.pitch.process(raw, blackboard);
        self.idle.process(raw, blackboard);
        Ok(())
    }
}

/// `mapper.run(blackboard)`: the directive/state-effect interpreter,
/// writing through to the shared light engine.
pub struct MapperTask {
    mapper: Mapper,
    engine: SharedEngine,
}

impl MapperTask {
    pub fn new(mapper: Mapper, engine: SharedEngine) -> Self {
        Self { mapper, engine }
    }
}

impl Task for MapperTask {
    fn name(&self) -> &str {
        "mapper"
    }

    fn run(&mut self, blackboard: &mut Blackboard) -> Result<(), TaskError> {
        let mut engine = self.engine.lock();
        self.mapper.run(&mut engine, blackboard);
        Ok(())
    }
}

/// `lights.run(blackboard)`: steps in-flight effects, flushes the queued
/// state writes, and renders DMX.
pub struct LightsTask {
    engine: SharedEngine,
}

impl LightsTask {
    pub fn new(engine: SharedEngine) -> Self {
        Self { engine }
    }
}

impl Task for LightsTask {
    fn name(&self) -> &str {
        "lights"
    }

    fn run(&mut self, blackboard: &mut Blackboard) -> Result<(), TaskError> {
        self.engine.lock().run(blackboard.now, blackboard);
        Ok(())
    }
}
