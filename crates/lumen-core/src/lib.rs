//! Fixture model and light/effect engine.
//!
//! `fixture` holds per-light state and the DMX channel mapping; `engine`
//! owns exclusivity, in-flight effects, and the per-frame reconciliation
//! that turns queued writes into a DMX frame. `blackboard` is the typed,
//! per-frame data structure the scheduler threads through every task.

mod blackboard;
mod engine;
mod error;
mod fixture;

pub use blackboard::Blackboard;
pub use engine::{Effect, EffectId, LightEngine};
pub use error::EngineError;
pub use fixture::{ChoiceMap, ConditionalMap, DmxSink, FunctionDescriptor, FunctionKind, Light, ResetRule, StateValue, send_batch};
