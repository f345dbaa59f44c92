//! The mapper DSL interpreter: a `when` expression language, the resolved
//! directive/state-effect/link configuration shape, and the per-frame
//! [`Mapper`] that drives a [`lumen_core::LightEngine`] from audio
//! features.

mod error;
mod expr;
mod mapper;
mod program;
mod state_effect;

pub use error::MapperError;
pub use expr::{EvalContext, Predicate, Value};
pub use mapper::Mapper;
pub use program::{
    Aggregate, BinSpec, Directive, EffectArgs, EffectValue, Field, LinkSpec, MappingConfig,
    RangeSpec, ScaleSrc, StateEffectDef, Trigger, ValueSpec, expand_bins, resolve, sort_state_effects,
};
pub use state_effect::{ActiveStateEffect, MAPPER_SENDER};
