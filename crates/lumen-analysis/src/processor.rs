//! Shared interface for the stateful audio processors.

use lumen_core::Blackboard;

/// One stateful transform over the captured audio frame. Processors share
/// nothing with each other; each holds its own filters and writes its
/// declared fields into the blackboard.
///
/// On a missing frame (driver underrun, `raw_audio = None`), implementations
/// must publish their fields as unset and leave internal state untouched so
/// the next successful frame picks up where it left off.
pub trait Processor {
    fn process(&mut self, raw_audio: Option<&[i16]>, blackboard: &mut Blackboard);

    /// Clear internal filter/history state without changing parameters.
    /// Called by the scheduler on capture-device reattach.
    fn reset(&mut self);
}
