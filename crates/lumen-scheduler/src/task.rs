//! Task lifecycle traits, grounded in `lib/task.py`'s `Task`/`TaskManager`.

use lumen_core::Blackboard;

use crate::error::TaskError;

/// A unit of per-frame work. The scheduler walks a fixed ordered list of
/// tasks once per frame and calls `run` on each in turn, on its own thread;
/// `run` must not block beyond what the frame cadence allows.
pub trait Task: Send {
    fn name(&self) -> &str;

    /// Called once, on the scheduler's thread, before the task's first
    /// `run`. The default does nothing, matching tasks that need no setup.
    fn setup(&mut self) -> Result<(), TaskError> {
        Ok(())
    }

    fn run(&mut self, blackboard: &mut Blackboard) -> Result<(), TaskError>;

    /// Called once, on the scheduler's thread, during shutdown (in reverse
    /// registration order) or just before a failed threaded task is
    /// replaced.
    fn teardown(&mut self) {}
}

/// A task that also owns a background thread doing blocking work (network
/// I/O, audio capture) outside the frame cadence. `run` only forwards data
/// into the thread or reads what it last produced — it must never block.
///
/// When the background thread dies, `has_failed` starts returning `true`;
/// the scheduler tears the task down and asks it to build a replacement
/// from the same construction arguments, the way `TaskManager.check_tasks`
/// reconstructs a `Task` from its stored `_orig_args`.
pub trait ThreadedTask: Task {
    fn setup_inthread(&mut self) -> Result<(), TaskError> {
        Ok(())
    }

    fn teardown_inthread(&mut self) {}

    fn has_failed(&self) -> bool;

    /// Build a fresh, not-yet-set-up instance with the same construction
    /// arguments as this one.
    fn restart(&self) -> Box<dyn ThreadedTask>;
}
