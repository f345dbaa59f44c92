use thiserror::Error;

/// The error a [`crate::Task`] run/setup step reports. Scheduler-level code
/// only ever logs these; it never needs to branch on task-specific detail.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TaskError(String);

impl TaskError {
    pub fn new(message: impl std::fmt::Display) -> Self {
        Self(message.to_string())
    }
}
