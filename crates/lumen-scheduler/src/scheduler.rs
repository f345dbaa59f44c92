//! The fixed-order frame loop: per-task error isolation, threaded-task
//! failure detection and restart, and signal-driven shutdown, grounded in
//! `lib/task.py::TaskManager`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use lumen_core::Blackboard;

use crate::error::TaskError;
use crate::fps::FpsCounter;
use crate::task::{Task, ThreadedTask};

enum Slot {
    Plain(Box<dyn Task>),
    Threaded(Box<dyn ThreadedTask>),
}

impl Slot {
    fn name(&self) -> &str {
        match self {
            Slot::Plain(t) => t.name(),
            Slot::Threaded(t) => t.name(),
        }
    }

    fn run(&mut self, blackboard: &mut Blackboard) -> Result<(), TaskError> {
        match self {
            Slot::Plain(t) => t.run(blackboard),
            Slot::Threaded(t) => t.run(blackboard),
        }
    }

    fn teardown(&mut self) {
        match self {
            Slot::Plain(t) => t.teardown(),
            Slot::Threaded(t) => {
                t.teardown_inthread();
                t.teardown();
            }
        }
    }
}

/// Drives every registered task in lock-step at whatever cadence the
/// blocking tasks (typically audio capture) impose. Never sleeps on its
/// own (spec-equivalent of "the scheduler otherwise never sleeps").
pub struct Scheduler {
    name: String,
    slots: Vec<Slot>,
    stop: Arc<AtomicBool>,
    start: Instant,
    fps: FpsCounter,
}

impl Scheduler {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            fps: FpsCounter::new(name.clone(), 5.0),
            name,
            slots: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
            start: Instant::now(),
        }
    }

    /// A clone of the shared stop flag, for code (e.g. a signal handler
    /// installed elsewhere) that needs to request shutdown itself.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Install a `SIGINT`/`SIGTERM`-style handler that requests shutdown.
    /// Matches the source's "OS interrupt signal sets a shared stop event".
    pub fn install_signal_handler(&self) -> Result<(), ctrlc::Error> {
        let stop = self.stop.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutdown signal received");
            stop.store(true, Ordering::SeqCst);
        })
    }

    /// Register and set up a plain per-frame task. Tasks run in
    /// registration order; setup failure is fatal (the caller should treat
    /// it as a startup error).
    pub fn add_task(&mut self, mut task: Box<dyn Task>) -> Result<(), TaskError> {
        task.setup().inspect_err(|err| {
            tracing::error!(task = task.name(), error = %err, "task setup failed");
        })?;
        tracing::info!(task = task.name(), "task started");
        self.slots.push(Slot::Plain(task));
        Ok(())
    }

    /// Register and set up a threaded task, running both `setup` and
    /// `setup_inthread` before admitting it to the frame loop.
    pub fn add_threaded_task(&mut self, mut task: Box<dyn ThreadedTask>) -> Result<(), TaskError> {
        task.setup().inspect_err(|err| {
            tracing::error!(task = task.name(), error = %err, "task setup failed");
        })?;
        task.setup_inthread().inspect_err(|err| {
            tracing::error!(task = task.name(), error = %err, "task in-thread setup failed");
        })?;
        tracing::info!(task = task.name(), "threaded task started");
        self.slots.push(Slot::Threaded(task));
        Ok(())
    }

    pub fn elapsed_s(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Run frames until the stop flag is set, then tear every task down in
    /// reverse registration order.
    pub fn run_forever(&mut self) {
        tracing::info!(scheduler = %self.name, "starting frame loop");
        while !self.stop.load(Ordering::SeqCst) {
            self.run_frame();
        }
        self.shutdown();
    }

    fn run_frame(&mut self) {
        let mut blackboard = Blackboard::new(self.elapsed_s());
        for slot in &mut self.slots {
            if let Err(err) = slot.run(&mut blackboard) {
                tracing::error!(task = slot.name(), error = %err, "task run failed, skipping this frame");
            }
        }
        self.restart_failed_threaded_tasks();
        self.fps.update();
    }

    fn restart_failed_threaded_tasks(&mut self) {
        for slot in &mut self.slots {
            let Slot::Threaded(task) = slot else { continue };
            if !task.has_failed() {
                continue;
            }
            tracing::warn!(task = task.name(), "threaded task failed, restarting");
            task.teardown_inthread();
            task.teardown();
            let mut fresh = task.restart();
            if let Err(err) = fresh.setup() {
                tracing::error!(task = fresh.name(), error = %err, "failed to restart task");
                continue;
            }
            if let Err(err) = fresh.setup_inthread() {
                tracing::error!(task = fresh.name(), error = %err, "failed to restart task in-thread setup");
                continue;
            }
            *task = fresh;
        }
    }

    fn shutdown(&mut self) {
        tracing::info!(scheduler = %self.name, "shutting down");
        for slot in self.slots.iter_mut().rev() {
            slot.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingTask {
        runs: Arc<AtomicUsize>,
        stop_after: usize,
        stop: Arc<AtomicBool>,
    }

    impl Task for CountingTask {
        fn name(&self) -> &str {
            "counting"
        }

        fn run(&mut self, _blackboard: &mut Blackboard) -> Result<(), TaskError> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.stop_after {
                self.stop.store(true, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[test]
    fn runs_frames_until_stop_flag_is_set() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new("test");
        let stop = scheduler.stop_handle();
        scheduler
            .add_task(Box::new(CountingTask {
                runs: runs.clone(),
                stop_after: 5,
                stop,
            }))
            .unwrap();
        scheduler.run_forever();
        assert_eq!(runs.load(Ordering::SeqCst), 5);
    }

    struct FailingTask;
    impl Task for FailingTask {
        fn name(&self) -> &str {
            "failing"
        }
        fn run(&mut self, _blackboard: &mut Blackboard) -> Result<(), TaskError> {
            Err(TaskError::new("boom"))
        }
    }

    #[test]
    fn a_failing_task_does_not_stop_the_frame_loop() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new("test");
        let stop = scheduler.stop_handle();
        scheduler.add_task(Box::new(FailingTask)).unwrap();
        scheduler
            .add_task(Box::new(CountingTask {
                runs: runs.clone(),
                stop_after: 3,
                stop,
            }))
            .unwrap();
        scheduler.run_forever();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }
}
