//! Frame-rate logging, grounded in `lib/fps.py::FPSCounter`.

use std::time::Instant;

pub struct FpsCounter {
    name: String,
    log_interval_s: f64,
    frames: u64,
    last_log: Instant,
}

impl FpsCounter {
    pub fn new(name: impl Into<String>, log_interval_s: f64) -> Self {
        Self {
            name: name.into(),
            log_interval_s,
            frames: 0,
            last_log: Instant::now(),
        }
    }

    /// Count one frame and log the running rate if `log_interval_s` has
    /// elapsed since the last log.
    pub fn update(&mut self) {
        self.frames += 1;
        let elapsed = self.last_log.elapsed().as_secs_f64();
        if elapsed >= self.log_interval_s {
            tracing::info!(name = %self.name, fps = self.frames as f64 / elapsed, "frame rate");
            self.last_log = Instant::now();
            self.frames = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_frames_without_logging_before_the_interval() {
        let mut fps = FpsCounter::new("test", 3600.0);
        for _ in 0..10 {
            fps.update();
        }
        assert_eq!(fps.frames, 10);
    }
}
