//! Idle/dead-silence detection over the smoothed Mel spectrum.

use lumen_core::Blackboard;

use crate::processor::Processor;

#[derive(Debug, Clone, Copy)]
pub struct IdleConfig {
    pub threshold: f32,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self { threshold: 0.1 }
    }
}

pub struct IdleProcessor {
    threshold: f32,
    idle_since: Option<f64>,
    dead_since: Option<f64>,
}

impl IdleProcessor {
    pub fn new(config: IdleConfig) -> Self {
        Self {
            threshold: config.threshold,
            idle_since: None,
            dead_since: None,
        }
    }
}

impl Processor for IdleProcessor {
    fn process(&mut self, _raw_audio: Option<&[i16]>, blackboard: &mut Blackboard) {
        blackboard.idle_for = None;
        blackboard.dead_for = None;
        let Some(audio) = blackboard.audio.as_ref() else {
            return;
        };
        if audio.is_empty() {
            return;
        }

        let v_sum: f32 = audio.iter().sum();
        let v_avg = v_sum / audio.len() as f32;
        blackboard.audio_v_sum = Some(v_sum);
        blackboard.audio_v_avg = Some(v_avg);

        let now = blackboard.now;
        if v_avg < self.threshold {
            let since = *self.idle_since.get_or_insert(now);
            blackboard.idle_for = Some(now - since);
        } else {
            self.idle_since = None;
        }

        if v_sum == 0.0 {
            let since = *self.dead_since.get_or_insert(now);
            blackboard.dead_for = Some(now - since);
        } else {
            self.dead_since = None;
        }
    }

    fn reset(&mut self) {
        self.idle_since = None;
        self.dead_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_idle_since_first_quiet_frame() {
        let mut proc = IdleProcessor::new(IdleConfig::default());
        let mut bb = Blackboard::new(10.0);
        bb.audio = Some(vec![0.01, 0.02]);
        proc.process(None, &mut bb);
        assert_eq!(bb.idle_for, Some(0.0));

        let mut bb2 = Blackboard::new(12.5);
        bb2.audio = Some(vec![0.01, 0.02]);
        proc.process(None, &mut bb2);
        assert_eq!(bb2.idle_for, Some(2.5));
    }

    #[test]
    fn loud_audio_clears_idle() {
        let mut proc = IdleProcessor::new(IdleConfig::default());
        let mut bb = Blackboard::new(0.0);
        bb.audio = Some(vec![0.9, 0.9]);
        proc.process(None, &mut bb);
        assert_eq!(bb.idle_for, None);
    }

    #[test]
    fn missing_audio_publishes_none() {
        let mut proc = IdleProcessor::new(IdleConfig::default());
        let mut bb = Blackboard::new(0.0);
        proc.process(None, &mut bb);
        assert_eq!(bb.idle_for, None);
        assert_eq!(bb.dead_for, None);
    }
}
