//! Pitch tracking.
//!
//! Stands in for `aubio`'s `yin` pitch detector (unit `midi`): a YIN-style
//! difference-function pitch estimator over a rolling analysis window,
//! publishing a MIDI note number averaged over the last three confident
//! samples, exactly as the source's 3-sample moving average does.

use std::collections::VecDeque;

use lumen_core::Blackboard;

use crate::processor::Processor;

const WIN_SIZE: usize = 1024;
const CONFIDENCE_THRESHOLD: f32 = 0.15;

#[derive(Debug, Clone)]
pub struct PitchConfig {
    pub sample_rate: u32,
    pub min_freq_hz: f32,
    pub max_freq_hz: f32,
}

impl Default for PitchConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            min_freq_hz: 60.0,
            max_freq_hz: 1_500.0,
        }
    }
}

pub struct PitchProcessor {
    sample_rate: f32,
    min_tau: usize,
    max_tau: usize,
    ring: VecDeque<f32>,
    buffer: VecDeque<f32>,
    buffer_len: usize,
}

impl PitchProcessor {
    pub fn new(config: PitchConfig) -> Self {
        let min_tau = (config.sample_rate as f32 / config.max_freq_hz).max(2.0) as usize;
        let max_tau = ((config.sample_rate as f32 / config.min_freq_hz) as usize).min(WIN_SIZE / 2);
        Self {
            sample_rate: config.sample_rate as f32,
            min_tau,
            max_tau: max_tau.max(min_tau + 1),
            ring: VecDeque::with_capacity(WIN_SIZE),
            buffer: VecDeque::with_capacity(3),
            buffer_len: 3,
        }
    }

    /// YIN cumulative mean normalized difference function; returns
    /// `(period_in_samples, confidence)` for the first dip below the
    /// absolute threshold, refined with parabolic interpolation.
    fn yin(&self) -> Option<(f32, f32)> {
        let samples: Vec<f32> = self.ring.iter().copied().collect();
        let n = samples.len();
        if n < self.max_tau * 2 {
            return None;
        }

        let mut diff = vec![0.0f32; self.max_tau + 1];
        for tau in 1..=self.max_tau {
            let mut sum = 0.0f32;
            for j in 0..(n - self.max_tau) {
                let d = samples[j] - samples[j + tau];
                sum += d * d;
            }
            diff[tau] = sum;
        }

        let mut cmnd = vec![1.0f32; self.max_tau + 1];
        let mut running_sum = 0.0f32;
        for tau in 1..=self.max_tau {
            running_sum += diff[tau];
            cmnd[tau] = diff[tau] * tau as f32 / running_sum.max(f32::EPSILON);
        }

        let mut tau_best = None;
        for tau in self.min_tau..=self.max_tau {
            if cmnd[tau] < CONFIDENCE_THRESHOLD {
                let mut t = tau;
                while t + 1 <= self.max_tau && cmnd[t + 1] < cmnd[t] {
                    t += 1;
                }
                tau_best = Some(t);
                break;
            }
        }
        let tau = tau_best?;

        let refined = if tau > self.min_tau && tau < self.max_tau {
            let (s0, s1, s2) = (cmnd[tau - 1], cmnd[tau], cmnd[tau + 1]);
            let denom = s0 - 2.0 * s1 + s2;
            if denom.abs() > f32::EPSILON {
                tau as f32 + 0.5 * (s0 - s2) / denom
            } else {
                tau as f32
            }
        } else {
            tau as f32
        };

        let confidence = 1.0 - cmnd[tau];
        Some((refined, confidence))
    }
}

fn freq_to_midi(freq_hz: f32) -> f32 {
    69.0 + 12.0 * (freq_hz / 440.0).log2()
}

impl Processor for PitchProcessor {
    fn process(&mut self, raw_audio: Option<&[i16]>, blackboard: &mut Blackboard) {
        blackboard.pitch = None;
        let Some(raw_audio) = raw_audio else {
            return;
        };

        for &s in raw_audio {
            self.ring.push_back(s as f32 / 32768.0);
        }
        while self.ring.len() > WIN_SIZE {
            self.ring.pop_front();
        }

        if let Some((tau, confidence)) = self.yin() {
            if confidence > 0.0 {
                let freq = self.sample_rate / tau;
                self.buffer.push_back(freq_to_midi(freq));
                while self.buffer.len() > self.buffer_len {
                    self.buffer.pop_front();
                }
            }
        }

        if self.buffer.len() == self.buffer_len {
            let avg = self.buffer.iter().sum::<f32>() / self.buffer_len as f32;
            blackboard.pitch = Some(avg);
        }
    }

    fn reset(&mut self) {
        self.ring.clear();
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_frame_publishes_none_and_keeps_buffer() {
        let mut proc = PitchProcessor::new(PitchConfig::default());
        let mut bb = Blackboard::new(0.0);
        proc.process(None, &mut bb);
        assert_eq!(bb.pitch, None);
    }

    #[test]
    fn needs_three_confident_samples_before_publishing() {
        let mut proc = PitchProcessor::new(PitchConfig::default());
        let samples = vec![0i16; 512];
        let mut bb = Blackboard::new(0.0);
        proc.process(Some(&samples), &mut bb);
        assert_eq!(bb.pitch, None);
    }
}
