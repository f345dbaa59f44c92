//! Onset and beat detection.
//!
//! The source relies on `aubio`'s `energy` onset detector and `hfc` tempo
//! tracker; there is no maintained `aubio` binding for Rust, so both are
//! reimplemented here in terms of the same underlying spectral technique —
//! a windowed spectral-flux onset detector with an adaptive threshold, and
//! a beat tracker built on the running inter-onset interval.

use std::collections::VecDeque;

use rustfft::{num_complex::Complex, FftPlanner};

use lumen_core::Blackboard;

use crate::processor::Processor;

const WIN_SIZE: usize = 1024;

#[derive(Debug, Clone)]
pub struct BeatConfig {
    pub sample_rate: u32,
    pub fps: u32,
    /// Onset triggers when flux exceeds `mean + sensitivity * stddev` over
    /// the trailing window.
    pub sensitivity: f32,
    /// Minimum time between onsets, suppressing chatter.
    pub min_interval_s: f64,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            fps: 30,
            sensitivity: 1.5,
            min_interval_s: 0.05,
        }
    }
}

pub struct BeatProcessor {
    ring: VecDeque<f32>,
    window: Vec<f32>,
    planner: FftPlanner<f32>,
    prev_magnitudes: Vec<f32>,
    flux_history: VecDeque<f32>,
    sensitivity: f32,
    min_interval_s: f64,
    last_onset_s: Option<f64>,
    recent_intervals: VecDeque<f64>,
    estimated_period_s: Option<f64>,
}

fn hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|n| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * n as f32 / (len - 1).max(1) as f32).cos())
        .collect()
}

impl BeatProcessor {
    pub fn new(config: BeatConfig) -> Self {
        let _ = config.sample_rate; // retained for interface symmetry with other processors
        let _ = config.fps;
        Self {
            ring: VecDeque::with_capacity(WIN_SIZE),
            window: hann_window(WIN_SIZE),
            planner: FftPlanner::new(),
            prev_magnitudes: vec![0.0; WIN_SIZE / 2],
            flux_history: VecDeque::with_capacity(64),
            sensitivity: config.sensitivity,
            min_interval_s: config.min_interval_s,
            last_onset_s: None,
            recent_intervals: VecDeque::with_capacity(8),
            estimated_period_s: None,
        }
    }

    fn spectral_flux(&mut self) -> f32 {
        let mut buf: Vec<Complex<f32>> = self
            .ring
            .iter()
            .zip(&self.window)
            .map(|(&s, &w)| Complex::new(s * w, 0.0))
            .collect();
        buf.resize(WIN_SIZE, Complex::new(0.0, 0.0));
        let fft = self.planner.plan_fft_forward(WIN_SIZE);
        fft.process(&mut buf);

        let half = WIN_SIZE / 2;
        let mut flux = 0.0f32;
        for i in 0..half {
            let mag = buf[i].norm();
            let diff = mag - self.prev_magnitudes[i];
            if diff > 0.0 {
                flux += diff;
            }
            self.prev_magnitudes[i] = mag;
        }
        flux
    }

    fn detect_onset(&mut self, now: f64) -> bool {
        let flux = self.spectral_flux();
        self.flux_history.push_back(flux);
        if self.flux_history.len() > 43 {
            self.flux_history.pop_front();
        }
        let n = self.flux_history.len().max(1) as f32;
        let mean = self.flux_history.iter().sum::<f32>() / n;
        let variance = self.flux_history.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
        let threshold = mean + self.sensitivity * variance.sqrt();

        if flux <= threshold || flux <= f32::EPSILON {
            return false;
        }
        if let Some(last) = self.last_onset_s {
            if now - last < self.min_interval_s {
                return false;
            }
        }
        if let Some(last) = self.last_onset_s {
            let interval = now - last;
            self.recent_intervals.push_back(interval);
            if self.recent_intervals.len() > 8 {
                self.recent_intervals.pop_front();
            }
            let mut sorted: Vec<f64> = self.recent_intervals.iter().copied().collect();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
            self.estimated_period_s = Some(sorted[sorted.len() / 2]);
        }
        self.last_onset_s = Some(now);
        true
    }

    fn is_beat(&self, now: f64, is_onset: bool) -> bool {
        if !is_onset {
            return false;
        }
        let Some(period) = self.estimated_period_s else {
            // Not enough history to estimate tempo yet: treat every early
            // onset as a beat so downstream consumers have something to
            // react to.
            return true;
        };
        let Some(last) = self.last_onset_s else {
            return true;
        };
        // `last_onset_s` was just updated to `now` by `detect_onset`.
        let _ = now;
        let drift = (last - (last / period).round() * period).abs();
        drift < period * 0.15
    }
}

impl Processor for BeatProcessor {
    fn process(&mut self, raw_audio: Option<&[i16]>, blackboard: &mut Blackboard) {
        blackboard.is_onset = None;
        blackboard.is_beat = None;
        let Some(raw_audio) = raw_audio else {
            return;
        };

        for &s in raw_audio {
            self.ring.push_back(s as f32 / 32768.0);
        }
        while self.ring.len() > WIN_SIZE {
            self.ring.pop_front();
        }
        if self.ring.len() < WIN_SIZE {
            blackboard.is_onset = Some(false);
            blackboard.is_beat = Some(false);
            return;
        }

        let is_onset = self.detect_onset(blackboard.now);
        let is_beat = self.is_beat(blackboard.now, is_onset);
        blackboard.is_onset = Some(is_onset);
        blackboard.is_beat = Some(is_beat);
    }

    fn reset(&mut self) {
        self.ring.clear();
        self.prev_magnitudes.fill(0.0);
        self.flux_history.clear();
        self.last_onset_s = None;
        self.recent_intervals.clear();
        self.estimated_period_s = None;
    }
}
