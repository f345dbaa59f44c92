//! Rolling-window Mel FFT spectrum extraction.

use rustfft::{num_complex::Complex, FftPlanner};

use lumen_core::Blackboard;

use crate::dsp::{gaussian_blur1d, mel_filterbank, ExpFilter};
use crate::processor::Processor;

#[derive(Debug, Clone)]
pub struct SmoothingConfig {
    pub sample_rate: u32,
    pub fps: u32,
    pub rolling_history: usize,
    pub fft_bins: usize,
    pub min_freq: f32,
    pub max_freq: f32,
    pub min_volume_threshold: f32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            fps: 30,
            rolling_history: 2,
            fft_bins: 24,
            min_freq: 200.0,
            max_freq: 12_000.0,
            min_volume_threshold: 1e-7,
        }
    }
}

fn hamming_window(len: usize) -> Vec<f32> {
    if len <= 1 {
        return vec![1.0; len];
    }
    (0..len)
        .map(|n| 0.54 - 0.46 * (2.0 * std::f32::consts::PI * n as f32 / (len - 1) as f32).cos())
        .collect()
}

fn next_power_of_two(n: usize) -> usize {
    n.next_power_of_two()
}

/// Rolling window -> Hamming window -> zero-pad -> real FFT magnitude ->
/// Mel filterbank -> gain normalization -> smoothing.
pub struct SmoothingProcessor {
    samples_per_frame: usize,
    flattened_len: usize,
    min_volume_threshold: f32,
    fft_bins: usize,
    window: Vec<f32>,
    mel: Vec<Vec<f32>>,
    y_roll: Vec<Vec<f32>>,
    mel_gain: ExpFilter,
    mel_smoothing: ExpFilter,
    planner: FftPlanner<f32>,
}

impl SmoothingProcessor {
    pub fn new(config: SmoothingConfig) -> Self {
        let samples_per_frame = (config.sample_rate / config.fps) as usize;
        let flattened_len = samples_per_frame * config.rolling_history;
        let window = hamming_window(flattened_len);
        let num_fft_bands = flattened_len / 2;
        let mel = mel_filterbank(
            config.sample_rate as f32,
            config.fft_bins,
            num_fft_bands,
            config.min_freq,
            config.max_freq,
        );
        Self {
            samples_per_frame,
            flattened_len,
            min_volume_threshold: config.min_volume_threshold,
            fft_bins: config.fft_bins,
            window,
            mel,
            y_roll: vec![vec![0.0; samples_per_frame]; config.rolling_history],
            mel_gain: ExpFilter::new(0.1, 1, 0.01, 0.99),
            mel_smoothing: ExpFilter::new(0.1, config.fft_bins, 0.5, 0.99),
            planner: FftPlanner::new(),
        }
    }
}

impl Processor for SmoothingProcessor {
    fn process(&mut self, raw_audio: Option<&[i16]>, blackboard: &mut Blackboard) {
        blackboard.audio = None;
        let Some(raw_audio) = raw_audio else {
            return;
        };

        self.y_roll.rotate_left(1);
        let last = self.y_roll.len() - 1;
        for (dst, &src) in self.y_roll[last].iter_mut().zip(raw_audio) {
            *dst = src as f32 / 32768.0;
        }

        let mut flattened: Vec<f32> = Vec::with_capacity(self.flattened_len);
        for row in &self.y_roll {
            flattened.extend_from_slice(row);
        }

        let vol = flattened.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
        if vol < self.min_volume_threshold {
            blackboard.audio = Some(vec![0.0; self.fft_bins]);
            return;
        }

        for (s, w) in flattened.iter_mut().zip(&self.window) {
            *s *= w;
        }
        let padded_len = next_power_of_two(flattened.len());
        let mut buffer: Vec<Complex<f32>> = flattened
            .iter()
            .map(|&re| Complex::new(re, 0.0))
            .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
            .take(padded_len)
            .collect();
        let fft = self.planner.plan_fft_forward(padded_len);
        fft.process(&mut buffer);

        let half = self.flattened_len / 2;
        let magnitudes: Vec<f32> = buffer.iter().take(half).map(Complex::norm).collect();

        let mut mel = vec![0.0f32; self.fft_bins];
        for (bin, row) in self.mel.iter().enumerate() {
            let mut acc = 0.0f32;
            for (m, w) in magnitudes.iter().zip(row) {
                acc += m * w;
            }
            mel[bin] = acc * acc;
        }

        let blurred = gaussian_blur1d(&mel, 1.0);
        let peak = blurred.iter().cloned().fold(f32::MIN, f32::max);
        let gain = self.mel_gain.update_scalar(peak).max(f32::EPSILON);
        for v in &mut mel {
            *v /= gain;
        }
        let smoothed = self.mel_smoothing.update(&mel).to_vec();
        blackboard.audio = Some(smoothed);
    }

    fn reset(&mut self) {
        for row in &mut self.y_roll {
            row.fill(0.0);
        }
        self.mel_gain = ExpFilter::new(0.1, 1, 0.01, 0.99);
        self.mel_smoothing = ExpFilter::new(0.1, self.fft_bins, 0.5, 0.99);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_publishes_zeroed_bins() {
        let mut proc = SmoothingProcessor::new(SmoothingConfig {
            sample_rate: 8000,
            fps: 50,
            ..Default::default()
        });
        let mut bb = Blackboard::new(0.0);
        let samples = vec![0i16; 160];
        proc.process(Some(&samples), &mut bb);
        assert_eq!(bb.audio, Some(vec![0.0; 24]));
    }

    #[test]
    fn missing_frame_clears_audio_but_preserves_state() {
        let mut proc = SmoothingProcessor::new(SmoothingConfig {
            sample_rate: 8000,
            fps: 50,
            ..Default::default()
        });
        let mut bb = Blackboard::new(0.0);
        proc.process(None, &mut bb);
        assert!(bb.audio.is_none());
    }
}
