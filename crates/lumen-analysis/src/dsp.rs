//! Exponential smoothing and Mel filterbank construction shared by the
//! audio processors.

/// Simple exponential smoothing filter with independent rise/decay rates.
///
/// Used both as a scalar (length-1) filter for gain normalization and as a
/// per-bin vector filter for spectrum smoothing.
#[derive(Debug, Clone)]
pub struct ExpFilter {
    alpha_decay: f32,
    alpha_rise: f32,
    value: Vec<f32>,
}

impl ExpFilter {
    pub fn new(initial: f32, len: usize, alpha_decay: f32, alpha_rise: f32) -> Self {
        assert!(alpha_decay > 0.0 && alpha_decay < 1.0, "invalid decay smoothing factor");
        assert!(alpha_rise > 0.0 && alpha_rise < 1.0, "invalid rise smoothing factor");
        Self {
            alpha_decay,
            alpha_rise,
            value: vec![initial; len.max(1)],
        }
    }

    pub fn value(&self) -> &[f32] {
        &self.value
    }

    pub fn scalar(&self) -> f32 {
        self.value[0]
    }

    /// Elementwise update: values rising toward `new` use `alpha_rise`,
    /// values falling use `alpha_decay`.
    pub fn update(&mut self, new: &[f32]) -> &[f32] {
        for (v, &n) in self.value.iter_mut().zip(new) {
            let alpha = if n > *v { self.alpha_rise } else { self.alpha_decay };
            *v = alpha * n + (1.0 - alpha) * *v;
        }
        &self.value
    }

    pub fn update_scalar(&mut self, new: f32) -> f32 {
        self.update(&[new]);
        self.value[0]
    }
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Build a triangular Mel filterbank of shape `mel_bins x num_fft_bands`,
/// spanning `[min_freq, max_freq]` at `sample_rate`.
pub fn mel_filterbank(
    sample_rate: f32,
    mel_bins: usize,
    num_fft_bands: usize,
    min_freq: f32,
    max_freq: f32,
) -> Vec<Vec<f32>> {
    let mel_min = hz_to_mel(min_freq);
    let mel_max = hz_to_mel(max_freq);
    let mel_points: Vec<f32> = (0..=mel_bins + 1)
        .map(|i| mel_min + (mel_max - mel_min) * i as f32 / (mel_bins + 1) as f32)
        .collect();
    let nyquist = sample_rate / 2.0;
    let bin_points: Vec<usize> = mel_points
        .iter()
        .map(|&m| {
            let hz = mel_to_hz(m);
            ((num_fft_bands as f32) * hz / nyquist)
                .floor()
                .clamp(0.0, (num_fft_bands.saturating_sub(1)) as f32) as usize
        })
        .collect();

    let mut filters = vec![vec![0.0f32; num_fft_bands]; mel_bins];
    for m in 1..=mel_bins {
        let f_lo = bin_points[m - 1];
        let f_mid = bin_points[m];
        let f_hi = bin_points[m + 1];
        for k in f_lo..f_mid.min(num_fft_bands) {
            if f_mid > f_lo {
                filters[m - 1][k] = (k - f_lo) as f32 / (f_mid - f_lo) as f32;
            }
        }
        for k in f_mid..f_hi.min(num_fft_bands) {
            if f_hi > f_mid {
                filters[m - 1][k] = (f_hi - k) as f32 / (f_hi - f_mid) as f32;
            }
        }
    }
    filters
}

/// A small 1D Gaussian blur (truncated at 4 sigma, reflect boundary),
/// matching `scipy.ndimage.gaussian_filter1d` for the sigma=1.0 case the
/// smoothing processor uses.
pub fn gaussian_blur1d(data: &[f32], sigma: f32) -> Vec<f32> {
    let radius = (4.0 * sigma).ceil() as isize;
    let mut kernel = Vec::with_capacity((2 * radius + 1) as usize);
    let mut sum = 0.0f32;
    for i in -radius..=radius {
        let w = (-0.5 * (i as f32 / sigma).powi(2)).exp();
        kernel.push(w);
        sum += w;
    }
    for w in &mut kernel {
        *w /= sum;
    }

    let n = data.len() as isize;
    let reflect = |mut i: isize| -> isize {
        if n == 0 {
            return 0;
        }
        while i < 0 || i >= n {
            if i < 0 {
                i = -i - 1;
            } else if i >= n {
                i = 2 * n - i - 1;
            }
        }
        i
    };

    (0..data.len())
        .map(|idx| {
            let mut acc = 0.0f32;
            for (k, &w) in kernel.iter().enumerate() {
                let offset = k as isize - radius;
                acc += w * data[reflect(idx as isize + offset) as usize];
            }
            acc
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn exp_filter_scalar_rise_and_decay() {
        let mut f = ExpFilter::new(0.0, 1, 0.1, 0.5);
        assert_relative_eq!(f.update_scalar(1.0), 0.5);
        assert_relative_eq!(f.update_scalar(1.0), 0.75);
        assert_relative_eq!(f.update_scalar(1.0), 0.875);
        assert_relative_eq!(f.update_scalar(0.0), 0.7875);
    }

    #[test]
    fn mel_filterbank_shape() {
        let fb = mel_filterbank(48000.0, 24, 512, 200.0, 12000.0);
        assert_eq!(fb.len(), 24);
        assert!(fb.iter().all(|row| row.len() == 512));
    }
}
