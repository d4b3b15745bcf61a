//! Band-limited frequency analysis of the filtered pulse waveform.
//!
//! Cardiac content lives in 0.5-4.0 Hz (30-240 bpm), so a direct DFT is
//! evaluated only at the handful of in-band bins instead of planning a full
//! transform. A 64-point window at 30 Hz touches 7 bins.

use ndarray::Array1;
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::f32::consts::PI;

const EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectralConfig {
    pub sample_rate: f32,
    /// DFT window length in samples.
    pub window_len: usize,
    /// Analysis band in Hz.
    pub min_freq: f32,
    pub max_freq: f32,
    /// Number of peaks reported in `top_peaks`.
    pub top_k: usize,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            sample_rate: 30.0,
            window_len: 64,
            min_freq: 0.5,
            max_freq: 4.0,
            top_k: 3,
        }
    }
}

/// One analyzed frequency bin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpectralBin {
    pub freq_hz: f32,
    pub magnitude: f32,
}

/// Band-limited power spectrum snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spectrum {
    pub bins: Vec<SpectralBin>,
    pub dominant_hz: f32,
    pub snr_db: f32,
    pub top_peaks: Vec<SpectralBin>,
    /// True until a full window has been analyzed; a stale spectrum carries
    /// the previous analysis, never zeros.
    pub stale: bool,
}

impl Spectrum {
    fn empty() -> Self {
        Self {
            bins: Vec::new(),
            dominant_hz: 0.0,
            snr_db: 0.0,
            top_peaks: Vec::new(),
            stale: true,
        }
    }

    /// Peak power divided by the average in-band power, a prominence measure
    /// used by the quality scorer.
    pub fn peak_prominence(&self) -> f32 {
        if self.bins.is_empty() {
            return 0.0;
        }
        let powers: Vec<f32> = self.bins.iter().map(|b| b.magnitude * b.magnitude).collect();
        let peak = powers.iter().cloned().fold(0.0f32, f32::max);
        let mean = powers.iter().sum::<f32>() / powers.len() as f32;
        peak / mean.max(EPSILON)
    }
}

/// Accumulates filtered samples and computes the band-limited spectrum on
/// demand.
pub struct SpectralAnalyzer {
    cfg: SpectralConfig,
    ring: VecDeque<f32>,
    last: Spectrum,
    dirty: bool,
}

impl SpectralAnalyzer {
    pub fn new() -> Self {
        Self::with_config(SpectralConfig::default())
    }

    pub fn with_config(cfg: SpectralConfig) -> Self {
        Self {
            cfg,
            ring: VecDeque::new(),
            last: Spectrum::empty(),
            dirty: false,
        }
    }

    pub fn config(&self) -> &SpectralConfig {
        &self.cfg
    }

    pub fn update(&mut self, filtered: f32) {
        if self.ring.len() == self.cfg.window_len {
            self.ring.pop_front();
        }
        self.ring.push_back(filtered);
        self.dirty = true;
    }

    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    /// Current spectrum. Below a full window the previous result is returned
    /// flagged stale rather than zeroed mid-session.
    pub fn spectrum(&mut self) -> &Spectrum {
        if self.ring.len() < self.cfg.window_len {
            self.last.stale = true;
            return &self.last;
        }
        if self.dirty {
            let window: Array1<f32> = self.ring.iter().copied().collect();
            self.last = self.analyze(&window);
            self.dirty = false;
        }
        &self.last
    }

    pub fn reset(&mut self) {
        self.ring.clear();
        self.last = Spectrum::empty();
        self.dirty = false;
    }

    fn analyze(&self, window: &Array1<f32>) -> Spectrum {
        let n = window.len();
        let fs = self.cfg.sample_rate;
        let bin_res = fs / n as f32;

        let hamming = hamming_window(n);
        let windowed: Vec<f32> = window
            .iter()
            .zip(hamming.iter())
            .map(|(s, w)| s * w)
            .collect();

        let k_min = (self.cfg.min_freq / bin_res).ceil() as usize;
        let k_max = ((self.cfg.max_freq / bin_res).floor() as usize).min(n / 2 - 1);

        let mut bins = Vec::with_capacity(k_max.saturating_sub(k_min) + 1);
        for k in k_min..=k_max {
            let mut acc = Complex32::new(0.0, 0.0);
            for (i, &x) in windowed.iter().enumerate() {
                let angle = -2.0 * PI * (k * i) as f32 / n as f32;
                acc += Complex32::new(x * angle.cos(), x * angle.sin());
            }
            bins.push(SpectralBin {
                freq_hz: k as f32 * bin_res,
                magnitude: acc.norm() / n as f32,
            });
        }

        let (peak_idx, peak_power, mean_nonpeak_power) = band_peak(&bins);
        let snr_db = if peak_power > EPSILON {
            10.0 * (peak_power / mean_nonpeak_power.max(EPSILON)).log10()
        } else {
            0.0
        };

        let dominant_hz = refine_peak_hz(&bins, peak_idx, bin_res);

        let mut top_peaks = bins.clone();
        top_peaks.sort_by(|a, b| {
            b.magnitude
                .partial_cmp(&a.magnitude)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        top_peaks.truncate(self.cfg.top_k);

        Spectrum {
            bins,
            dominant_hz,
            snr_db,
            top_peaks,
            stale: false,
        }
    }
}

impl Default for SpectralAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn hamming_window(size: usize) -> Array1<f32> {
    let mut window = Array1::zeros(size);
    for i in 0..size {
        window[i] = 0.54 - 0.46 * ((2.0 * PI * i as f32) / ((size - 1) as f32)).cos();
    }
    window
}

/// Returns (peak index, peak power, mean power of the remaining bins).
fn band_peak(bins: &[SpectralBin]) -> (usize, f32, f32) {
    let mut peak_idx = 0;
    let mut peak_power = 0.0f32;
    let mut total_power = 0.0f32;
    for (i, bin) in bins.iter().enumerate() {
        let p = bin.magnitude * bin.magnitude;
        total_power += p;
        if p > peak_power {
            peak_power = p;
            peak_idx = i;
        }
    }
    let rest = bins.len().saturating_sub(1).max(1);
    let mean_nonpeak = (total_power - peak_power) / rest as f32;
    (peak_idx, peak_power, mean_nonpeak)
}

/// Parabolic interpolation around the peak bin for sub-bin frequency
/// accuracy. Falls back to the raw bin at the band edges.
fn refine_peak_hz(bins: &[SpectralBin], peak_idx: usize, bin_res: f32) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    let base = bins[peak_idx].freq_hz;
    if peak_idx == 0 || peak_idx + 1 >= bins.len() {
        return base;
    }
    let y_m1 = bins[peak_idx - 1].magnitude.powi(2);
    let y_0 = bins[peak_idx].magnitude.powi(2);
    let y_p1 = bins[peak_idx + 1].magnitude.powi(2);
    let denom = y_m1 - 2.0 * y_0 + y_p1;
    if denom.abs() < 1e-12 {
        return base;
    }
    let delta = 0.5 * (y_m1 - y_p1) / denom;
    if !delta.is_finite() || delta.abs() > 1.0 {
        return base;
    }
    base + delta * bin_res
}
