//! Signal conditioning: DC baseline tracking plus a three-stage filter
//! cascade over the pulsatile component.
//!
//! The baseline uses dual-rate exponential smoothing so it follows slow
//! drift without tracking the pulse itself. The AC cascade is
//! median (impulse rejection) -> adaptive low-pass -> triangular smoothing.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::types::{ConditionedSample, Sample};

const EPSILON: f32 = 1e-6;

/// Low-pass strategy for the middle cascade stage.
///
/// Both are canonical-default parameterizations of historically divergent
/// variants; `VarianceEma` is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Smoothing {
    /// EMA whose coefficient tightens as short-term jitter grows.
    VarianceEma,
    /// Scalar Kalman filter with noise adapted from recent variance and trend.
    Kalman,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionerConfig {
    /// Baseline blend rate when the sample deviates past the margin.
    pub fast_alpha: f32,
    /// Baseline blend rate for ordinary drift tracking.
    pub slow_alpha: f32,
    /// Deviation margin as a fraction of baseline magnitude.
    pub margin_ratio: f32,
    /// Absolute floor for the deviation margin.
    pub margin_min: f32,
    /// Median filter window (stage a).
    pub median_window: usize,
    pub smoothing: Smoothing,
    /// Jitter estimation window for the adaptive low-pass (stage b).
    pub variance_window: usize,
    /// EMA coefficient bounds for `Smoothing::VarianceEma`.
    pub ema_alpha_min: f32,
    pub ema_alpha_max: f32,
    /// Triangular moving-average window (stage c), odd.
    pub triangular_window: usize,
}

impl Default for ConditionerConfig {
    fn default() -> Self {
        Self {
            fast_alpha: 0.1,
            slow_alpha: 0.005,
            margin_ratio: 0.1,
            margin_min: 0.02,
            median_window: 5,
            smoothing: Smoothing::VarianceEma,
            variance_window: 15,
            ema_alpha_min: 0.3,
            ema_alpha_max: 0.95,
            triangular_window: 5,
        }
    }
}

/// Scalar Kalman state for `Smoothing::Kalman`.
#[derive(Debug, Clone)]
struct KalmanState {
    x: f32,
    p: f32,
    initialized: bool,
}

impl KalmanState {
    fn new() -> Self {
        Self {
            x: 0.0,
            p: 1.0,
            initialized: false,
        }
    }
}

/// DC baseline tracker + AC filter cascade.
pub struct SignalConditioner {
    cfg: ConditionerConfig,
    baseline: Option<f32>,
    median_ring: VecDeque<f32>,
    variance_ring: VecDeque<f32>,
    ema_state: Option<f32>,
    kalman: KalmanState,
    triangular_ring: VecDeque<f32>,
}

impl SignalConditioner {
    pub fn new() -> Self {
        Self::with_config(ConditionerConfig::default())
    }

    pub fn with_config(cfg: ConditionerConfig) -> Self {
        Self {
            cfg,
            baseline: None,
            median_ring: VecDeque::new(),
            variance_ring: VecDeque::new(),
            ema_state: None,
            kalman: KalmanState::new(),
            triangular_ring: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &ConditionerConfig {
        &self.cfg
    }

    /// Restore construction state. The baseline hard-resets only here.
    pub fn reset(&mut self) {
        self.baseline = None;
        self.median_ring.clear();
        self.variance_ring.clear();
        self.ema_state = None;
        self.kalman = KalmanState::new();
        self.triangular_ring.clear();
    }

    /// Run one sample through baseline tracking and the cascade.
    pub fn condition(&mut self, s: Sample) -> ConditionedSample {
        let baseline = self.update_baseline(s.raw);
        let ac = s.raw - baseline;

        let stage_a = self.median_stage(ac);
        let stage_b = match self.cfg.smoothing {
            Smoothing::VarianceEma => self.variance_ema_stage(stage_a),
            Smoothing::Kalman => self.kalman_stage(stage_a),
        };
        let filtered = self.triangular_stage(stage_b);

        ConditionedSample {
            timestamp_us: s.timestamp_us,
            ac,
            dc_baseline: baseline,
            filtered,
        }
    }

    fn update_baseline(&mut self, raw: f32) -> f32 {
        let baseline = match self.baseline {
            Some(b) => {
                let margin = (b.abs() * self.cfg.margin_ratio).max(self.cfg.margin_min);
                let alpha = if (raw - b).abs() > margin {
                    self.cfg.fast_alpha
                } else {
                    self.cfg.slow_alpha
                };
                b + alpha * (raw - b)
            }
            None => raw,
        };
        self.baseline = Some(baseline);
        baseline
    }

    /// Stage a: median over a short window rejects impulse outliers.
    /// Passes through until the window fills.
    fn median_stage(&mut self, value: f32) -> f32 {
        push_bounded(&mut self.median_ring, value, self.cfg.median_window);
        if self.median_ring.len() < self.cfg.median_window {
            return value;
        }
        let mut sorted: Vec<f32> = self.median_ring.iter().copied().collect();
        sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        sorted[sorted.len() / 2]
    }

    /// Stage b (VarianceEma): the smoothing coefficient drops toward
    /// `ema_alpha_min` as sample-to-sample jitter grows relative to the
    /// signal's own variance, so a clean waveform passes nearly unchanged.
    fn variance_ema_stage(&mut self, value: f32) -> f32 {
        push_bounded(&mut self.variance_ring, value, self.cfg.variance_window);
        let alpha = if self.variance_ring.len() < self.cfg.variance_window {
            self.cfg.ema_alpha_max
        } else {
            let var = variance(&self.variance_ring);
            let jitter = diff_variance(&self.variance_ring);
            let ratio = (jitter / (var + EPSILON)).clamp(0.0, 1.0);
            self.cfg.ema_alpha_max - (self.cfg.ema_alpha_max - self.cfg.ema_alpha_min) * ratio
        };
        let out = match self.ema_state {
            Some(prev) => prev + alpha * (value - prev),
            None => value,
        };
        self.ema_state = Some(out);
        out
    }

    /// Stage b (Kalman): process noise widens with local trend, measurement
    /// noise widens with jitter, so the gain adapts to signal conditions.
    fn kalman_stage(&mut self, value: f32) -> f32 {
        push_bounded(&mut self.variance_ring, value, self.cfg.variance_window);
        if !self.kalman.initialized {
            self.kalman.x = value;
            self.kalman.p = 1.0;
            self.kalman.initialized = true;
            return value;
        }

        let jitter = if self.variance_ring.len() >= 3 {
            diff_variance(&self.variance_ring)
        } else {
            EPSILON
        };
        let trend = match (self.variance_ring.len(), self.variance_ring.back()) {
            (n, Some(&last)) if n >= 2 => {
                let prev = self.variance_ring[n - 2];
                (last - prev).abs()
            }
            _ => 0.0,
        };

        // Trend pushes q up (track faster), jitter pushes r up (trust less).
        let q = (1e-4 + trend * 0.5).min(0.1);
        let r = (jitter + EPSILON).min(1.0);

        let p_pred = self.kalman.p + q;
        let k = p_pred / (p_pred + r);
        self.kalman.x += k * (value - self.kalman.x);
        self.kalman.p = (1.0 - k) * p_pred;
        self.kalman.x
    }

    /// Stage c: triangular-weighted moving average for residual smoothing.
    fn triangular_stage(&mut self, value: f32) -> f32 {
        let window = self.cfg.triangular_window;
        push_bounded(&mut self.triangular_ring, value, window);
        if self.triangular_ring.len() < window {
            return value;
        }
        let half = window / 2;
        let mut weighted = 0.0f32;
        let mut total = 0.0f32;
        for (i, &v) in self.triangular_ring.iter().enumerate() {
            let w = (half as f32 + 1.0) - (i as isize - half as isize).unsigned_abs() as f32;
            weighted += v * w;
            total += w;
        }
        weighted / total.max(EPSILON)
    }
}

impl Default for SignalConditioner {
    fn default() -> Self {
        Self::new()
    }
}

fn push_bounded(ring: &mut VecDeque<f32>, value: f32, cap: usize) {
    if ring.len() == cap.max(1) {
        ring.pop_front();
    }
    ring.push_back(value);
}

fn variance(ring: &VecDeque<f32>) -> f32 {
    let n = ring.len();
    if n == 0 {
        return 0.0;
    }
    let mean = ring.iter().sum::<f32>() / n as f32;
    ring.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n as f32
}

/// Variance of successive differences: a jitter proxy that stays small for
/// band-limited waveforms and grows with broadband noise.
fn diff_variance(ring: &VecDeque<f32>) -> f32 {
    let n = ring.len();
    if n < 2 {
        return 0.0;
    }
    let mut diffs = Vec::with_capacity(n - 1);
    let mut prev = None;
    for &v in ring.iter() {
        if let Some(p) = prev {
            diffs.push(v - p);
        }
        prev = Some(v);
    }
    let mean = diffs.iter().sum::<f32>() / diffs.len() as f32;
    diffs.iter().map(|d| (d - mean).powi(2)).sum::<f32>() / diffs.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn synth(conditioner: &mut SignalConditioner, hz: f32, amp: f32, dc: f32, n: usize) -> Vec<ConditionedSample> {
        let fs = 30.0;
        (0..n)
            .map(|i| {
                let t = i as f32 / fs;
                conditioner.condition(Sample {
                    timestamp_us: (t * 1e6) as i64,
                    raw: dc + amp * (2.0 * PI * hz * t).sin(),
                })
            })
            .collect()
    }

    #[test]
    fn baseline_tracks_dc_not_pulse() {
        let mut c = SignalConditioner::new();
        let out = synth(&mut c, 1.25, 0.1, 0.5, 300);
        let last = out.last().unwrap();
        // Baseline should sit near DC, far from the signal extremes
        assert!((last.dc_baseline - 0.5).abs() < 0.06, "baseline drifted: {}", last.dc_baseline);
    }

    #[test]
    fn clean_sinusoid_not_over_smoothed() {
        let mut c = SignalConditioner::new();
        let out = synth(&mut c, 1.25, 0.1, 0.5, 300);
        // Skip warm-up, then compare peak-to-peak of filtered vs ideal AC
        let tail: Vec<f32> = out[120..].iter().map(|s| s.filtered).collect();
        let max = tail.iter().cloned().fold(f32::MIN, f32::max);
        let min = tail.iter().cloned().fold(f32::MAX, f32::min);
        let pp = max - min;
        assert!(pp > 0.16, "over-smoothed: pp={}", pp);
        assert!(pp < 0.24, "gain too high: pp={}", pp);
    }

    #[test]
    fn median_rejects_impulse() {
        let mut c = SignalConditioner::new();
        // Warm up on a flat signal, then inject one impulse
        for i in 0..60 {
            c.condition(Sample { timestamp_us: i * 33_333, raw: 0.5 });
        }
        let spike = c.condition(Sample { timestamp_us: 60 * 33_333, raw: 0.9 });
        assert!(spike.filtered.abs() < 0.05, "impulse leaked: {}", spike.filtered);
    }

    #[test]
    fn kalman_variant_follows_signal() {
        let mut c = SignalConditioner::with_config(ConditionerConfig {
            smoothing: Smoothing::Kalman,
            ..ConditionerConfig::default()
        });
        let out = synth(&mut c, 1.25, 0.1, 0.5, 300);
        let tail: Vec<f32> = out[120..].iter().map(|s| s.filtered).collect();
        let max = tail.iter().cloned().fold(f32::MIN, f32::max);
        let min = tail.iter().cloned().fold(f32::MAX, f32::min);
        assert!(max - min > 0.10, "kalman over-smoothed: pp={}", max - min);
    }

    #[test]
    fn constant_input_yields_zero_ac() {
        let mut c = SignalConditioner::new();
        let mut last = None;
        for i in 0..120 {
            last = Some(c.condition(Sample { timestamp_us: i * 33_333, raw: 0.42 }));
        }
        let last = last.unwrap();
        assert!(last.ac.abs() < 1e-4);
        assert!(last.filtered.abs() < 1e-4);
    }

    #[test]
    fn reset_restores_construction_state() {
        let mut fresh = SignalConditioner::new();
        let mut reused = SignalConditioner::new();
        synth(&mut reused, 1.0, 0.1, 0.6, 100);
        reused.reset();

        let a = synth(&mut fresh, 1.25, 0.1, 0.5, 100);
        let b = synth(&mut reused, 1.25, 0.1, 0.5, 100);
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.filtered, y.filtered);
            assert_eq!(x.dc_baseline, y.dc_baseline);
        }
    }
}
