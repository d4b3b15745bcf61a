//! Multi-factor signal quality scoring.
//!
//! Combines amplitude adequacy, SNR, spectral-peak prominence and RR
//! regularity into a 0-100 score. An optional ML-confidence term can be
//! weighted in, with the weights renormalized.

use serde::{Deserialize, Serialize};

use crate::spectral::Spectrum;
use crate::types::RrHistory;

const EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityWeights {
    pub amplitude: f32,
    pub snr: f32,
    pub periodicity: f32,
    pub stability: f32,
    /// Weight for an externally supplied ML confidence. Zero disables the term.
    pub ml_confidence: f32,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            amplitude: 0.3,
            snr: 0.25,
            periodicity: 0.25,
            stability: 0.2,
            ml_confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Below this many buffered samples the score is zero.
    pub min_samples: usize,
    pub weights: QualityWeights,
    /// Peak-to-peak amplitude floor and target for full credit.
    pub amp_floor: f32,
    pub amp_target: f32,
    /// Logistic SNR mapping: midpoint (dB) and steepness.
    pub snr_mid_db: f32,
    pub snr_k: f32,
    /// Spectral prominence ratio earning full periodicity credit.
    pub prominence_target: f32,
    /// Minimum RR intervals before the stability term contributes.
    pub min_rr_intervals: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_samples: 30,
            weights: QualityWeights::default(),
            amp_floor: 0.005,
            amp_target: 0.05,
            snr_mid_db: 5.0,
            snr_k: 0.6,
            prominence_target: 4.0,
            min_rr_intervals: 3,
        }
    }
}

/// Composite 0-100 score with its named subscores (each 0-1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityScore {
    pub total: f32,
    pub amplitude: f32,
    pub snr: f32,
    pub periodicity: f32,
    pub stability: f32,
    pub sample_count: usize,
}

impl QualityScore {
    pub fn zero(sample_count: usize) -> Self {
        Self {
            total: 0.0,
            amplitude: 0.0,
            snr: 0.0,
            periodicity: 0.0,
            stability: 0.0,
            sample_count,
        }
    }
}

pub struct QualityScorer {
    cfg: QualityConfig,
}

impl QualityScorer {
    pub fn new() -> Self {
        Self::with_config(QualityConfig::default())
    }

    pub fn with_config(cfg: QualityConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.cfg
    }

    /// Score a filtered window against its spectrum and RR history.
    /// `ml_confidence` feeds the optional weighted term when configured.
    pub fn score(
        &self,
        window: &[f32],
        spectrum: &Spectrum,
        rr: &RrHistory,
        ml_confidence: Option<f32>,
    ) -> QualityScore {
        let n = window.len();
        if n < self.cfg.min_samples {
            return QualityScore::zero(n);
        }

        let max = window.iter().cloned().fold(f32::MIN, f32::max);
        let min = window.iter().cloned().fold(f32::MAX, f32::min);
        let peak_to_peak = max - min;

        // Degenerate signal: a flat window scores zero outright, the other
        // factors are meaningless without any pulsatile content.
        if peak_to_peak < EPSILON {
            return QualityScore::zero(n);
        }

        let amplitude = ((peak_to_peak - self.cfg.amp_floor)
            / (self.cfg.amp_target - self.cfg.amp_floor).max(EPSILON))
        .clamp(0.0, 1.0);

        let snr = if spectrum.stale {
            0.0
        } else {
            logistic(spectrum.snr_db, self.cfg.snr_mid_db, self.cfg.snr_k)
        };

        let periodicity = if spectrum.stale {
            0.0
        } else {
            ((spectrum.peak_prominence() - 1.0) / (self.cfg.prominence_target - 1.0).max(EPSILON))
                .clamp(0.0, 1.0)
        };

        let stability = self.rr_stability(rr);

        let w = &self.cfg.weights;
        let ml_weight = if ml_confidence.is_some() { w.ml_confidence } else { 0.0 };
        let total_weight =
            (w.amplitude + w.snr + w.periodicity + w.stability + ml_weight).max(EPSILON);

        let mut weighted = w.amplitude * amplitude
            + w.snr * snr
            + w.periodicity * periodicity
            + w.stability * stability;
        if let Some(ml) = ml_confidence {
            weighted += ml_weight * ml.clamp(0.0, 1.0);
        }

        QualityScore {
            total: (100.0 * weighted / total_weight).clamp(0.0, 100.0),
            amplitude,
            snr,
            periodicity,
            stability,
            sample_count: n,
        }
    }

    /// 1 - coefficient of variation of the stored intervals, clamped.
    fn rr_stability(&self, rr: &RrHistory) -> f32 {
        if rr.len() < self.cfg.min_rr_intervals {
            return 0.0;
        }
        let intervals: Vec<f32> = rr.to_vec();
        let mean = intervals.iter().sum::<f32>() / intervals.len() as f32;
        let var =
            intervals.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / intervals.len() as f32;
        let cov = var.sqrt() / mean.max(EPSILON);
        (1.0 - cov).clamp(0.0, 1.0)
    }
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new()
    }
}

fn logistic(x: f32, mid: f32, k: f32) -> f32 {
    1.0 / (1.0 + (-k * (x - mid)).exp())
}
