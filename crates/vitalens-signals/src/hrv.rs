//! Time-domain heart-rate-variability statistics over a bounded RR history.

use serde::{Deserialize, Serialize};

use crate::types::RrHistory;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HrvConfig {
    /// Minimum stored intervals before metrics are computed.
    pub min_intervals: usize,
    /// Plausibility band applied before differencing (ms).
    pub min_nn_ms: f32,
    pub max_nn_ms: f32,
    /// Successive-difference threshold for pNNx (ms). 50 ms gives pNN50.
    pub pnn_threshold_ms: f32,
}

impl Default for HrvConfig {
    fn default() -> Self {
        Self {
            min_intervals: 3,
            min_nn_ms: 300.0,
            max_nn_ms: 1500.0,
            pnn_threshold_ms: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HrvMetrics {
    pub rmssd_ms: f32,
    pub sdnn_ms: f32,
    /// Fraction of successive differences exceeding the pNN threshold.
    pub pnnx_ratio: f32,
    /// Number of intervals that survived the plausibility filter.
    pub nn_count: usize,
}

impl HrvMetrics {
    /// Neutral result for below-minimum sample counts. Never fabricated
    /// plausible-looking values.
    pub fn insufficient() -> Self {
        Self {
            rmssd_ms: 0.0,
            sdnn_ms: 0.0,
            pnnx_ratio: 0.0,
            nn_count: 0,
        }
    }

    pub fn is_insufficient(&self) -> bool {
        self.nn_count == 0
    }
}

pub struct HrvAnalyzer {
    cfg: HrvConfig,
}

impl HrvAnalyzer {
    pub fn new() -> Self {
        Self::with_config(HrvConfig::default())
    }

    pub fn with_config(cfg: HrvConfig) -> Self {
        Self { cfg }
    }

    pub fn analyze(&self, rr: &RrHistory) -> HrvMetrics {
        let intervals: Vec<f32> = rr.to_vec();
        self.analyze_intervals(&intervals)
    }

    /// Same computation over a plain interval snapshot, for consumers that
    /// operate on window copies instead of the live ring.
    pub fn analyze_intervals(&self, intervals: &[f32]) -> HrvMetrics {
        let nn: Vec<f32> = intervals
            .iter()
            .copied()
            .filter(|v| *v >= self.cfg.min_nn_ms && *v <= self.cfg.max_nn_ms)
            .collect();

        if nn.len() < self.cfg.min_intervals.max(2) {
            return HrvMetrics::insufficient();
        }

        let mean = nn.iter().sum::<f32>() / nn.len() as f32;
        let sdnn = (nn.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / nn.len() as f32).sqrt();

        let mut diff_sq_sum = 0.0f32;
        let mut over_threshold = 0usize;
        for pair in nn.windows(2) {
            let d = pair[1] - pair[0];
            diff_sq_sum += d * d;
            if d.abs() > self.cfg.pnn_threshold_ms {
                over_threshold += 1;
            }
        }
        let diff_count = (nn.len() - 1).max(1);
        let rmssd = (diff_sq_sum / diff_count as f32).sqrt();
        let pnnx = over_threshold as f32 / diff_count as f32;

        HrvMetrics {
            rmssd_ms: rmssd,
            sdnn_ms: sdnn,
            pnnx_ratio: pnnx,
            nn_count: nn.len(),
        }
    }
}

impl Default for HrvAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn history(values: &[f32]) -> RrHistory {
        let mut rr = RrHistory::new();
        for &v in values {
            rr.push(v);
        }
        rr
    }

    #[test]
    fn below_minimum_returns_neutral() {
        let analyzer = HrvAnalyzer::new();
        let metrics = analyzer.analyze(&history(&[800.0, 790.0]));
        assert!(metrics.is_insufficient());
        assert_eq!(metrics.rmssd_ms, 0.0);
        assert_eq!(metrics.sdnn_ms, 0.0);
    }

    #[test]
    fn steady_rhythm_has_near_zero_variability() {
        let analyzer = HrvAnalyzer::new();
        let metrics = analyzer.analyze(&history(&[800.0; 10]));
        assert_eq!(metrics.nn_count, 10);
        assert_relative_eq!(metrics.rmssd_ms, 0.0, epsilon = 1e-3);
        assert_relative_eq!(metrics.sdnn_ms, 0.0, epsilon = 1e-3);
        assert_eq!(metrics.pnnx_ratio, 0.0);
    }

    #[test]
    fn known_rmssd_sdnn() {
        let analyzer = HrvAnalyzer::new();
        // Alternating 760/840: every diff is +-80 ms
        let metrics = analyzer.analyze(&history(&[760.0, 840.0, 760.0, 840.0, 760.0]));
        assert_relative_eq!(metrics.rmssd_ms, 80.0, epsilon = 0.1);
        assert_relative_eq!(metrics.sdnn_ms, 39.2, epsilon = 0.1);
        assert_eq!(metrics.pnnx_ratio, 1.0);
    }

    #[test]
    fn plausibility_filter_applies_before_differencing() {
        let analyzer = HrvAnalyzer::with_config(HrvConfig::default());
        // 280 ms is storable in RrHistory (>=250) but below the 300 ms NN
        // plausibility floor, so it must not contribute a huge diff.
        let metrics = analyzer.analyze(&history(&[800.0, 280.0, 800.0, 800.0, 800.0]));
        assert_eq!(metrics.nn_count, 4);
        assert_relative_eq!(metrics.rmssd_ms, 0.0, epsilon = 1e-3);
    }
}
