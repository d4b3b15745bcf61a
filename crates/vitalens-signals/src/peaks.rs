//! Beat detection: adaptive local-maxima search with physiological gating
//! and an optional oracle confidence blend.
//!
//! A beat requires the deterministic local-maximum decision. An attached
//! oracle can veto a candidate or re-weight its confidence, but can never
//! create a beat on its own, which keeps a misbehaving model from
//! fabricating phantom detections.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::oracle::{OracleBridge, PeakOracle};
use crate::types::{Beat, ConditionedSample};

const EPSILON: f32 = 1e-6;

/// Ticks an oracle score stays usable without a fresh reply. At 30 Hz this
/// is one second; after that the score describes a window long gone.
const ORACLE_SCORE_TTL_TICKS: u32 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakDetectorConfig {
    /// Local-maximum window (odd, 3-5). The candidate is the center sample.
    pub lookback_window: usize,
    /// Recent-statistics window for the adaptive amplitude threshold.
    pub stats_window: usize,
    /// Minimum buffered samples before the threshold is trusted.
    pub min_stats_samples: usize,
    /// Threshold = mean + k * stddev of the stats window.
    pub k_std: f32,
    /// Refractory gate: candidates closer than this to the last beat are rejected.
    pub min_rr_ms: f32,
    /// Gaps longer than this still emit a beat but carry no RR interval.
    pub max_rr_ms: f32,
    pub base_confidence: f32,
    /// Plausible instantaneous BPM band for the confidence bonus.
    pub bpm_min: f32,
    pub bpm_max: f32,
    /// Oracle blend weight and veto threshold.
    pub oracle_weight: f32,
    pub veto_threshold: f32,
}

impl Default for PeakDetectorConfig {
    fn default() -> Self {
        Self {
            lookback_window: 5,
            stats_window: 30,
            min_stats_samples: 10,
            k_std: 0.2,
            min_rr_ms: 300.0,
            max_rr_ms: 1500.0,
            base_confidence: 0.6,
            bpm_min: 40.0,
            bpm_max: 180.0,
            oracle_weight: 0.4,
            veto_threshold: 0.2,
        }
    }
}

/// Adaptive local-maximum beat detector.
pub struct PeakDetector {
    cfg: PeakDetectorConfig,
    lookback: VecDeque<(i64, f32)>,
    stats: VecDeque<f32>,
    last_beat_us: Option<i64>,
    recent_rr: VecDeque<f32>,
    bridge: Option<OracleBridge>,
    last_oracle_score: Option<f32>,
    oracle_score_age: u32,
}

impl PeakDetector {
    pub fn new() -> Self {
        Self::with_config(PeakDetectorConfig::default())
    }

    pub fn with_config(cfg: PeakDetectorConfig) -> Self {
        Self {
            cfg,
            lookback: VecDeque::new(),
            stats: VecDeque::new(),
            last_beat_us: None,
            recent_rr: VecDeque::new(),
            bridge: None,
            last_oracle_score: None,
            oracle_score_age: 0,
        }
    }

    pub fn config(&self) -> &PeakDetectorConfig {
        &self.cfg
    }

    /// Most recent oracle score, if an oracle is attached and has replied.
    pub fn oracle_score(&self) -> Option<f32> {
        self.last_oracle_score
    }

    /// Attach an optional scoring oracle, replacing any previous one.
    pub fn set_oracle(&mut self, oracle: Box<dyn PeakOracle>) {
        self.bridge = Some(OracleBridge::start(oracle));
        self.last_oracle_score = None;
        self.oracle_score_age = 0;
    }

    /// Clear detection state. In-flight oracle work is invalidated via the
    /// bridge epoch so late results from the old session are ignored.
    pub fn reset(&mut self) {
        self.lookback.clear();
        self.stats.clear();
        self.last_beat_us = None;
        self.recent_rr.clear();
        self.last_oracle_score = None;
        self.oracle_score_age = 0;
        if let Some(bridge) = self.bridge.as_mut() {
            bridge.bump_epoch();
        }
    }

    /// Examine one conditioned sample. Returns a beat when the center of the
    /// lookback window is an accepted peak.
    pub fn detect(&mut self, c: &ConditionedSample) -> Option<Beat> {
        self.push_sample(c.timestamp_us, c.filtered);

        // Fire-and-forget oracle round trip: submit the current window, pick
        // up whatever score finished since the previous tick.
        if let Some(bridge) = self.bridge.as_ref() {
            if self.stats.len() >= self.cfg.min_stats_samples {
                bridge.submit(self.stats.iter().copied().collect());
            }
            if let Some(score) = bridge.latest_score() {
                self.last_oracle_score = Some(score);
                self.oracle_score_age = 0;
            } else if self.last_oracle_score.is_some() {
                // A score the bridge stopped refreshing goes stale; drop it
                // so a silent oracle cannot hold detection hostage.
                self.oracle_score_age += 1;
                if self.oracle_score_age > ORACLE_SCORE_TTL_TICKS {
                    log::debug!("oracle score expired after {} quiet ticks", self.oracle_score_age);
                    self.last_oracle_score = None;
                    self.oracle_score_age = 0;
                }
            }
        }

        let (peak_ts, peak_value) = self.local_maximum()?;

        if self.stats.len() < self.cfg.min_stats_samples {
            return None;
        }
        let (mean, std) = mean_std(&self.stats);
        if peak_value <= mean + self.cfg.k_std * std {
            return None;
        }

        let gap_ms = self
            .last_beat_us
            .map(|last| (peak_ts - last) as f32 / 1000.0);
        if let Some(gap) = gap_ms {
            if gap < self.cfg.min_rr_ms {
                return None;
            }
        }

        if let Some(score) = self.last_oracle_score {
            if score < self.cfg.veto_threshold {
                log::debug!("oracle vetoed peak candidate (score {:.2})", score);
                return None;
            }
        }

        let rr_interval_ms = gap_ms.filter(|&gap| gap <= self.cfg.max_rr_ms);
        let confidence = self.confidence_for(rr_interval_ms);

        self.last_beat_us = Some(peak_ts);
        if let Some(rr) = rr_interval_ms {
            if self.recent_rr.len() == 3 {
                self.recent_rr.pop_front();
            }
            self.recent_rr.push_back(rr);
        }

        Some(Beat {
            timestamp_us: peak_ts,
            peak_value,
            confidence,
            rr_interval_ms,
        })
    }

    fn push_sample(&mut self, ts_us: i64, value: f32) {
        if self.lookback.len() == self.cfg.lookback_window.max(3) {
            self.lookback.pop_front();
        }
        self.lookback.push_back((ts_us, value));

        if self.stats.len() == self.cfg.stats_window.max(2) {
            self.stats.pop_front();
        }
        self.stats.push_back(value);
    }

    /// The center sample of a full lookback window, when it strictly exceeds
    /// every neighbor.
    fn local_maximum(&self) -> Option<(i64, f32)> {
        let window = self.cfg.lookback_window.max(3);
        if self.lookback.len() < window {
            return None;
        }
        let mid = window / 2;
        let (ts, center) = self.lookback[mid];
        for (i, &(_, v)) in self.lookback.iter().enumerate() {
            if i != mid && v >= center {
                return None;
            }
        }
        Some((ts, center))
    }

    fn confidence_for(&self, rr_interval_ms: Option<f32>) -> f32 {
        let mut confidence = self.cfg.base_confidence;

        if let Some(rr) = rr_interval_ms {
            let bpm = 60_000.0 / rr.max(EPSILON);
            if bpm >= self.cfg.bpm_min && bpm <= self.cfg.bpm_max {
                confidence += 0.2;
            } else {
                confidence -= 0.2;
            }

            // Rhythm regularity over the last 3 intervals
            if self.recent_rr.len() >= 2 {
                let mut recent: Vec<f32> = self.recent_rr.iter().copied().collect();
                recent.push(rr);
                let tail = &recent[recent.len().saturating_sub(3)..];
                let (mean, std) = mean_std_slice(tail);
                let cov = std / mean.max(EPSILON);
                if cov < 0.2 {
                    confidence += 0.15;
                } else if cov > 0.5 {
                    confidence -= 0.1;
                }
            }
        }

        if let Some(score) = self.last_oracle_score {
            let w = self.cfg.oracle_weight.clamp(0.0, 1.0);
            confidence = (1.0 - w) * confidence + w * score;
        }

        confidence.clamp(0.0, 1.0)
    }
}

impl Default for PeakDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn mean_std(ring: &VecDeque<f32>) -> (f32, f32) {
    let n = ring.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = ring.iter().sum::<f32>() / n as f32;
    let var = ring.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n as f32;
    (mean, var.sqrt())
}

fn mean_std_slice(values: &[f32]) -> (f32, f32) {
    let n = values.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f32>() / n as f32;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n as f32;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditioner::SignalConditioner;
    use crate::oracle::OracleError;
    use crate::types::Sample;
    use std::f32::consts::PI;

    fn run_sinusoid(detector: &mut PeakDetector, hz: f32, seconds: f32) -> Vec<Beat> {
        let fs = 30.0;
        let mut conditioner = SignalConditioner::new();
        let n = (fs * seconds) as usize;
        let mut beats = Vec::new();
        for i in 0..n {
            let t = i as f32 / fs;
            let sample = Sample {
                timestamp_us: (t * 1e6) as i64,
                raw: 0.5 + 0.1 * (2.0 * PI * hz * t).sin(),
            };
            let c = conditioner.condition(sample);
            if let Some(beat) = detector.detect(&c) {
                beats.push(beat);
            }
        }
        beats
    }

    #[test]
    fn detects_75_bpm_sinusoid() {
        let mut detector = PeakDetector::new();
        let beats = run_sinusoid(&mut detector, 1.25, 10.0);
        assert!(
            (11..=13).contains(&beats.len()),
            "expected ~12 beats, got {}",
            beats.len()
        );

        let rrs: Vec<f32> = beats.iter().filter_map(|b| b.rr_interval_ms).collect();
        let mean_rr = rrs.iter().sum::<f32>() / rrs.len() as f32;
        assert!((mean_rr - 800.0).abs() < 40.0, "mean RR {} ms", mean_rr);
    }

    #[test]
    fn regular_rhythm_earns_high_confidence() {
        let mut detector = PeakDetector::new();
        let beats = run_sinusoid(&mut detector, 1.25, 10.0);
        let last = beats.last().unwrap();
        assert!(last.confidence > 0.9, "confidence {}", last.confidence);
    }

    #[test]
    fn no_beats_on_constant_signal() {
        let mut detector = PeakDetector::new();
        let mut conditioner = SignalConditioner::new();
        for i in 0..300 {
            let c = conditioner.condition(Sample {
                timestamp_us: i * 33_333,
                raw: 0.5,
            });
            assert!(detector.detect(&c).is_none());
        }
    }

    #[test]
    fn refractory_rejects_early_candidates() {
        let mut detector = PeakDetector::new();
        // 4 Hz is above the 300 ms refractory rate (250 ms period), so
        // roughly every other peak must be dropped.
        let beats = run_sinusoid(&mut detector, 4.0, 5.0);
        for pair in beats.windows(2) {
            let gap = (pair[1].timestamp_us - pair[0].timestamp_us) as f32 / 1000.0;
            assert!(gap >= 300.0, "refractory violated: {} ms", gap);
        }
    }

    #[test]
    fn long_gap_emits_beat_without_rr() {
        let mut detector = PeakDetector::new();
        // First run establishes a beat, then a long silence, then new beats.
        let fs = 30.0;
        let mut conditioner = SignalConditioner::new();
        let mut beats = Vec::new();
        for i in 0..600 {
            let t = i as f32 / fs;
            // Signal present for 3 s, flat for 4 s, present again
            let raw = if (3.0..7.0).contains(&t) {
                0.5
            } else {
                0.5 + 0.1 * (2.0 * PI * 1.25 * t).sin()
            };
            let c = conditioner.condition(Sample {
                timestamp_us: (t * 1e6) as i64,
                raw,
            });
            if let Some(b) = detector.detect(&c) {
                beats.push(b);
            }
        }
        let resumed = beats
            .iter()
            .find(|b| b.timestamp_us > 7_000_000)
            .expect("no beat after the gap");
        assert!(resumed.rr_interval_ms.is_none(), "gap RR should be dropped");
    }

    struct SuppressingOracle;

    impl PeakOracle for SuppressingOracle {
        fn predict(&self, _window: &[f32]) -> Result<f32, OracleError> {
            Ok(0.0)
        }
    }

    #[test]
    fn oracle_can_veto_but_not_create() {
        let mut detector = PeakDetector::new();
        detector.set_oracle(Box::new(SuppressingOracle));

        let fs = 30.0;
        let mut conditioner = SignalConditioner::new();
        let mut late_beats = 0;
        for i in 0..600 {
            let t = i as f32 / fs;
            let c = conditioner.condition(Sample {
                timestamp_us: (t * 1e6) as i64,
                raw: 0.5 + 0.1 * (2.0 * PI * 1.25 * t).sin(),
            });
            let beat = detector.detect(&c);
            // Give the bridge worker time to score the early windows
            std::thread::sleep(std::time::Duration::from_millis(1));
            if beat.is_some() && i > 120 {
                late_beats += 1;
            }
        }
        assert_eq!(late_beats, 0, "vetoed detector still emitted beats");
    }

    struct OneShotOracle {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl PeakOracle for OneShotOracle {
        fn predict(&self, _window: &[f32]) -> Result<f32, OracleError> {
            if self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                Ok(0.0)
            } else {
                Err(OracleError::Unavailable("model unloaded".into()))
            }
        }
    }

    #[test]
    fn veto_expires_when_oracle_goes_silent() {
        let mut detector = PeakDetector::new();
        detector.set_oracle(Box::new(OneShotOracle {
            calls: std::sync::atomic::AtomicUsize::new(0),
        }));

        // The oracle scores exactly one window at 0.0 and then fails, so no
        // fresh scores ever follow. The single low score may veto early
        // candidates but must age out rather than suppress beats forever.
        let fs = 30.0;
        let mut conditioner = SignalConditioner::new();
        let mut late_beats = 0;
        for i in 0..600 {
            let t = i as f32 / fs;
            let c = conditioner.condition(Sample {
                timestamp_us: (t * 1e6) as i64,
                raw: 0.5 + 0.1 * (2.0 * PI * 1.25 * t).sin(),
            });
            let beat = detector.detect(&c);
            std::thread::sleep(std::time::Duration::from_millis(1));
            if beat.is_some() && i > 120 {
                late_beats += 1;
            }
        }
        assert!(late_beats > 0, "stale oracle score never expired");
    }
}
