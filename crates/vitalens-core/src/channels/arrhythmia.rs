//! Arrhythmia channel: rhythm classification from RR intervals only.
//!
//! Threshold rules over RMSSD/SDNN/pNN50 and mean rate, plus an event
//! counter that increments on every transition away from a normal rhythm.

use serde::{Deserialize, Serialize};
use vitalens_signals::{HrvAnalyzer, HrvConfig};

use crate::config::{CalibrationFactor, ChannelTuning};

use super::{ChannelInput, ChannelResult, ChannelValue, VitalChannel};

const EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrhythmiaStatus {
    Normal,
    PossibleArrhythmia,
    Tachycardia,
    Bradycardia,
    Irregular,
}

impl ArrhythmiaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::PossibleArrhythmia => "possible_arrhythmia",
            Self::Tachycardia => "tachycardia",
            Self::Bradycardia => "bradycardia",
            Self::Irregular => "irregular",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrhythmiaThresholds {
    pub tachycardia_bpm: f32,
    pub bradycardia_bpm: f32,
    /// RMSSD above this suggests an irregular rhythm (ms).
    pub irregular_rmssd_ms: f32,
    pub irregular_pnn50: f32,
    /// RR coefficient of variation flagging a possible arrhythmia.
    pub possible_cov: f32,
}

impl Default for ArrhythmiaThresholds {
    fn default() -> Self {
        Self {
            tachycardia_bpm: 100.0,
            bradycardia_bpm: 55.0,
            irregular_rmssd_ms: 80.0,
            irregular_pnn50: 0.4,
            possible_cov: 0.15,
        }
    }
}

pub struct ArrhythmiaChannel {
    min_confidence: f32,
    thresholds: ArrhythmiaThresholds,
    hrv: HrvAnalyzer,
    status: Option<ArrhythmiaStatus>,
    event_count: u32,
    confidence: f32,
    quality: f32,
}

impl ArrhythmiaChannel {
    pub fn new(tuning: &ChannelTuning) -> Self {
        Self {
            min_confidence: tuning.min_confidence,
            thresholds: ArrhythmiaThresholds::default(),
            hrv: HrvAnalyzer::with_config(HrvConfig::default()),
            status: None,
            event_count: 0,
            confidence: 0.0,
            quality: 0.0,
        }
    }

    /// Transitions away from Normal since construction or reset.
    pub fn event_count(&self) -> u32 {
        self.event_count
    }

    fn classify(&self, intervals: &[f32]) -> Option<ArrhythmiaStatus> {
        let metrics = self.hrv.analyze_intervals(intervals);
        if metrics.is_insufficient() {
            return None;
        }

        let nn: Vec<f32> = intervals
            .iter()
            .copied()
            .filter(|v| (300.0..=1500.0).contains(v))
            .collect();
        let mean_rr = nn.iter().sum::<f32>() / nn.len().max(1) as f32;
        let bpm = 60_000.0 / mean_rr.max(EPSILON);
        let sdnn_cov = metrics.sdnn_ms / mean_rr.max(EPSILON);

        let t = &self.thresholds;
        let status = if metrics.rmssd_ms > t.irregular_rmssd_ms
            || metrics.pnnx_ratio > t.irregular_pnn50
        {
            ArrhythmiaStatus::Irregular
        } else if bpm > t.tachycardia_bpm {
            ArrhythmiaStatus::Tachycardia
        } else if bpm < t.bradycardia_bpm {
            ArrhythmiaStatus::Bradycardia
        } else if sdnn_cov > t.possible_cov {
            ArrhythmiaStatus::PossibleArrhythmia
        } else {
            ArrhythmiaStatus::Normal
        };
        Some(status)
    }
}

impl VitalChannel for ArrhythmiaChannel {
    fn name(&self) -> &'static str {
        "arrhythmia"
    }

    fn min_confidence(&self) -> f32 {
        self.min_confidence
    }

    fn process(&mut self, input: &ChannelInput) {
        let next = match self.classify(&input.rr_intervals) {
            Some(status) => status,
            None => {
                self.confidence = 0.0;
                return;
            }
        };

        if let Some(prev) = self.status {
            if prev == ArrhythmiaStatus::Normal && next != ArrhythmiaStatus::Normal {
                self.event_count += 1;
                log::info!("rhythm event: {} -> {}", prev.as_str(), next.as_str());
            }
        }
        self.status = Some(next);

        // Classification trust grows with interval count and beat quality
        let coverage = (input.rr_intervals.len() as f32 / 10.0).clamp(0.0, 1.0);
        self.confidence = (0.5 * coverage
            + 0.3 * (input.quality.total / 100.0)
            + 0.2 * input.beat_confidence)
            .clamp(0.0, 1.0);
        self.quality = input.quality.total;
    }

    fn result(&self) -> Option<ChannelResult> {
        let status = self.status?;
        if self.confidence < self.min_confidence {
            return None;
        }
        Some(ChannelResult {
            value: ChannelValue::Classification(status),
            confidence: self.confidence,
            quality: self.quality,
        })
    }

    fn reset(&mut self) {
        self.status = None;
        self.event_count = 0;
        self.confidence = 0.0;
        self.quality = 0.0;
    }

    fn set_calibration(&mut self, _calibration: CalibrationFactor) {
        // Rhythm classification has no scalar output to calibrate.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::test_util::strong_input;
    use crate::config::ChannelTuning;

    fn channel() -> ArrhythmiaChannel {
        ArrhythmiaChannel::new(&ChannelTuning {
            min_confidence: 0.35,
            calibration: CalibrationFactor::default(),
        })
    }

    fn input_with_rr(rr: Vec<f32>) -> ChannelInput {
        let mut input = strong_input(0);
        input.rr_intervals = rr;
        input
    }

    #[test]
    fn steady_800ms_is_normal() {
        let mut ch = channel();
        ch.process(&input_with_rr(vec![800.0; 10]));
        match ch.result().unwrap().value {
            ChannelValue::Classification(s) => assert_eq!(s, ArrhythmiaStatus::Normal),
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn fast_rhythm_is_tachycardia() {
        let mut ch = channel();
        ch.process(&input_with_rr(vec![450.0; 10]));
        match ch.result().unwrap().value {
            ChannelValue::Classification(s) => assert_eq!(s, ArrhythmiaStatus::Tachycardia),
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn slow_rhythm_is_bradycardia() {
        let mut ch = channel();
        ch.process(&input_with_rr(vec![1300.0; 10]));
        match ch.result().unwrap().value {
            ChannelValue::Classification(s) => assert_eq!(s, ArrhythmiaStatus::Bradycardia),
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn alternating_intervals_are_irregular() {
        let mut ch = channel();
        ch.process(&input_with_rr(vec![
            600.0, 900.0, 620.0, 880.0, 610.0, 890.0, 600.0, 900.0,
        ]));
        match ch.result().unwrap().value {
            ChannelValue::Classification(s) => assert_eq!(s, ArrhythmiaStatus::Irregular),
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn event_counter_tracks_departures_from_normal() {
        let mut ch = channel();
        ch.process(&input_with_rr(vec![800.0; 10]));
        assert_eq!(ch.event_count(), 0);

        ch.process(&input_with_rr(vec![450.0; 10]));
        assert_eq!(ch.event_count(), 1);

        // Staying abnormal is not a new event
        ch.process(&input_with_rr(vec![440.0; 10]));
        assert_eq!(ch.event_count(), 1);

        ch.process(&input_with_rr(vec![800.0; 10]));
        ch.process(&input_with_rr(vec![1300.0; 10]));
        assert_eq!(ch.event_count(), 2);
    }

    #[test]
    fn too_few_intervals_withholds() {
        let mut ch = channel();
        ch.process(&input_with_rr(vec![800.0, 810.0]));
        assert!(ch.result().is_none());
    }
}
