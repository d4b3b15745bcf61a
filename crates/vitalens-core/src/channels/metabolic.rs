//! Metabolic channels: glucose, lipids, hemoglobin and hydration.
//!
//! Four estimators sharing one mechanism: extract pulse features, apply a
//! fixed per-kind model, clamp to the physiological range, gate on
//! confidence. The models are feature-plausibility heuristics, not
//! clinically validated measurements.

use std::collections::VecDeque;

use crate::config::{CalibrationFactor, ChannelTuning};
use crate::features::PulseFeatures;

use super::{ChannelInput, ChannelResult, ChannelValue, ConfidenceEma, VitalChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetabolicKind {
    /// mg/dL
    Glucose,
    /// Total cholesterol, mg/dL
    Lipids,
    /// g/dL
    Hemoglobin,
    /// Percent body hydration
    Hydration,
}

impl MetabolicKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Glucose => "glucose",
            Self::Lipids => "lipids",
            Self::Hemoglobin => "hemoglobin",
            Self::Hydration => "hydration",
        }
    }

    fn range(&self) -> (f32, f32) {
        match self {
            Self::Glucose => (70.0, 140.0),
            Self::Lipids => (120.0, 260.0),
            Self::Hemoglobin => (10.0, 18.0),
            Self::Hydration => (45.0, 75.0),
        }
    }

    /// Fixed feature model producing the raw, pre-calibration estimate.
    fn estimate(&self, f: &PulseFeatures) -> f32 {
        match self {
            // AUC relative to amplitude tracks waveform fullness
            Self::Glucose => {
                let fullness = f.auc / f.peak_to_peak.max(1e-6);
                95.0 + (fullness - 0.3) * 120.0
            }
            // Fall/rise asymmetry as a stiffness proxy
            Self::Lipids => {
                let asymmetry = f.fall_time_ms / f.rise_time_ms.max(1.0);
                165.0 + (asymmetry - 1.5) * 30.0
            }
            // Stronger perfusion reads as higher optical density
            Self::Hemoglobin => 13.5 + (f.perfusion_index - 0.05) * 18.0,
            // Notch prominence tracks vascular tone
            Self::Hydration => 58.0 + f.notch_prominence * 12.0 + (f.perfusion_index - 0.05) * 40.0,
        }
    }
}

pub struct MetabolicChannel {
    kind: MetabolicKind,
    min_confidence: f32,
    calibration: CalibrationFactor,
    buffer_size: usize,
    ac_ring: VecDeque<f32>,
    smoothed: ConfidenceEma,
    confidence: f32,
    quality: f32,
}

impl MetabolicChannel {
    pub fn new(kind: MetabolicKind, tuning: &ChannelTuning, buffer_size: usize) -> Self {
        Self {
            kind,
            min_confidence: tuning.min_confidence,
            calibration: tuning.calibration.clamped(),
            buffer_size: buffer_size.max(30),
            ac_ring: VecDeque::new(),
            smoothed: ConfidenceEma::new(0.15),
            confidence: 0.0,
            quality: 0.0,
        }
    }

    pub fn kind(&self) -> MetabolicKind {
        self.kind
    }
}

impl VitalChannel for MetabolicChannel {
    fn name(&self) -> &'static str {
        self.kind.name()
    }

    fn min_confidence(&self) -> f32 {
        self.min_confidence
    }

    fn process(&mut self, input: &ChannelInput) {
        for &v in &input.ac_window {
            if self.ac_ring.len() == self.buffer_size {
                self.ac_ring.pop_front();
            }
            self.ac_ring.push_back(v);
        }
        if self.ac_ring.len() < self.buffer_size {
            self.confidence = 0.0;
            return;
        }

        let window: Vec<f32> = self.ac_ring.iter().copied().collect();
        let features = match PulseFeatures::extract(&window, input.dc_baseline, input.sample_rate) {
            Some(f) => f,
            None => {
                self.confidence = 0.0;
                return;
            }
        };

        let (lo, hi) = self.kind.range();
        let raw = self.kind.estimate(&features);
        let value = self.calibration.apply(raw).clamp(lo, hi);

        // Metabolic estimates demand the most stable signal of any channel
        let pi_plausible = if (0.005..=0.25).contains(&features.perfusion_index) {
            1.0
        } else {
            0.2
        };
        self.confidence = (0.6 * (input.quality.total / 100.0)
            + 0.2 * pi_plausible
            + 0.2 * input.quality.stability)
            .clamp(0.0, 1.0);
        self.quality = input.quality.total;

        self.smoothed.update(value, self.confidence);
    }

    fn result(&self) -> Option<ChannelResult> {
        let value = self.smoothed.value()?;
        if self.confidence < self.min_confidence {
            return None;
        }
        Some(ChannelResult {
            value: ChannelValue::Numeric(value),
            confidence: self.confidence,
            quality: self.quality,
        })
    }

    fn reset(&mut self) {
        self.ac_ring.clear();
        self.smoothed.reset();
        self.confidence = 0.0;
        self.quality = 0.0;
    }

    fn set_calibration(&mut self, calibration: CalibrationFactor) {
        self.calibration = calibration.clamped();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::test_util::{strong_input, weak_input};
    use crate::config::ChannelTuning;

    fn channel(kind: MetabolicKind) -> MetabolicChannel {
        MetabolicChannel::new(
            kind,
            &ChannelTuning {
                min_confidence: 0.5,
                calibration: CalibrationFactor::default(),
            },
            90,
        )
    }

    #[test]
    fn estimates_stay_in_physiological_range() {
        for kind in [
            MetabolicKind::Glucose,
            MetabolicKind::Lipids,
            MetabolicKind::Hemoglobin,
            MetabolicKind::Hydration,
        ] {
            let mut ch = channel(kind);
            ch.process(&strong_input(0));
            let result = ch.result().unwrap_or_else(|| panic!("{} withheld", kind.name()));
            let (lo, hi) = kind.range();
            match result.value {
                ChannelValue::Numeric(v) => {
                    assert!((lo..=hi).contains(&v), "{} out of range: {}", kind.name(), v)
                }
                other => panic!("unexpected value {:?}", other),
            }
        }
    }

    #[test]
    fn weak_signal_withholds_all_kinds() {
        for kind in [MetabolicKind::Glucose, MetabolicKind::Hydration] {
            let mut ch = channel(kind);
            ch.process(&weak_input(0));
            assert!(ch.result().is_none(), "{} leaked", kind.name());
        }
    }

    #[test]
    fn reset_preserves_calibration() {
        let mut ch = channel(MetabolicKind::Glucose);
        ch.set_calibration(CalibrationFactor {
            scale: 1.0,
            offset: 20.0,
        });
        ch.process(&strong_input(0));
        let with_cal = match ch.result().unwrap().value {
            ChannelValue::Numeric(v) => v,
            _ => unreachable!(),
        };
        ch.reset();
        ch.process(&strong_input(1));
        let after_reset = match ch.result().unwrap().value {
            ChannelValue::Numeric(v) => v,
            _ => unreachable!(),
        };
        assert!((with_cal - after_reset).abs() < 1.0);
    }
}
