//! Heart-rate channel: RR-interval mean BPM plus a confidence-weighted
//! running average.

use crate::config::{CalibrationFactor, ChannelTuning};

use super::{ChannelInput, ChannelResult, ChannelValue, ConfidenceEma, VitalChannel};

const EPSILON: f32 = 1e-6;
const BPM_MIN: f32 = 40.0;
const BPM_MAX: f32 = 220.0;

pub struct HeartRateChannel {
    min_confidence: f32,
    calibration: CalibrationFactor,
    bpm: Option<f32>,
    average: ConfidenceEma,
    confidence: f32,
    quality: f32,
}

impl HeartRateChannel {
    pub fn new(tuning: &ChannelTuning) -> Self {
        Self {
            min_confidence: tuning.min_confidence,
            calibration: tuning.calibration.clamped(),
            bpm: None,
            average: ConfidenceEma::new(0.3),
            confidence: 0.0,
            quality: 0.0,
        }
    }

    /// Smoothed long-run BPM, independent of the per-result gate.
    pub fn average_bpm(&self) -> Option<f32> {
        self.average.value()
    }
}

impl VitalChannel for HeartRateChannel {
    fn name(&self) -> &'static str {
        "heart_rate"
    }

    fn min_confidence(&self) -> f32 {
        self.min_confidence
    }

    fn process(&mut self, input: &ChannelInput) {
        let rr = &input.rr_intervals;
        if rr.len() < 3 {
            self.confidence = 0.0;
            return;
        }

        // Instantaneous rate from the newest three intervals
        let recent = &rr[rr.len() - 3..];
        let mean_recent = recent.iter().sum::<f32>() / recent.len() as f32;
        let raw_bpm = 60_000.0 / mean_recent.max(EPSILON);

        let mean_all = rr.iter().sum::<f32>() / rr.len() as f32;
        let var = rr.iter().map(|v| (v - mean_all).powi(2)).sum::<f32>() / rr.len() as f32;
        let cov = var.sqrt() / mean_all.max(EPSILON);

        let regularity = (1.0 - cov * 2.0).clamp(0.0, 1.0);
        self.confidence = (0.4 * regularity
            + 0.3 * (input.quality.total / 100.0)
            + 0.3 * input.beat_confidence)
            .clamp(0.0, 1.0);
        self.quality = input.quality.total;

        let bpm = self.calibration.apply(raw_bpm).clamp(BPM_MIN, BPM_MAX);
        self.bpm = Some(bpm);
        self.average.update(bpm, self.confidence);
    }

    fn result(&self) -> Option<ChannelResult> {
        let bpm = self.bpm?;
        if self.confidence < self.min_confidence {
            return None;
        }
        Some(ChannelResult {
            value: ChannelValue::Numeric(bpm),
            confidence: self.confidence,
            quality: self.quality,
        })
    }

    fn reset(&mut self) {
        self.bpm = None;
        self.average.reset();
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

    fn channel() -> HeartRateChannel {
        HeartRateChannel::new(&ChannelTuning {
            min_confidence: 0.3,
            calibration: CalibrationFactor::default(),
        })
    }

    #[test]
    fn steady_rr_yields_75_bpm() {
        let mut ch = channel();
        ch.process(&strong_input(0));
        let result = ch.result().expect("result withheld");
        match result.value {
            ChannelValue::Numeric(bpm) => assert!((bpm - 75.0).abs() < 1.0, "bpm {}", bpm),
            other => panic!("unexpected value {:?}", other),
        }
        assert!(result.confidence > 0.7);
    }

    #[test]
    fn weak_input_withholds_result() {
        let mut ch = channel();
        ch.process(&weak_input(0));
        assert!(ch.result().is_none());
    }

    #[test]
    fn reset_clears_estimate_but_keeps_calibration() {
        let mut ch = channel();
        ch.set_calibration(CalibrationFactor {
            scale: 1.1,
            offset: 0.0,
        });
        ch.process(&strong_input(0));
        ch.reset();
        assert!(ch.result().is_none());
        assert!(ch.average_bpm().is_none());

        ch.process(&strong_input(1_000_000));
        match ch.result().unwrap().value {
            ChannelValue::Numeric(bpm) => {
                // 75 * 1.1 = 82.5, calibration survived the reset
                assert!((bpm - 82.5).abs() < 1.5, "bpm {}", bpm);
            }
            other => panic!("unexpected value {:?}", other),
        }
    }
}
