//! Single-channel SpO2 approximation.
//!
//! True oximetry needs two wavelengths. With only one optical channel the
//! infrared perfusion ratio is stood in for by a fixed affine scaling of
//! the red-channel ratio. The resulting ratio-of-ratios varies with
//! perfusion but has no verified clinical validity; the output is an
//! approximation, not ground truth.

use std::collections::VecDeque;

use crate::config::{CalibrationFactor, ChannelTuning};
use crate::features::PulseFeatures;

use super::{ChannelInput, ChannelResult, ChannelValue, ConfidenceEma, VitalChannel};

const EPSILON: f32 = 1e-6;
const SPO2_MIN: f32 = 85.0;
const SPO2_MAX: f32 = 100.0;
/// Fixed cross-channel scaling assumption for the synthetic IR ratio.
const IR_SCALE: f32 = 0.72;
const IR_OFFSET: f32 = 0.012;
/// Classic empirical ratio-of-ratios line.
const CAL_A: f32 = 110.0;
const CAL_B: f32 = 25.0;

pub struct Spo2Channel {
    min_confidence: f32,
    calibration: CalibrationFactor,
    buffer_size: usize,
    ac_ring: VecDeque<f32>,
    smoothed: ConfidenceEma,
    confidence: f32,
    quality: f32,
}

impl Spo2Channel {
    pub fn new(tuning: &ChannelTuning, buffer_size: usize) -> Self {
        Self {
            min_confidence: tuning.min_confidence,
            calibration: tuning.calibration.clamped(),
            buffer_size: buffer_size.max(30),
            ac_ring: VecDeque::new(),
            smoothed: ConfidenceEma::new(0.25),
            confidence: 0.0,
            quality: 0.0,
        }
    }
}

impl VitalChannel for Spo2Channel {
    fn name(&self) -> &'static str {
        "spo2"
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

        // Red ratio from the real channel, IR ratio from the fixed scaling
        let red_ratio = features.perfusion_index;
        let ir_ratio = red_ratio * IR_SCALE + IR_OFFSET;
        let r = red_ratio / ir_ratio.max(EPSILON);

        let raw = CAL_A - CAL_B * r;
        let spo2 = self
            .calibration
            .apply(raw)
            .clamp(SPO2_MIN, SPO2_MAX);

        // Plausible camera-PPG perfusion sits roughly in [0.5%, 20%]
        let pi_plausible = if (0.005..=0.2).contains(&red_ratio) {
            1.0
        } else {
            0.3
        };
        self.confidence = (0.5 * (input.quality.total / 100.0)
            + 0.3 * pi_plausible
            + 0.2 * input.beat_confidence)
            .clamp(0.0, 1.0);
        self.quality = input.quality.total;

        self.smoothed.update(spo2, self.confidence);
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

    fn channel() -> Spo2Channel {
        Spo2Channel::new(
            &ChannelTuning {
                min_confidence: 0.4,
                calibration: CalibrationFactor::default(),
            },
            90,
        )
    }

    #[test]
    fn strong_signal_yields_physiological_value() {
        let mut ch = channel();
        ch.process(&strong_input(0));
        let result = ch.result().expect("result withheld");
        match result.value {
            ChannelValue::Numeric(spo2) => {
                assert!((SPO2_MIN..=SPO2_MAX).contains(&spo2), "spo2 {}", spo2);
            }
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn weak_signal_is_withheld() {
        let mut ch = channel();
        ch.process(&weak_input(0));
        assert!(ch.result().is_none());
    }

    #[test]
    fn estimate_is_smoothed_across_updates() {
        let mut ch = channel();
        ch.process(&strong_input(0));
        let first = match ch.result().unwrap().value {
            ChannelValue::Numeric(v) => v,
            _ => unreachable!(),
        };
        for i in 1..10 {
            ch.process(&strong_input(i * 333_333));
        }
        let later = match ch.result().unwrap().value {
            ChannelValue::Numeric(v) => v,
            _ => unreachable!(),
        };
        // Identical inputs keep the smoothed output pinned
        assert!((first - later).abs() < 0.5);
    }
}
