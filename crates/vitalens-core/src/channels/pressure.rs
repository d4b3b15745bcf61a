//! Blood-pressure channel: systolic/diastolic estimated from pulse
//! morphology (rise time, perfusion, dicrotic-notch prominence), rendered
//! as "SYS/DIA" text.

use std::collections::VecDeque;

use crate::config::{CalibrationFactor, ChannelTuning};
use crate::features::PulseFeatures;

use super::{ChannelInput, ChannelResult, ChannelValue, ConfidenceEma, VitalChannel};

const SYS_MIN: f32 = 90.0;
const SYS_MAX: f32 = 180.0;
const DIA_MIN: f32 = 55.0;
const DIA_MAX: f32 = 110.0;
/// Nominal rise time (ms) mapping to the baseline systolic estimate.
const RISE_REF_MS: f32 = 200.0;

pub struct PressureChannel {
    min_confidence: f32,
    calibration: CalibrationFactor,
    buffer_size: usize,
    ac_ring: VecDeque<f32>,
    systolic: ConfidenceEma,
    diastolic: ConfidenceEma,
    confidence: f32,
    quality: f32,
}

impl PressureChannel {
    pub fn new(tuning: &ChannelTuning, buffer_size: usize) -> Self {
        Self {
            min_confidence: tuning.min_confidence,
            calibration: tuning.calibration.clamped(),
            buffer_size: buffer_size.max(30),
            ac_ring: VecDeque::new(),
            systolic: ConfidenceEma::new(0.2),
            diastolic: ConfidenceEma::new(0.2),
            confidence: 0.0,
            quality: 0.0,
        }
    }

    pub fn systolic(&self) -> Option<f32> {
        self.systolic.value()
    }

    pub fn diastolic(&self) -> Option<f32> {
        self.diastolic.value()
    }
}

impl VitalChannel for PressureChannel {
    fn name(&self) -> &'static str {
        "pressure"
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

        // Shorter rise and stronger perfusion push systolic up; notch
        // prominence (vascular elasticity proxy) narrows pulse pressure.
        let rise_term = (RISE_REF_MS - features.rise_time_ms) * 0.08;
        let perfusion_term = (features.perfusion_index - 0.05) * 60.0;
        let raw_sys = 118.0 + rise_term + perfusion_term;
        let sys = self.calibration.apply(raw_sys).clamp(SYS_MIN, SYS_MAX);

        let pulse_pressure = (42.0 - features.notch_prominence * 12.0).max(25.0);
        let dia = (sys - pulse_pressure).clamp(DIA_MIN, DIA_MAX.min(sys - 10.0));

        let rise_plausible = if (60.0..=400.0).contains(&features.rise_time_ms) {
            1.0
        } else {
            0.4
        };
        self.confidence = (0.5 * (input.quality.total / 100.0)
            + 0.25 * rise_plausible
            + 0.25 * input.beat_confidence)
            .clamp(0.0, 1.0);
        self.quality = input.quality.total;

        self.systolic.update(sys, self.confidence);
        self.diastolic.update(dia, self.confidence);
    }

    fn result(&self) -> Option<ChannelResult> {
        let sys = self.systolic.value()?;
        let dia = self.diastolic.value()?;
        if self.confidence < self.min_confidence {
            return None;
        }
        Some(ChannelResult {
            value: ChannelValue::Text(format!("{:.0}/{:.0}", sys, dia)),
            confidence: self.confidence,
            quality: self.quality,
        })
    }

    fn reset(&mut self) {
        self.ac_ring.clear();
        self.systolic.reset();
        self.diastolic.reset();
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

    fn channel() -> PressureChannel {
        PressureChannel::new(
            &ChannelTuning {
                min_confidence: 0.45,
                calibration: CalibrationFactor::default(),
            },
            90,
        )
    }

    #[test]
    fn renders_sys_dia_text() {
        let mut ch = channel();
        ch.process(&strong_input(0));
        let result = ch.result().expect("result withheld");
        match result.value {
            ChannelValue::Text(text) => {
                let parts: Vec<&str> = text.split('/').collect();
                assert_eq!(parts.len(), 2);
                let sys: f32 = parts[0].parse().unwrap();
                let dia: f32 = parts[1].parse().unwrap();
                assert!((SYS_MIN..=SYS_MAX).contains(&sys), "sys {}", sys);
                assert!((DIA_MIN..=DIA_MAX).contains(&dia), "dia {}", dia);
                assert!(dia < sys);
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
    fn calibration_shifts_systolic() {
        let mut base = channel();
        let mut shifted = channel();
        shifted.set_calibration(CalibrationFactor {
            scale: 1.0,
            offset: 10.0,
        });
        base.process(&strong_input(0));
        shifted.process(&strong_input(0));
        let s0 = base.systolic().unwrap();
        let s1 = shifted.systolic().unwrap();
        assert!((s1 - s0 - 10.0).abs() < 1.0, "s0 {} s1 {}", s0, s1);
    }
}
