//! Vital-sign channels: independently stateful, confidence-gated
//! estimators fed by the dispatcher.
//!
//! Every channel owns its buffers, derives features from an immutable
//! window snapshot, clamps its estimate to a physiological range, and
//! withholds the result below its confidence gate. Withholding ("no
//! estimate", a sentinel at the snapshot layer) is distinct from a
//! confidently reported zero.

mod arrhythmia;
mod heart_rate;
mod metabolic;
mod pressure;
mod spo2;

pub use arrhythmia::{ArrhythmiaChannel, ArrhythmiaStatus};
pub use heart_rate::HeartRateChannel;
pub use metabolic::{MetabolicChannel, MetabolicKind};
pub use pressure::PressureChannel;
pub use spo2::Spo2Channel;

use serde::{Deserialize, Serialize};
use vitalens_signals::QualityScore;

use crate::config::{CalibrationFactor, ChannelsConfig};

/// Immutable per-dispatch input. Owned copies only, never references into
/// live buffers, so channels may run on a decoupled cadence or thread.
#[derive(Debug, Clone)]
pub struct ChannelInput {
    pub timestamp_us: i64,
    /// Snapshot of the recent filtered AC window.
    pub ac_window: Vec<f32>,
    pub dc_baseline: f32,
    /// Snapshot of the RR history, oldest first.
    pub rr_intervals: Vec<f32>,
    pub quality: QualityScore,
    /// Confidence of the most recent beat, zero when none seen yet.
    pub beat_confidence: f32,
    pub sample_rate: f32,
}

/// The value carried by a channel result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChannelValue {
    Numeric(f32),
    /// Rendered text, e.g. "118/76" for blood pressure.
    Text(String),
    Classification(ArrhythmiaStatus),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelResult {
    pub value: ChannelValue,
    pub confidence: f32,
    /// Signal quality backing the estimate, 0-100.
    pub quality: f32,
}

/// Common channel interface used by the dispatcher.
pub trait VitalChannel {
    fn name(&self) -> &'static str;
    fn min_confidence(&self) -> f32;
    /// Consume one dispatch input and update internal state.
    fn process(&mut self, input: &ChannelInput);
    /// Latest gated result. `None` means "no estimate", rendered as the
    /// channel's sentinel downstream.
    fn result(&self) -> Option<ChannelResult>;
    /// Clear session state. Calibration factors persist.
    fn reset(&mut self);
    fn set_calibration(&mut self, calibration: CalibrationFactor);
}

/// Confidence-weighted exponential smoothing for channel outputs.
/// High-confidence updates move the estimate faster.
#[derive(Debug, Clone, Default)]
pub struct ConfidenceEma {
    value: Option<f32>,
    base_alpha: f32,
}

impl ConfidenceEma {
    pub fn new(base_alpha: f32) -> Self {
        Self {
            value: None,
            base_alpha,
        }
    }

    pub fn update(&mut self, sample: f32, confidence: f32) -> f32 {
        let alpha = (self.base_alpha * confidence.clamp(0.0, 1.0)).clamp(0.01, 1.0);
        let next = match self.value {
            Some(prev) => prev + alpha * (sample - prev),
            None => sample,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<f32> {
        self.value
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}

/// All channels of a monitoring session, owned as concrete instances.
pub struct ChannelSet {
    pub heart_rate: HeartRateChannel,
    pub spo2: Spo2Channel,
    pub pressure: PressureChannel,
    pub glucose: MetabolicChannel,
    pub lipids: MetabolicChannel,
    pub hemoglobin: MetabolicChannel,
    pub hydration: MetabolicChannel,
    pub arrhythmia: ArrhythmiaChannel,
}

impl ChannelSet {
    pub fn from_config(cfg: &ChannelsConfig) -> Self {
        Self {
            heart_rate: HeartRateChannel::new(&cfg.heart_rate),
            spo2: Spo2Channel::new(&cfg.spo2, cfg.buffer_size),
            pressure: PressureChannel::new(&cfg.pressure, cfg.buffer_size),
            glucose: MetabolicChannel::new(MetabolicKind::Glucose, &cfg.glucose, cfg.buffer_size),
            lipids: MetabolicChannel::new(MetabolicKind::Lipids, &cfg.lipids, cfg.buffer_size),
            hemoglobin: MetabolicChannel::new(
                MetabolicKind::Hemoglobin,
                &cfg.hemoglobin,
                cfg.buffer_size,
            ),
            hydration: MetabolicChannel::new(
                MetabolicKind::Hydration,
                &cfg.hydration,
                cfg.buffer_size,
            ),
            arrhythmia: ArrhythmiaChannel::new(&cfg.arrhythmia),
        }
    }

    pub fn all_mut(&mut self) -> [&mut dyn VitalChannel; 8] {
        [
            &mut self.heart_rate,
            &mut self.spo2,
            &mut self.pressure,
            &mut self.glucose,
            &mut self.lipids,
            &mut self.hemoglobin,
            &mut self.hydration,
            &mut self.arrhythmia,
        ]
    }

    pub fn reset(&mut self) {
        for channel in self.all_mut() {
            channel.reset();
        }
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use std::f32::consts::PI;

    /// A strong, clean dispatch input resembling a 75 bpm pulse.
    pub fn strong_input(timestamp_us: i64) -> ChannelInput {
        let ac_window: Vec<f32> = (0..90)
            .map(|i| 0.05 * (2.0 * PI * 1.25 * i as f32 / 30.0).sin())
            .collect();
        ChannelInput {
            timestamp_us,
            ac_window,
            dc_baseline: 0.5,
            rr_intervals: vec![800.0; 8],
            quality: QualityScore {
                total: 85.0,
                amplitude: 1.0,
                snr: 0.85,
                periodicity: 0.9,
                stability: 0.95,
                sample_count: 90,
            },
            beat_confidence: 0.9,
            sample_rate: 30.0,
        }
    }

    /// A weak, noisy input that should fail confidence gates.
    pub fn weak_input(timestamp_us: i64) -> ChannelInput {
        ChannelInput {
            timestamp_us,
            ac_window: vec![0.0003; 90],
            dc_baseline: 0.5,
            rr_intervals: vec![],
            quality: QualityScore::zero(90),
            beat_confidence: 0.1,
            sample_rate: 30.0,
        }
    }
}
