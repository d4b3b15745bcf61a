//! Hysteretic finger-presence state machine.
//!
//! NoFinger -> Possible -> Detected -> Stable, with symmetric one-step
//! downgrade edges. Upgrades demand sustained evidence (a valid-sample
//! counter plus a real-time confirmation window); downgrades fire
//! immediately on disqualification but only step down one state, so a
//! single bad sample never flips Detected back to NoFinger.

use serde::{Deserialize, Serialize};
use vitalens_signals::QualityScore;

const EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceState {
    NoFinger,
    Possible,
    Detected,
    Stable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceStatus {
    pub state: PresenceState,
    pub confidence: f32,
    pub time_in_state_ms: i64,
    /// True for Detected and Stable.
    pub finger_detected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Peak-to-peak amplitude floor below which a sample counts as weak.
    pub amp_floor: f32,
    /// Consecutive weak samples required before the weak flag flips on.
    pub weak_debounce: usize,
    /// Physiological band for the variance-normalized range (pp / stddev).
    pub shape_ratio_min: f32,
    pub shape_ratio_max: f32,
    /// Valid-sample counter dynamics: growth beats decay (asymmetric
    /// hysteresis) and the counter saturates at `valid_cap`.
    pub valid_increment: f32,
    pub valid_decay: f32,
    pub valid_cap: f32,
    pub valid_threshold: f32,
    /// Quality bars. The downgrade bar sits below the entry bar.
    pub quality_possible: f32,
    pub quality_downgrade: f32,
    pub quality_stable: f32,
    /// Real-time confirmation windows (ms).
    pub confirm_ms: u64,
    pub stable_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            amp_floor: 0.01,
            weak_debounce: 5,
            shape_ratio_min: 1.5,
            shape_ratio_max: 6.0,
            valid_increment: 1.0,
            valid_decay: 0.35,
            valid_cap: 150.0,
            valid_threshold: 40.0,
            quality_possible: 15.0,
            quality_downgrade: 10.0,
            quality_stable: 60.0,
            confirm_ms: 2500,
            stable_ms: 3000,
        }
    }
}

pub struct PresenceDetector {
    cfg: PresenceConfig,
    state: PresenceState,
    state_entered_us: Option<i64>,
    weak_streak: usize,
    valid_counter: f32,
    candidate_since_us: Option<i64>,
    stable_since_us: Option<i64>,
}

impl PresenceDetector {
    pub fn new() -> Self {
        Self::with_config(PresenceConfig::default())
    }

    pub fn with_config(cfg: PresenceConfig) -> Self {
        Self {
            cfg,
            state: PresenceState::NoFinger,
            state_entered_us: None,
            weak_streak: 0,
            valid_counter: 0.0,
            candidate_since_us: None,
            stable_since_us: None,
        }
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = PresenceState::NoFinger;
        self.state_entered_us = None;
        self.weak_streak = 0;
        self.valid_counter = 0.0;
        self.candidate_since_us = None;
        self.stable_since_us = None;
    }

    /// Evaluate one tick against the recent filtered window and its quality.
    pub fn update(
        &mut self,
        window: &[f32],
        quality: &QualityScore,
        now_us: i64,
    ) -> PresenceStatus {
        let entered = *self.state_entered_us.get_or_insert(now_us);

        let (peak_to_peak, std) = window_stats(window);
        let weak_sample = peak_to_peak < self.cfg.amp_floor;
        if weak_sample {
            self.weak_streak += 1;
        } else {
            self.weak_streak = 0;
        }
        let weak = self.weak_streak >= self.cfg.weak_debounce;

        let shape_ratio = peak_to_peak / (std + EPSILON);
        let in_band = !weak_sample
            && shape_ratio >= self.cfg.shape_ratio_min
            && shape_ratio <= self.cfg.shape_ratio_max;

        let valid_sample = in_band && quality.total >= self.cfg.quality_possible;
        if valid_sample {
            self.valid_counter =
                (self.valid_counter + self.cfg.valid_increment).min(self.cfg.valid_cap);
        } else {
            self.valid_counter = (self.valid_counter - self.cfg.valid_decay).max(0.0);
        }

        let next = self.next_state(weak, in_band, quality.total, now_us);
        if next != self.state {
            log::debug!(
                "presence {:?} -> {:?} (counter {:.1}, quality {:.0})",
                self.state,
                next,
                self.valid_counter,
                quality.total
            );
            self.state = next;
            self.state_entered_us = Some(now_us);
            if next == PresenceState::Possible {
                self.candidate_since_us = Some(now_us);
            }
            if next != PresenceState::Detected {
                self.stable_since_us = None;
            }
        }

        let time_in_state_ms = (now_us - self.state_entered_us.unwrap_or(entered)) / 1000;
        let saturation = (self.valid_counter / (2.0 * self.cfg.valid_threshold)).clamp(0.0, 1.0);
        let confidence = (0.5 * saturation + 0.5 * (quality.total / 100.0)).clamp(0.0, 1.0);

        PresenceStatus {
            state: self.state,
            confidence,
            time_in_state_ms,
            finger_detected: matches!(self.state, PresenceState::Detected | PresenceState::Stable),
        }
    }

    fn next_state(&mut self, weak: bool, in_band: bool, quality: f32, now_us: i64) -> PresenceState {
        match self.state {
            PresenceState::NoFinger => {
                if !weak && quality >= self.cfg.quality_possible {
                    PresenceState::Possible
                } else {
                    PresenceState::NoFinger
                }
            }
            PresenceState::Possible => {
                if weak {
                    PresenceState::NoFinger
                } else {
                    let confirmed = self
                        .candidate_since_us
                        .map(|since| now_us - since >= self.cfg.confirm_ms as i64 * 1000)
                        .unwrap_or(false);
                    if confirmed && in_band && self.valid_counter >= self.cfg.valid_threshold {
                        PresenceState::Detected
                    } else {
                        PresenceState::Possible
                    }
                }
            }
            PresenceState::Detected => {
                if weak || quality < self.cfg.quality_downgrade {
                    self.candidate_since_us = Some(now_us);
                    PresenceState::Possible
                } else if quality >= self.cfg.quality_stable {
                    let since = *self.stable_since_us.get_or_insert(now_us);
                    if now_us - since >= self.cfg.stable_ms as i64 * 1000 {
                        PresenceState::Stable
                    } else {
                        PresenceState::Detected
                    }
                } else {
                    self.stable_since_us = None;
                    PresenceState::Detected
                }
            }
            PresenceState::Stable => {
                if weak || quality < self.cfg.quality_downgrade {
                    PresenceState::Detected
                } else {
                    PresenceState::Stable
                }
            }
        }
    }
}

impl Default for PresenceDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn window_stats(window: &[f32]) -> (f32, f32) {
    if window.is_empty() {
        return (0.0, 0.0);
    }
    let max = window.iter().cloned().fold(f32::MIN, f32::max);
    let min = window.iter().cloned().fold(f32::MAX, f32::min);
    let mean = window.iter().sum::<f32>() / window.len() as f32;
    let var = window.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / window.len() as f32;
    (max - min, var.sqrt())
}
