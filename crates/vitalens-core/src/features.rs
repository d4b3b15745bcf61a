//! Pulse-waveform feature extraction over an AC window snapshot.
//!
//! Channels derive their estimates from these morphology features rather
//! than from raw samples: perfusion index, rise/fall time around the
//! dominant peak, dicrotic-notch position and prominence, area under the
//! curve and spread.

use serde::{Deserialize, Serialize};

const EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseFeatures {
    /// AC peak-to-peak over DC baseline, a pulse-strength proxy.
    pub perfusion_index: f32,
    pub peak_to_peak: f32,
    pub stddev: f32,
    /// Mean absolute AC value, an area-under-curve proxy per sample.
    pub auc: f32,
    /// Foot-to-peak and peak-to-foot times around the dominant peak (ms).
    pub rise_time_ms: f32,
    pub fall_time_ms: f32,
    /// Dicrotic notch position within the falling edge (0 = at peak,
    /// 1 = at the following foot), when one is found.
    pub notch_position: Option<f32>,
    /// Notch depth relative to peak-to-peak amplitude.
    pub notch_prominence: f32,
}

impl PulseFeatures {
    /// Extract features from an AC window. Returns `None` when the window is
    /// too short or carries no usable pulse.
    pub fn extract(window: &[f32], dc_baseline: f32, sample_rate: f32) -> Option<Self> {
        if window.len() < 8 || sample_rate <= 0.0 {
            return None;
        }

        let max = window.iter().cloned().fold(f32::MIN, f32::max);
        let min = window.iter().cloned().fold(f32::MAX, f32::min);
        let peak_to_peak = max - min;
        if peak_to_peak < EPSILON {
            return None;
        }

        let mean = window.iter().sum::<f32>() / window.len() as f32;
        let var = window.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / window.len() as f32;
        let stddev = var.sqrt();
        let auc = window.iter().map(|v| v.abs()).sum::<f32>() / window.len() as f32;
        let perfusion_index = peak_to_peak / dc_baseline.abs().max(EPSILON);

        let ms_per_sample = 1000.0 / sample_rate;
        let peak_idx = argmax(window);
        let left_foot = falling_min_left(window, peak_idx);
        let right_foot = rising_min_right(window, peak_idx);

        let rise_time_ms = (peak_idx - left_foot) as f32 * ms_per_sample;
        let fall_time_ms = (right_foot - peak_idx) as f32 * ms_per_sample;

        let (notch_position, notch_prominence) =
            find_dicrotic_notch(window, peak_idx, right_foot, peak_to_peak);

        Some(Self {
            perfusion_index,
            peak_to_peak,
            stddev,
            auc,
            rise_time_ms,
            fall_time_ms,
            notch_position,
            notch_prominence,
        })
    }
}

fn argmax(window: &[f32]) -> usize {
    let mut idx = 0;
    let mut best = f32::MIN;
    for (i, &v) in window.iter().enumerate() {
        if v > best {
            best = v;
            idx = i;
        }
    }
    idx
}

/// Walk left from the peak to the preceding local minimum (the pulse foot).
fn falling_min_left(window: &[f32], peak_idx: usize) -> usize {
    let mut i = peak_idx;
    while i > 0 && window[i - 1] <= window[i] {
        i -= 1;
    }
    i
}

/// Walk right from the peak to the following local minimum.
fn rising_min_right(window: &[f32], peak_idx: usize) -> usize {
    let mut i = peak_idx;
    while i + 1 < window.len() && window[i + 1] <= window[i] {
        i += 1;
    }
    i
}

/// Search the falling edge for a local minimum followed by a secondary bump.
/// Returns (position within the falling edge, prominence vs peak-to-peak).
fn find_dicrotic_notch(
    window: &[f32],
    peak_idx: usize,
    right_foot: usize,
    peak_to_peak: f32,
) -> (Option<f32>, f32) {
    // The straight descent found by rising_min_right has no inflection;
    // scan a wider span to the end of the window for a notch + rebound.
    let span_end = window.len() - 1;
    if peak_idx + 2 >= span_end {
        return (None, 0.0);
    }

    let mut notch_idx = None;
    for i in (peak_idx + 1)..span_end {
        if window[i] < window[i - 1] && window[i] <= window[i + 1] {
            // Candidate minimum; require a rebound afterwards
            let rebound = window[i + 1..=span_end.min(i + 5)]
                .iter()
                .cloned()
                .fold(f32::MIN, f32::max);
            if rebound > window[i] + 0.02 * peak_to_peak {
                notch_idx = Some(i);
                break;
            }
        }
    }

    match notch_idx {
        Some(i) => {
            let edge_len = (right_foot.max(i + 1) - peak_idx) as f32;
            let position = ((i - peak_idx) as f32 / edge_len.max(1.0)).clamp(0.0, 1.0);
            let prominence = ((window[peak_idx] - window[i]) / peak_to_peak).clamp(0.0, 1.0);
            (Some(position), prominence)
        }
        None => (None, 0.0),
    }
}
