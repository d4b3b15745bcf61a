//! Core value types shared across the signal path.
//!
//! Every component owns its buffers; data crosses component boundaries only
//! as the value types defined here.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One raw optical intensity sample, produced once per camera frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp_us: i64,
    /// Mean pixel intensity, roughly in [0, 1].
    pub raw: f32,
}

/// Output of the conditioning cascade for a single sample.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConditionedSample {
    pub timestamp_us: i64,
    /// Pulsatile component: raw minus the tracked DC baseline.
    pub ac: f32,
    /// Slowly varying baseline, dual-rate smoothed.
    pub dc_baseline: f32,
    /// AC after the median / adaptive low-pass / triangular cascade.
    pub filtered: f32,
}

/// A detected heartbeat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Beat {
    pub timestamp_us: i64,
    pub peak_value: f32,
    /// Detection confidence in [0, 1].
    pub confidence: f32,
    /// Interval since the previous beat. `None` when the gap was too long
    /// to be a trustworthy interval.
    pub rr_interval_ms: Option<f32>,
}

/// Bounded, insertion-ordered ring of RR intervals.
///
/// Values outside the physiological window are discarded at the door and
/// never stored, so downstream statistics can trust the contents.
#[derive(Debug, Clone)]
pub struct RrHistory {
    intervals: VecDeque<f32>,
    capacity: usize,
    min_ms: f32,
    max_ms: f32,
}

impl RrHistory {
    pub const DEFAULT_CAPACITY: usize = 20;
    pub const MIN_RR_MS: f32 = 250.0;
    pub const MAX_RR_MS: f32 = 1500.0;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            intervals: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            min_ms: Self::MIN_RR_MS,
            max_ms: Self::MAX_RR_MS,
        }
    }

    /// Push an interval, evicting the oldest entry when at capacity.
    /// Returns `false` when the value was out of range and discarded.
    pub fn push(&mut self, rr_ms: f32) -> bool {
        if !rr_ms.is_finite() || rr_ms < self.min_ms || rr_ms > self.max_ms {
            return false;
        }
        if self.intervals.len() == self.capacity {
            self.intervals.pop_front();
        }
        self.intervals.push_back(rr_ms);
        true
    }

    pub fn latest(&self) -> Option<f32> {
        self.intervals.back().copied()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn clear(&mut self) {
        self.intervals.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        self.intervals.iter().copied()
    }

    /// Owned copy, oldest first. Used for window snapshots handed to
    /// decoupled consumers.
    pub fn to_vec(&self) -> Vec<f32> {
        self.intervals.iter().copied().collect()
    }

    /// Mean of the stored intervals, `None` when empty.
    pub fn mean_ms(&self) -> Option<f32> {
        if self.intervals.is_empty() {
            return None;
        }
        Some(self.intervals.iter().sum::<f32>() / self.intervals.len() as f32)
    }
}

impl Default for RrHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rr_history_discards_out_of_range() {
        let mut rr = RrHistory::new();
        assert!(!rr.push(100.0));
        assert!(!rr.push(2400.0));
        assert!(!rr.push(f32::NAN));
        assert!(rr.push(800.0));
        assert_eq!(rr.len(), 1);
        assert!(rr.iter().all(|v| (250.0..=1500.0).contains(&v)));
    }

    #[test]
    fn rr_history_bounded() {
        let mut rr = RrHistory::with_capacity(5);
        for i in 0..20 {
            rr.push(600.0 + i as f32);
        }
        assert_eq!(rr.len(), 5);
        // Oldest entries evicted, insertion order preserved
        assert_eq!(rr.latest(), Some(619.0));
        let v = rr.to_vec();
        assert_eq!(v[0], 615.0);
    }

    #[test]
    fn rr_history_mean() {
        let mut rr = RrHistory::new();
        assert!(rr.mean_ms().is_none());
        rr.push(700.0);
        rr.push(900.0);
        assert_eq!(rr.mean_ms(), Some(800.0));
    }
}
