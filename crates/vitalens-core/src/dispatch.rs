//! Priority-aware channel dispatch.
//!
//! Each dispatch cycle is classified High/Medium/Low from beat confidence
//! and signal amplitude, then serviced against per-priority token budgets
//! refilled per wall-clock second. Work exceeding the budget is requeued
//! for the next cycle. The requeue ring is bounded by `queue_cap`, so under
//! sustained overload the oldest entries are shed with a warning; dispatch
//! inputs are per-cycle snapshots, and a fresher one always supersedes an
//! aged one of the same priority.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::channels::{ChannelInput, ChannelSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Token budgets per priority tier, refilled per second.
    pub high_budget_per_sec: u32,
    pub medium_budget_per_sec: u32,
    pub low_budget_per_sec: u32,
    /// Samples between dispatch cycles on the engine's cadence.
    pub cadence_samples: u32,
    /// Bounded requeue depth.
    pub queue_cap: usize,
    /// Classification cut lines.
    pub high_beat_confidence: f32,
    pub high_amplitude: f32,
    pub medium_amplitude: f32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            high_budget_per_sec: 30,
            medium_budget_per_sec: 10,
            low_budget_per_sec: 5,
            cadence_samples: 10,
            queue_cap: 16,
            high_beat_confidence: 0.7,
            high_amplitude: 0.02,
            medium_amplitude: 0.005,
        }
    }
}

/// Continuous-refill token bucket.
#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f32,
    capacity: f32,
    refill_per_sec: f32,
    last_refill_us: Option<i64>,
}

impl TokenBucket {
    fn new(per_sec: u32) -> Self {
        Self {
            tokens: per_sec as f32,
            capacity: per_sec as f32,
            refill_per_sec: per_sec as f32,
            last_refill_us: None,
        }
    }

    fn refill(&mut self, now_us: i64) {
        if let Some(last) = self.last_refill_us {
            let dt_sec = ((now_us - last).max(0) as f32) / 1e6;
            self.tokens = (self.tokens + dt_sec * self.refill_per_sec).min(self.capacity);
        }
        self.last_refill_us = Some(now_us);
    }

    fn try_take(&mut self) -> bool {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

struct DispatchJob {
    input: ChannelInput,
    priority: Priority,
}

pub struct ChannelDispatcher {
    cfg: DispatchConfig,
    high: TokenBucket,
    medium: TokenBucket,
    low: TokenBucket,
    queue: VecDeque<DispatchJob>,
    /// Jobs that overflowed the bounded queue, for observability.
    shed_count: u64,
}

impl ChannelDispatcher {
    pub fn new(cfg: DispatchConfig) -> Self {
        let high = TokenBucket::new(cfg.high_budget_per_sec);
        let medium = TokenBucket::new(cfg.medium_budget_per_sec);
        let low = TokenBucket::new(cfg.low_budget_per_sec);
        Self {
            cfg,
            high,
            medium,
            low,
            queue: VecDeque::new(),
            shed_count: 0,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.cfg
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn shed_count(&self) -> u64 {
        self.shed_count
    }

    /// Classify a dispatch input from beat confidence and window amplitude.
    pub fn classify(&self, input: &ChannelInput) -> Priority {
        let max = input.ac_window.iter().cloned().fold(f32::MIN, f32::max);
        let min = input.ac_window.iter().cloned().fold(f32::MAX, f32::min);
        let amplitude = if input.ac_window.is_empty() { 0.0 } else { max - min };

        if input.beat_confidence >= self.cfg.high_beat_confidence
            && amplitude >= self.cfg.high_amplitude
        {
            Priority::High
        } else if amplitude >= self.cfg.medium_amplitude {
            Priority::Medium
        } else {
            Priority::Low
        }
    }

    /// Enqueue this cycle's input and service the queue against the
    /// per-priority budgets. Returns the number of jobs fanned out.
    pub fn dispatch(
        &mut self,
        input: ChannelInput,
        channels: &mut ChannelSet,
        now_us: i64,
    ) -> usize {
        let priority = self.classify(&input);
        if self.queue.len() == self.cfg.queue_cap.max(1) {
            // Shed the oldest entry, never fresh work
            self.queue.pop_front();
            self.shed_count += 1;
            log::warn!("dispatch queue full, shed oldest job (total {})", self.shed_count);
        }
        self.queue.push_back(DispatchJob { input, priority });

        self.high.refill(now_us);
        self.medium.refill(now_us);
        self.low.refill(now_us);

        let mut serviced = 0;
        let mut requeue: VecDeque<DispatchJob> = VecDeque::new();
        while let Some(job) = self.queue.pop_front() {
            let bucket = match job.priority {
                Priority::High => &mut self.high,
                Priority::Medium => &mut self.medium,
                Priority::Low => &mut self.low,
            };
            if bucket.try_take() {
                for channel in channels.all_mut() {
                    channel.process(&job.input);
                }
                serviced += 1;
            } else {
                // Out of budget this second: requeue for the next cycle
                requeue.push_back(job);
            }
        }
        self.queue = requeue;
        serviced
    }

    pub fn reset(&mut self) {
        self.high = TokenBucket::new(self.cfg.high_budget_per_sec);
        self.medium = TokenBucket::new(self.cfg.medium_budget_per_sec);
        self.low = TokenBucket::new(self.cfg.low_budget_per_sec);
        self.queue.clear();
        self.shed_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::test_util::{strong_input, weak_input};
    use crate::channels::{ChannelSet, VitalChannel};
    use crate::config::ChannelsConfig;

    fn channels() -> ChannelSet {
        ChannelSet::from_config(&ChannelsConfig::default())
    }

    #[test]
    fn strong_beats_classify_high() {
        let dispatcher = ChannelDispatcher::new(DispatchConfig::default());
        assert_eq!(dispatcher.classify(&strong_input(0)), Priority::High);
    }

    #[test]
    fn weak_signal_classifies_low() {
        let dispatcher = ChannelDispatcher::new(DispatchConfig::default());
        assert_eq!(dispatcher.classify(&weak_input(0)), Priority::Low);
    }

    #[test]
    fn dispatch_feeds_channels() {
        let mut dispatcher = ChannelDispatcher::new(DispatchConfig::default());
        let mut set = channels();
        let serviced = dispatcher.dispatch(strong_input(0), &mut set, 0);
        assert_eq!(serviced, 1);
        assert!(set.heart_rate.result().is_some());
    }

    #[test]
    fn over_budget_work_is_requeued_not_dropped() {
        let cfg = DispatchConfig {
            low_budget_per_sec: 1,
            ..DispatchConfig::default()
        };
        let mut dispatcher = ChannelDispatcher::new(cfg);
        let mut set = channels();

        // Two low-priority jobs in the same instant: budget 1/s serves one
        let first = dispatcher.dispatch(weak_input(0), &mut set, 0);
        let second = dispatcher.dispatch(weak_input(1), &mut set, 0);
        assert_eq!(first, 1);
        assert_eq!(second, 0);
        assert_eq!(dispatcher.pending(), 1);

        // A second later the bucket has one fresh token; the queued job
        // runs first (FIFO) and the newest input waits its turn
        let third = dispatcher.dispatch(weak_input(2), &mut set, 1_000_000);
        assert_eq!(third, 1);
        assert_eq!(dispatcher.pending(), 1);
    }

    #[test]
    fn queue_overflow_sheds_oldest() {
        let cfg = DispatchConfig {
            low_budget_per_sec: 1,
            queue_cap: 2,
            ..DispatchConfig::default()
        };
        let mut dispatcher = ChannelDispatcher::new(cfg);
        let mut set = channels();
        for i in 0..6 {
            dispatcher.dispatch(weak_input(i), &mut set, 0);
        }
        assert!(dispatcher.pending() <= 2);
        assert!(dispatcher.shed_count() > 0);
    }
}
