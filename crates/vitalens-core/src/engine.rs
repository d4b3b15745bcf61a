//! Engine orchestration: the synchronous per-sample path and the decoupled
//! channel dispatch cadence.
//!
//! `ingest` runs conditioning, beat detection, spectral and quality updates,
//! and the presence state machine for every raw sample. Channel math runs on
//! the dispatch cadence (default every 10 samples) against owned window
//! snapshots, so slow estimators never stretch the tick path.

use std::collections::VecDeque;

use vitalens_signals::{
    Beat, ConditionedSample, HrvAnalyzer, HrvMetrics, PeakDetector, PeakOracle, QualityScore,
    QualityScorer, RrHistory, Sample, SignalConditioner, SpectralAnalyzer,
};

use crate::channels::{ChannelInput, ChannelSet};
use crate::config::{CalibrationFactor, MonitorConfig};
use crate::dispatch::ChannelDispatcher;
use crate::error::ConfigError;
use crate::presence::{PresenceDetector, PresenceState, PresenceStatus};
use crate::snapshot::VitalSignsSnapshot;

/// Everything the per-sample path produced for one raw sample.
#[derive(Debug, Clone)]
pub struct TickOutput {
    pub conditioned: ConditionedSample,
    pub beat: Option<Beat>,
    pub quality: QualityScore,
    pub presence: PresenceStatus,
}

pub struct VitalsEngine {
    cfg: MonitorConfig,
    conditioner: SignalConditioner,
    detector: PeakDetector,
    rr: RrHistory,
    hrv: HrvAnalyzer,
    spectral: SpectralAnalyzer,
    quality: QualityScorer,
    presence: PresenceDetector,
    dispatcher: ChannelDispatcher,
    channels: ChannelSet,
    ac_window: VecDeque<f32>,
    last_dc: f32,
    last_beat_confidence: f32,
    last_beat_us: Option<i64>,
    last_quality: QualityScore,
    last_presence: PresenceStatus,
    last_hrv: HrvMetrics,
    snapshot: VitalSignsSnapshot,
    samples_since_dispatch: u32,
    samples_ingested: u64,
}

impl VitalsEngine {
    pub fn new() -> Self {
        Self::with_config(MonitorConfig::default())
    }

    pub fn with_config(mut cfg: MonitorConfig) -> Self {
        // One sample clock for the whole engine; the spectral window
        // inherits it rather than carrying an independent rate.
        cfg.spectral.sample_rate = cfg.sample_rate;
        let buffer_size = cfg.channels.buffer_size.max(1);
        Self {
            conditioner: SignalConditioner::with_config(cfg.conditioner.clone()),
            detector: PeakDetector::with_config(cfg.detector.clone()),
            rr: RrHistory::new(),
            hrv: HrvAnalyzer::with_config(cfg.hrv.clone()),
            spectral: SpectralAnalyzer::with_config(cfg.spectral.clone()),
            quality: QualityScorer::with_config(cfg.quality.clone()),
            presence: PresenceDetector::with_config(cfg.presence.clone()),
            dispatcher: ChannelDispatcher::new(cfg.dispatch.clone()),
            channels: ChannelSet::from_config(&cfg.channels),
            ac_window: VecDeque::with_capacity(buffer_size),
            last_dc: 0.0,
            last_beat_confidence: 0.0,
            last_beat_us: None,
            last_quality: QualityScore::zero(0),
            last_presence: idle_presence(),
            last_hrv: HrvMetrics::insufficient(),
            snapshot: VitalSignsSnapshot::empty(0),
            samples_since_dispatch: 0,
            samples_ingested: 0,
            cfg,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.cfg
    }

    /// Latest aggregate output, rebuilt on each dispatch cycle.
    pub fn snapshot(&self) -> &VitalSignsSnapshot {
        &self.snapshot
    }

    pub fn presence_state(&self) -> PresenceState {
        self.presence.state()
    }

    pub fn rr_history(&self) -> &RrHistory {
        &self.rr
    }

    pub fn hrv(&self) -> &HrvMetrics {
        &self.last_hrv
    }

    pub fn samples_ingested(&self) -> u64 {
        self.samples_ingested
    }

    /// Attach an optional ML peak oracle. Absent by default; detection is
    /// fully functional without it.
    pub fn set_oracle(&mut self, oracle: Box<dyn PeakOracle>) {
        self.detector.set_oracle(oracle);
    }

    /// Update one channel's calibration against an external reference
    /// reading. Out-of-range factors are clamped, unknown names rejected.
    pub fn set_calibration(
        &mut self,
        channel: &str,
        calibration: CalibrationFactor,
    ) -> Result<(), ConfigError> {
        use crate::channels::VitalChannel;
        for target in self.channels.all_mut() {
            if target.name() == channel {
                target.set_calibration(calibration);
                return Ok(());
            }
        }
        Err(ConfigError::Validation(format!(
            "unknown channel '{}'",
            channel
        )))
    }

    /// Process one raw sample through the synchronous path. Runs a dispatch
    /// cycle when the cadence is due.
    pub fn ingest(&mut self, sample: Sample) -> TickOutput {
        let conditioned = self.conditioner.condition(sample);
        self.last_dc = conditioned.dc_baseline;

        self.spectral.update(conditioned.filtered);
        if self.ac_window.len() == self.cfg.channels.buffer_size.max(1) {
            self.ac_window.pop_front();
        }
        self.ac_window.push_back(conditioned.filtered);

        let beat = self.detector.detect(&conditioned);
        if let Some(b) = &beat {
            self.last_beat_confidence = b.confidence;
            self.last_beat_us = Some(b.timestamp_us);
            if let Some(rr_ms) = b.rr_interval_ms {
                self.rr.push(rr_ms);
            }
        } else if let Some(last) = self.last_beat_us {
            // Once the silence exceeds the plausible RR range, the stored
            // confidence describes a beat that may never return. Fade it so
            // dispatch priority and channel gating track the signal loss.
            let gap_ms = (sample.timestamp_us - last) as f32 / 1000.0;
            if gap_ms > self.cfg.detector.max_rr_ms {
                self.last_beat_confidence *= 0.95;
            }
        }

        let window: &[f32] = self.ac_window.make_contiguous();
        let spectrum = self.spectral.spectrum();
        let quality = self
            .quality
            .score(window, spectrum, &self.rr, self.detector.oracle_score());
        let presence = self.presence.update(window, &quality, sample.timestamp_us);

        self.last_quality = quality.clone();
        self.last_presence = presence.clone();
        self.samples_ingested += 1;

        self.samples_since_dispatch += 1;
        if self.samples_since_dispatch >= self.cfg.dispatch.cadence_samples.max(1) {
            self.dispatch(sample.timestamp_us);
        }

        TickOutput {
            conditioned,
            beat,
            quality,
            presence,
        }
    }

    /// Run one dispatch cycle now: snapshot the windows, fan out to the
    /// channels under the priority budgets, rebuild the aggregate snapshot.
    pub fn dispatch(&mut self, now_us: i64) {
        self.samples_since_dispatch = 0;

        let input = ChannelInput {
            timestamp_us: now_us,
            ac_window: self.ac_window.iter().copied().collect(),
            dc_baseline: self.last_dc,
            rr_intervals: self.rr.to_vec(),
            quality: self.last_quality.clone(),
            beat_confidence: self.last_beat_confidence,
            sample_rate: self.cfg.sample_rate,
        };
        self.dispatcher.dispatch(input, &mut self.channels, now_us);

        self.last_hrv = self.hrv.analyze(&self.rr);
        self.snapshot = VitalSignsSnapshot::build(
            now_us,
            &self.channels,
            &self.last_hrv,
            self.last_quality.total,
            self.last_presence.finger_detected,
        );
    }

    /// Clear every component for a fresh session. Calibration factors
    /// persist; in-flight oracle work is invalidated via the bridge epoch.
    /// Safe to call repeatedly.
    pub fn reset(&mut self) {
        self.conditioner.reset();
        self.detector.reset();
        self.rr.clear();
        self.spectral.reset();
        self.presence.reset();
        self.dispatcher.reset();
        self.channels.reset();
        self.ac_window.clear();
        self.last_dc = 0.0;
        self.last_beat_confidence = 0.0;
        self.last_beat_us = None;
        self.last_quality = QualityScore::zero(0);
        self.last_presence = idle_presence();
        self.last_hrv = HrvMetrics::insufficient();
        self.snapshot = VitalSignsSnapshot::empty(0);
        self.samples_since_dispatch = 0;
        self.samples_ingested = 0;
        log::info!("engine reset, calibration retained");
    }
}

impl Default for VitalsEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn idle_presence() -> PresenceStatus {
    PresenceStatus {
        state: PresenceState::NoFinger,
        confidence: 0.0,
        time_in_state_ms: 0,
        finger_detected: false,
    }
}
