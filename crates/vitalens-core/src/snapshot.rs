//! Aggregate output for rendering/telemetry collaborators, rebuilt on
//! every dispatch cycle.
//!
//! Numeric fields are `None` when the owning channel withheld its result;
//! the text renderers map those to the UI sentinels ("--", "--/--"). A
//! present value of 0.0 therefore always means "confidently zero".

use serde::{Deserialize, Serialize};

use crate::channels::{ArrhythmiaStatus, ChannelResult, ChannelSet, ChannelValue, VitalChannel};
use vitalens_signals::HrvMetrics;

pub const NUMERIC_SENTINEL: &str = "--";
pub const PRESSURE_SENTINEL: &str = "--/--";

/// Per-field confidence, zero for withheld fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotConfidence {
    pub heart_rate: f32,
    pub spo2: f32,
    pub pressure: f32,
    pub glucose: f32,
    pub lipids: f32,
    pub hemoglobin: f32,
    pub hydration: f32,
    pub arrhythmia: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VitalSignsSnapshot {
    pub timestamp_us: i64,
    pub finger_detected: bool,
    /// Composite signal quality, 0-100.
    pub quality: f32,
    pub heart_rate_bpm: Option<f32>,
    pub average_bpm: Option<f32>,
    pub hrv_rmssd_ms: Option<f32>,
    pub spo2_percent: Option<f32>,
    /// "SYS/DIA" or the sentinel.
    pub pressure: String,
    pub arrhythmia_status: Option<ArrhythmiaStatus>,
    pub glucose_mg_dl: Option<f32>,
    pub lipids_mg_dl: Option<f32>,
    pub hemoglobin_g_dl: Option<f32>,
    pub hydration_percent: Option<f32>,
    pub confidence: SnapshotConfidence,
    pub overall_confidence: f32,
}

impl VitalSignsSnapshot {
    pub fn empty(timestamp_us: i64) -> Self {
        Self {
            timestamp_us,
            finger_detected: false,
            quality: 0.0,
            heart_rate_bpm: None,
            average_bpm: None,
            hrv_rmssd_ms: None,
            spo2_percent: None,
            pressure: PRESSURE_SENTINEL.to_string(),
            arrhythmia_status: None,
            glucose_mg_dl: None,
            lipids_mg_dl: None,
            hemoglobin_g_dl: None,
            hydration_percent: None,
            confidence: SnapshotConfidence::default(),
            overall_confidence: 0.0,
        }
    }

    /// Rebuild from the current channel results.
    pub fn build(
        timestamp_us: i64,
        channels: &ChannelSet,
        hrv: &HrvMetrics,
        quality_total: f32,
        finger_detected: bool,
    ) -> Self {
        let mut snapshot = Self::empty(timestamp_us);
        snapshot.finger_detected = finger_detected;
        snapshot.quality = quality_total;

        let mut gated: Vec<f32> = Vec::with_capacity(8);
        let mut take = |result: Option<ChannelResult>, slot: &mut f32| -> Option<ChannelValue> {
            let r = result?;
            *slot = r.confidence;
            gated.push(r.confidence);
            Some(r.value)
        };

        if let Some(ChannelValue::Numeric(bpm)) =
            take(channels.heart_rate.result(), &mut snapshot.confidence.heart_rate)
        {
            snapshot.heart_rate_bpm = Some(bpm);
            snapshot.average_bpm = channels.heart_rate.average_bpm();
        }
        if let Some(ChannelValue::Numeric(v)) =
            take(channels.spo2.result(), &mut snapshot.confidence.spo2)
        {
            snapshot.spo2_percent = Some(v);
        }
        if let Some(ChannelValue::Text(text)) =
            take(channels.pressure.result(), &mut snapshot.confidence.pressure)
        {
            snapshot.pressure = text;
        }
        if let Some(ChannelValue::Numeric(v)) =
            take(channels.glucose.result(), &mut snapshot.confidence.glucose)
        {
            snapshot.glucose_mg_dl = Some(v);
        }
        if let Some(ChannelValue::Numeric(v)) =
            take(channels.lipids.result(), &mut snapshot.confidence.lipids)
        {
            snapshot.lipids_mg_dl = Some(v);
        }
        if let Some(ChannelValue::Numeric(v)) =
            take(channels.hemoglobin.result(), &mut snapshot.confidence.hemoglobin)
        {
            snapshot.hemoglobin_g_dl = Some(v);
        }
        if let Some(ChannelValue::Numeric(v)) =
            take(channels.hydration.result(), &mut snapshot.confidence.hydration)
        {
            snapshot.hydration_percent = Some(v);
        }
        if let Some(ChannelValue::Classification(status)) =
            take(channels.arrhythmia.result(), &mut snapshot.confidence.arrhythmia)
        {
            snapshot.arrhythmia_status = Some(status);
        }

        if !hrv.is_insufficient() {
            snapshot.hrv_rmssd_ms = Some(hrv.rmssd_ms);
        }

        snapshot.overall_confidence = if gated.is_empty() {
            0.0
        } else {
            gated.iter().sum::<f32>() / gated.len() as f32
        };
        snapshot
    }

    /// Heart rate for display, sentinel when withheld.
    pub fn render_heart_rate(&self) -> String {
        match self.heart_rate_bpm {
            Some(bpm) => format!("{:.0}", bpm),
            None => NUMERIC_SENTINEL.to_string(),
        }
    }

    pub fn render_spo2(&self) -> String {
        match self.spo2_percent {
            Some(v) => format!("{:.0}%", v),
            None => NUMERIC_SENTINEL.to_string(),
        }
    }

    pub fn render_arrhythmia(&self) -> &'static str {
        match self.arrhythmia_status {
            Some(status) => status.as_str(),
            None => NUMERIC_SENTINEL,
        }
    }
}
