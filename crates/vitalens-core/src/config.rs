//! Aggregate monitoring configuration: TOML loading, `VITALENS_` environment
//! overrides and validation at the update boundary.
//!
//! Every threshold the processing path uses lives here as a canonical
//! default; nothing in the tick path carries forked literals.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use vitalens_signals::{
    ConditionerConfig, HrvConfig, PeakDetectorConfig, QualityConfig, SpectralConfig,
};

use crate::dispatch::DispatchConfig;
use crate::error::ConfigError;
use crate::presence::PresenceConfig;

/// Per-channel calibration against an external reference reading.
///
/// Applied multiplicatively then additively to the raw estimate. Values are
/// clamped to a sane envelope at the update boundary and never propagate
/// out-of-range into the processing path. Calibration survives `reset()`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CalibrationFactor {
    pub scale: f32,
    pub offset: f32,
}

impl Default for CalibrationFactor {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset: 0.0,
        }
    }
}

impl CalibrationFactor {
    pub const MIN_SCALE: f32 = 0.5;
    pub const MAX_SCALE: f32 = 2.0;
    pub const MAX_OFFSET: f32 = 30.0;

    /// Clamp to the accepted envelope. Non-finite input falls back to identity.
    pub fn clamped(self) -> Self {
        if !self.scale.is_finite() || !self.offset.is_finite() {
            return Self::default();
        }
        Self {
            scale: self.scale.clamp(Self::MIN_SCALE, Self::MAX_SCALE),
            offset: self.offset.clamp(-Self::MAX_OFFSET, Self::MAX_OFFSET),
        }
    }

    pub fn apply(&self, value: f32) -> f32 {
        value * self.scale + self.offset
    }
}

/// Confidence gate + calibration for one channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChannelTuning {
    /// Results below this confidence are withheld (sentinel output).
    pub min_confidence: f32,
    pub calibration: CalibrationFactor,
}

impl ChannelTuning {
    fn gated(min_confidence: f32) -> Self {
        Self {
            min_confidence,
            calibration: CalibrationFactor::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// AC ring capacity each channel keeps for feature extraction.
    pub buffer_size: usize,
    pub heart_rate: ChannelTuning,
    pub spo2: ChannelTuning,
    pub pressure: ChannelTuning,
    pub glucose: ChannelTuning,
    pub lipids: ChannelTuning,
    pub hemoglobin: ChannelTuning,
    pub hydration: ChannelTuning,
    pub arrhythmia: ChannelTuning,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            buffer_size: 90,
            heart_rate: ChannelTuning::gated(0.3),
            spo2: ChannelTuning::gated(0.4),
            pressure: ChannelTuning::gated(0.45),
            glucose: ChannelTuning::gated(0.5),
            lipids: ChannelTuning::gated(0.5),
            hemoglobin: ChannelTuning::gated(0.5),
            hydration: ChannelTuning::gated(0.45),
            arrhythmia: ChannelTuning::gated(0.35),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Camera frame rate driving the sample stream.
    pub sample_rate: f32,
    pub conditioner: ConditionerConfig,
    pub detector: PeakDetectorConfig,
    pub hrv: HrvConfig,
    pub spectral: SpectralConfig,
    pub quality: QualityConfig,
    pub presence: PresenceConfig,
    pub dispatch: DispatchConfig,
    pub channels: ChannelsConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 30.0,
            conditioner: ConditionerConfig::default(),
            detector: PeakDetectorConfig::default(),
            hrv: HrvConfig::default(),
            spectral: SpectralConfig::default(),
            quality: QualityConfig::default(),
            presence: PresenceConfig::default(),
            dispatch: DispatchConfig::default(),
            channels: ChannelsConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: MonitorConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    /// Variables are prefixed with VITALENS_, e.g. VITALENS_SAMPLE_RATE=25.
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        use std::env;

        if let Ok(val) = env::var("VITALENS_SAMPLE_RATE") {
            self.sample_rate = val
                .parse()
                .map_err(|_| ConfigError::Validation("Invalid VITALENS_SAMPLE_RATE".to_string()))?;
        }
        if let Ok(val) = env::var("VITALENS_DETECTOR_K_STD") {
            self.detector.k_std = val.parse().map_err(|_| {
                ConfigError::Validation("Invalid VITALENS_DETECTOR_K_STD".to_string())
            })?;
        }
        if let Ok(val) = env::var("VITALENS_QUALITY_MIN_SAMPLES") {
            self.quality.min_samples = val.parse().map_err(|_| {
                ConfigError::Validation("Invalid VITALENS_QUALITY_MIN_SAMPLES".to_string())
            })?;
        }
        if let Ok(val) = env::var("VITALENS_PRESENCE_CONFIRM_MS") {
            self.presence.confirm_ms = val.parse().map_err(|_| {
                ConfigError::Validation("Invalid VITALENS_PRESENCE_CONFIRM_MS".to_string())
            })?;
        }
        if let Ok(val) = env::var("VITALENS_DISPATCH_CADENCE_SAMPLES") {
            self.dispatch.cadence_samples = val.parse().map_err(|_| {
                ConfigError::Validation("Invalid VITALENS_DISPATCH_CADENCE_SAMPLES".to_string())
            })?;
        }

        Ok(())
    }

    /// Validate configuration values. Out-of-range settings are rejected
    /// here; calibration factors are clamped instead (see
    /// [`CalibrationFactor::clamped`]).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate < 10.0 || self.sample_rate > 120.0 {
            return Err(ConfigError::Validation(
                "sample_rate must be in [10, 120]".to_string(),
            ));
        }

        let c = &self.conditioner;
        if c.fast_alpha <= 0.0 || c.fast_alpha > 1.0 || c.slow_alpha <= 0.0 || c.slow_alpha > 1.0 {
            return Err(ConfigError::Validation(
                "conditioner alphas must be in (0, 1]".to_string(),
            ));
        }
        if c.slow_alpha >= c.fast_alpha {
            return Err(ConfigError::Validation(
                "conditioner.slow_alpha must be < fast_alpha".to_string(),
            ));
        }
        if c.median_window < 3 || c.median_window % 2 == 0 {
            return Err(ConfigError::Validation(
                "conditioner.median_window must be odd and >= 3".to_string(),
            ));
        }
        if c.triangular_window < 3 || c.triangular_window % 2 == 0 {
            return Err(ConfigError::Validation(
                "conditioner.triangular_window must be odd and >= 3".to_string(),
            ));
        }

        let d = &self.detector;
        if d.lookback_window < 3 || d.lookback_window > 7 || d.lookback_window % 2 == 0 {
            return Err(ConfigError::Validation(
                "detector.lookback_window must be odd, in [3, 7]".to_string(),
            ));
        }
        if d.k_std < 0.05 || d.k_std > 1.0 {
            return Err(ConfigError::Validation(
                "detector.k_std must be in [0.05, 1.0]".to_string(),
            ));
        }
        if d.min_rr_ms <= 0.0 || d.min_rr_ms >= d.max_rr_ms {
            return Err(ConfigError::Validation(
                "detector RR gates must satisfy 0 < min_rr_ms < max_rr_ms".to_string(),
            ));
        }

        if self.hrv.min_nn_ms >= self.hrv.max_nn_ms {
            return Err(ConfigError::Validation(
                "hrv.min_nn_ms must be < max_nn_ms".to_string(),
            ));
        }

        if self.spectral.window_len < 32 {
            return Err(ConfigError::Validation(
                "spectral.window_len must be >= 32".to_string(),
            ));
        }
        if self.spectral.min_freq <= 0.0 || self.spectral.min_freq >= self.spectral.max_freq {
            return Err(ConfigError::Validation(
                "spectral band must satisfy 0 < min_freq < max_freq".to_string(),
            ));
        }

        if self.presence.confirm_ms < 1000 || self.presence.confirm_ms > 10_000 {
            return Err(ConfigError::Validation(
                "presence.confirm_ms must be in [1000, 10000]".to_string(),
            ));
        }
        if self.presence.weak_debounce == 0 {
            return Err(ConfigError::Validation(
                "presence.weak_debounce must be > 0".to_string(),
            ));
        }

        let b = &self.dispatch;
        if b.high_budget_per_sec == 0 || b.medium_budget_per_sec == 0 || b.low_budget_per_sec == 0 {
            return Err(ConfigError::Validation(
                "dispatch budgets must be > 0".to_string(),
            ));
        }
        if b.cadence_samples == 0 {
            return Err(ConfigError::Validation(
                "dispatch.cadence_samples must be > 0".to_string(),
            ));
        }

        for (name, tuning) in self.channel_tunings() {
            if !(0.0..=1.0).contains(&tuning.min_confidence) {
                return Err(ConfigError::Validation(format!(
                    "channels.{}.min_confidence must be in [0, 1]",
                    name
                )));
            }
        }
        if self.channels.buffer_size < self.quality.min_samples {
            return Err(ConfigError::Validation(
                "channels.buffer_size must be >= quality.min_samples".to_string(),
            ));
        }

        Ok(())
    }

    fn channel_tunings(&self) -> [(&'static str, &ChannelTuning); 8] {
        let ch = &self.channels;
        [
            ("heart_rate", &ch.heart_rate),
            ("spo2", &ch.spo2),
            ("pressure", &ch.pressure),
            ("glucose", &ch.glucose),
            ("lipids", &ch.lipids),
            ("hemoglobin", &ch.hemoglobin),
            ("hydration", &ch.hydration),
            ("arrhythmia", &ch.arrhythmia),
        ]
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = self
            .to_toml_string()
            .map_err(|e| ConfigError::Validation(format!("TOML serialization error: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(MonitorConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_alphas() {
        let mut cfg = MonitorConfig::default();
        cfg.conditioner.slow_alpha = 0.5;
        cfg.conditioner.fast_alpha = 0.1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_gate() {
        let mut cfg = MonitorConfig::default();
        cfg.channels.spo2.min_confidence = 1.5;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("spo2"));
    }

    #[test]
    fn calibration_clamps_instead_of_rejecting() {
        let cal = CalibrationFactor {
            scale: 10.0,
            offset: -500.0,
        }
        .clamped();
        assert_eq!(cal.scale, CalibrationFactor::MAX_SCALE);
        assert_eq!(cal.offset, -CalibrationFactor::MAX_OFFSET);

        let nan = CalibrationFactor {
            scale: f32::NAN,
            offset: 0.0,
        }
        .clamped();
        assert_eq!(nan, CalibrationFactor::default());
    }

    #[test]
    fn toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.toml");

        let mut cfg = MonitorConfig::default();
        cfg.sample_rate = 25.0;
        cfg.channels.heart_rate.min_confidence = 0.42;
        cfg.save_to_file(&path).unwrap();

        let loaded = MonitorConfig::from_file(&path).unwrap();
        assert_eq!(loaded.sample_rate, 25.0);
        assert_eq!(loaded.channels.heart_rate.min_confidence, 0.42);
    }

    #[test]
    fn env_override_applies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.toml");
        MonitorConfig::default().save_to_file(&path).unwrap();

        std::env::set_var("VITALENS_SAMPLE_RATE", "24");
        let loaded = MonitorConfig::from_file_with_env(&path).unwrap();
        std::env::remove_var("VITALENS_SAMPLE_RATE");
        assert_eq!(loaded.sample_rate, 24.0);
    }
}
