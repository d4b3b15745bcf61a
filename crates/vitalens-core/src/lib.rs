//! Camera-PPG vital-signs monitoring core.
//!
//! Wraps the signal pipeline from `vitalens-signals` with finger-presence
//! gating, priority-budgeted channel dispatch, eight confidence-gated vital
//! channels, and an aggregate snapshot for rendering or telemetry.
//!
//! The embedder feeds raw luminance samples into [`VitalsEngine::ingest`]
//! and reads [`VitalsEngine::snapshot`]. Everything else is internal
//! plumbing configurable through [`MonitorConfig`].

pub mod channels;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod features;
pub mod presence;
pub mod snapshot;

pub use channels::{
    ArrhythmiaStatus, ChannelInput, ChannelResult, ChannelSet, ChannelValue, VitalChannel,
};
pub use config::{CalibrationFactor, ChannelTuning, ChannelsConfig, MonitorConfig};
pub use dispatch::{ChannelDispatcher, DispatchConfig, Priority};
pub use engine::{TickOutput, VitalsEngine};
pub use error::ConfigError;
pub use features::PulseFeatures;
pub use presence::{PresenceConfig, PresenceDetector, PresenceState, PresenceStatus};
pub use snapshot::VitalSignsSnapshot;

pub use vitalens_signals::{
    Beat, HrvMetrics, PeakOracle, QualityScore, Sample, Spectrum,
};
