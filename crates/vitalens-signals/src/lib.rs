//! # vitalens-signals
//!
//! Real-time processing of a single-channel camera PPG stream.
//!
//! This crate hosts the leaf components of the signal path:
//! - **SignalConditioner** - DC baseline tracking + filter cascade
//! - **PeakDetector** - adaptive beat detection with physiological gating
//! - **HrvAnalyzer** - time-domain heart-rate-variability statistics
//! - **SpectralAnalyzer** - band-limited DFT spectrum, SNR and dominant frequency
//! - **QualityScorer** - composite 0-100 signal quality
//! - **PeakOracle** - optional pluggable confidence model, bridged off-thread
//!
//! ## Example
//!
//! ```ignore
//! use vitalens_signals::{PeakDetector, Sample, SignalConditioner};
//!
//! let mut conditioner = SignalConditioner::new();
//! let mut detector = PeakDetector::new();
//!
//! for sample in camera_frames {
//!     let conditioned = conditioner.condition(sample);
//!     if let Some(beat) = detector.detect(&conditioned) {
//!         println!("beat at {} us (confidence {:.2})", beat.timestamp_us, beat.confidence);
//!     }
//! }
//! ```

pub mod conditioner;
pub mod hrv;
pub mod oracle;
pub mod peaks;
pub mod quality;
pub mod spectral;
pub mod types;

pub use conditioner::{ConditionerConfig, SignalConditioner, Smoothing};
pub use hrv::{HrvAnalyzer, HrvConfig, HrvMetrics};
pub use oracle::{OracleBridge, OracleError, PeakOracle};
pub use peaks::{PeakDetector, PeakDetectorConfig};
pub use quality::{QualityConfig, QualityScore, QualityScorer, QualityWeights};
pub use spectral::{SpectralAnalyzer, SpectralBin, SpectralConfig, Spectrum};
pub use types::{Beat, ConditionedSample, RrHistory, Sample};
