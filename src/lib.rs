//! Real-time audio feature extraction for the MMPA visualiser.
//!
//! One mono buffer in, one [`audio::SpectralFeatures`] record plus discrete
//! [`audio::Event`]s out, with a bounded tempo tracker riding alongside.

pub mod audio;
pub mod config;
pub mod error;
pub mod telemetry;

pub use audio::{Analysis, AudioFrame, AudioPipeline, Capabilities, Event, EventKind, SpectralFeatures};
pub use config::PipelineConfig;
pub use error::ConfigError;
