use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// File name picked up from the working directory when no `--config` is given.
pub const LOCAL_CONFIG_NAME: &str = "mmpa.toml";

const MIN_FFT_SIZE: usize = 16;
const MIN_TRACKER_CAPACITY: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f32,
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    /// Fraction of spectral power that lies below the rolloff frequency.
    #[serde(default = "default_rolloff_fraction")]
    pub rolloff_fraction: f32,
    #[serde(default = "default_bands")]
    pub bands: Vec<BandSpec>,
    /// Mel filters, used only when mel features are enabled.
    #[serde(default = "default_mel_bands")]
    pub mel_bands: usize,
    #[serde(default = "default_mfcc_coefficients")]
    pub mfcc_coefficients: usize,
}

/// Half-open frequency range `[low_hz, high_hz)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandSpec {
    pub name: String,
    pub low_hz: f32,
    pub high_hz: f32,
}

impl BandSpec {
    pub fn new(name: impl Into<String>, low_hz: f32, high_hz: f32) -> Self {
        Self {
            name: name.into(),
            low_hz,
            high_hz,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Multiplier applied to the mean of recent flux.
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f32,
    #[serde(default = "default_flux_history")]
    pub flux_history: usize,
    /// Threshold floor so near-silence never triggers onsets.
    #[serde(default = "default_min_flux")]
    pub min_flux: f32,
    #[serde(default = "default_refractory_ms")]
    pub refractory_ms: f64,
    #[serde(default = "default_harmonic_min_intensity")]
    pub harmonic_min_intensity: f32,
    #[serde(default = "default_harmonic_min_tonality")]
    pub harmonic_min_tonality: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_tracker_capacity")]
    pub capacity: usize,
    /// Beats needed before the tracker leaves warm-up.
    #[serde(default = "default_warmup_beats")]
    pub warmup_beats: usize,
    #[serde(default = "default_silence_timeout_secs")]
    pub silence_timeout_secs: f64,
    #[serde(default = "default_min_bpm")]
    pub min_bpm: f32,
    #[serde(default = "default_max_bpm")]
    pub max_bpm: f32,
    /// Allowed deviation from the period, as a fraction of it, while tracking.
    #[serde(default = "default_beat_tolerance")]
    pub beat_tolerance: f32,
    #[serde(default = "default_steady_cv")]
    pub steady_cv: f32,
    #[serde(default = "default_sparse_interval_secs")]
    pub sparse_interval_secs: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_rate_hz")]
    pub rate_hz: f32,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            fft_size: default_fft_size(),
            rolloff_fraction: default_rolloff_fraction(),
            bands: default_bands(),
            mel_bands: default_mel_bands(),
            mfcc_coefficients: default_mfcc_coefficients(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sensitivity: default_sensitivity(),
            flux_history: default_flux_history(),
            min_flux: default_min_flux(),
            refractory_ms: default_refractory_ms(),
            harmonic_min_intensity: default_harmonic_min_intensity(),
            harmonic_min_tonality: default_harmonic_min_tonality(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            capacity: default_tracker_capacity(),
            warmup_beats: default_warmup_beats(),
            silence_timeout_secs: default_silence_timeout_secs(),
            min_bpm: default_min_bpm(),
            max_bpm: default_max_bpm(),
            beat_tolerance: default_beat_tolerance(),
            steady_cv: default_steady_cv(),
            sparse_interval_secs: default_sparse_interval_secs(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            rate_hz: default_rate_hz(),
            bind: default_bind(),
        }
    }
}

fn default_sample_rate() -> f32 { 44100.0 }
fn default_fft_size() -> usize { 2048 }
fn default_rolloff_fraction() -> f32 { 0.85 }
fn default_mel_bands() -> usize { 128 }
fn default_mfcc_coefficients() -> usize { 13 }
fn default_sensitivity() -> f32 { 1.5 }
fn default_flux_history() -> usize { 43 }
fn default_min_flux() -> f32 { 0.05 }
fn default_refractory_ms() -> f64 { 50.0 }
fn default_harmonic_min_intensity() -> f32 { 0.01 }
fn default_harmonic_min_tonality() -> f32 { 0.5 }
fn default_tracker_capacity() -> usize { 16 }
fn default_warmup_beats() -> usize { 8 }
fn default_silence_timeout_secs() -> f64 { 3.0 }
fn default_min_bpm() -> f32 { 30.0 }
fn default_max_bpm() -> f32 { 300.0 }
fn default_beat_tolerance() -> f32 { 0.15 }
fn default_steady_cv() -> f32 { 0.1 }
fn default_sparse_interval_secs() -> f32 { 1.5 }
fn default_rate_hz() -> f32 { 60.0 }
fn default_bind() -> String { "127.0.0.1:7070".into() }

fn default_bands() -> Vec<BandSpec> {
    vec![
        BandSpec::new("bass", 20.0, 200.0),
        BandSpec::new("mid", 200.0, 2000.0),
        BandSpec::new("high_mid", 2000.0, 4000.0),
        BandSpec::new("presence", 4000.0, 6000.0),
        BandSpec::new("treble", 6000.0, 12000.0),
        BandSpec::new("ultra", 12000.0, 20000.0),
    ]
}

impl PipelineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.analysis.validate()?;
        self.detector.validate()?;
        self.tracker.validate()?;
        positive("telemetry.rate_hz", self.telemetry.rate_hz as f64)
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate));
        }
        if self.fft_size < MIN_FFT_SIZE {
            return Err(ConfigError::FftSizeTooSmall {
                got: self.fft_size,
                min: MIN_FFT_SIZE,
            });
        }
        if !(self.rolloff_fraction > 0.0 && self.rolloff_fraction <= 1.0) {
            return Err(ConfigError::InvalidRolloff(self.rolloff_fraction));
        }
        if self.bands.is_empty() {
            return Err(ConfigError::NoBands);
        }
        if self.mel_bands == 0 {
            return Err(ConfigError::CapacityTooSmall {
                field: "analysis.mel_bands",
                got: 0,
                min: 1,
            });
        }
        if self.mfcc_coefficients == 0 || self.mfcc_coefficients > self.mel_bands {
            return Err(ConfigError::InvalidMfcc {
                coefficients: self.mfcc_coefficients,
                mel_bands: self.mel_bands,
            });
        }

        let mut previous: Option<&BandSpec> = None;
        for band in &self.bands {
            let bounds_ok = band.low_hz.is_finite()
                && band.high_hz.is_finite()
                && band.low_hz >= 0.0
                && band.high_hz > band.low_hz;
            if !bounds_ok {
                return Err(ConfigError::InvalidBand {
                    name: band.name.clone(),
                    low_hz: band.low_hz,
                    high_hz: band.high_hz,
                });
            }
            if let Some(prev) = previous {
                if band.low_hz < prev.high_hz {
                    return Err(ConfigError::OverlappingBands {
                        name: band.name.clone(),
                        previous: prev.name.clone(),
                    });
                }
            }
            previous = Some(band);
        }
        Ok(())
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("detector.sensitivity", self.sensitivity as f64)?;
        if self.flux_history == 0 {
            return Err(ConfigError::CapacityTooSmall {
                field: "detector.flux_history",
                got: 0,
                min: 1,
            });
        }
        if !(self.min_flux >= 0.0) {
            return Err(ConfigError::NonPositive {
                field: "detector.min_flux",
                value: self.min_flux as f64,
            });
        }
        if !(self.refractory_ms >= 0.0) {
            return Err(ConfigError::NonPositive {
                field: "detector.refractory_ms",
                value: self.refractory_ms,
            });
        }
        Ok(())
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity < MIN_TRACKER_CAPACITY {
            return Err(ConfigError::CapacityTooSmall {
                field: "tracker.capacity",
                got: self.capacity,
                min: MIN_TRACKER_CAPACITY,
            });
        }
        if !(self.min_bpm > 0.0 && self.max_bpm > self.min_bpm && self.max_bpm.is_finite()) {
            return Err(ConfigError::InvalidTempoRange {
                min_bpm: self.min_bpm,
                max_bpm: self.max_bpm,
            });
        }
        positive("tracker.warmup_beats", self.warmup_beats as f64)?;
        positive("tracker.silence_timeout_secs", self.silence_timeout_secs)?;
        positive("tracker.beat_tolerance", self.beat_tolerance as f64)?;
        positive("tracker.steady_cv", self.steady_cv as f64)?;
        positive("tracker.sparse_interval_secs", self.sparse_interval_secs as f64)
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive { field, value })
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config = PipelineConfig::from_toml_str(&content)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    Ok(config)
}

/// Explicit path wins; otherwise `mmpa.toml` in the working directory if present.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| {
        let local = PathBuf::from(LOCAL_CONFIG_NAME);
        local.exists().then_some(local)
    })
}
