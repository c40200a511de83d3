use thiserror::Error;

/// Rejected pipeline configuration. Raised once at construction; the
/// per-frame path never fails.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("sample rate must be positive and finite, got {0}")]
    InvalidSampleRate(f32),
    #[error("FFT size must be at least {min}, got {got}")]
    FftSizeTooSmall { got: usize, min: usize },
    #[error("rolloff fraction must lie in (0, 1], got {0}")]
    InvalidRolloff(f32),
    #[error("at least one frequency band is required")]
    NoBands,
    #[error("band '{name}' has invalid bounds {low_hz}..{high_hz} Hz")]
    InvalidBand { name: String, low_hz: f32, high_hz: f32 },
    #[error("band '{name}' starts below the end of the previous band '{previous}'")]
    OverlappingBands { name: String, previous: String },
    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: f64 },
    #[error("MFCC count must lie in 1..={mel_bands}, got {coefficients}")]
    InvalidMfcc { coefficients: usize, mel_bands: usize },
    #[error("tempo range {min_bpm}..{max_bpm} BPM is empty or non-positive")]
    InvalidTempoRange { min_bpm: f32, max_bpm: f32 },
    #[error("{field} capacity must be at least {min}, got {got}")]
    CapacityTooSmall { field: &'static str, got: usize, min: usize },
}
