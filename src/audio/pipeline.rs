use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::events::{Event, EventDetector, EventKind};
use super::fft::SpectralAnalyzer;
use super::mel::MelFeatures;
use super::tempo::{TempoSnapshot, TempoTracker};
use super::{AudioFrame, SpectralFeatures};
use crate::config::PipelineConfig;
use crate::error::ConfigError;

/// What the host environment offers, decided once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// A live capture device is available.
    pub audio_input: bool,
    /// Emit harmonic-change events.
    pub harmonic_analysis: bool,
    /// Attach a mel spectrum and MFCCs to each non-silent analysis.
    #[serde(default)]
    pub mel_features: bool,
}

impl Capabilities {
    /// File or synthetic input with every analysis feature enabled.
    pub fn offline() -> Self {
        Self {
            audio_input: false,
            harmonic_analysis: true,
            mel_features: true,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::offline()
    }
}

/// Result of one analysis cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// Zero-based index of the processed buffer.
    pub frame: u64,
    pub timestamp: f64,
    pub features: SpectralFeatures,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mel: Option<MelFeatures>,
    pub events: Vec<Event>,
    pub tempo: TempoSnapshot,
}

impl Analysis {
    pub fn has_event(&self, kind: EventKind) -> bool {
        self.events.iter().any(|e| e.kind == kind)
    }
}

/// Single-threaded owner of the analyzer, detector and tempo tracker.
/// Buffers must be fed in order.
pub struct AudioPipeline {
    config: PipelineConfig,
    capabilities: Capabilities,
    analyzer: SpectralAnalyzer,
    detector: EventDetector,
    tracker: TempoTracker,
    samples_seen: u64,
    frames_processed: u64,
    rate_warning_logged: bool,
}

impl AudioPipeline {
    pub fn new(config: PipelineConfig, capabilities: Capabilities) -> Result<Self, ConfigError> {
        config.validate()?;

        debug!(
            "Pipeline: {} Hz, FFT {}, {} bands, capabilities {:?}",
            config.analysis.sample_rate,
            config.analysis.fft_size,
            config.analysis.bands.len(),
            capabilities
        );

        Ok(Self {
            analyzer: if capabilities.mel_features {
                SpectralAnalyzer::new(&config.analysis).with_mel_features()
            } else {
                SpectralAnalyzer::new(&config.analysis)
            },
            detector: EventDetector::new(&config.detector, capabilities.harmonic_analysis),
            tracker: TempoTracker::new(&config.tracker),
            config,
            capabilities,
            samples_seen: 0,
            frames_processed: 0,
            rate_warning_logged: false,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn tempo(&self) -> &TempoTracker {
        &self.tracker
    }

    pub fn analyzer(&self) -> &SpectralAnalyzer {
        &self.analyzer
    }

    /// Stream time of the next buffer, derived from the samples consumed so far.
    pub fn stream_time(&self) -> f64 {
        self.samples_seen as f64 / self.config.analysis.sample_rate as f64
    }

    /// Analyzes the next buffer, timestamped by stream position.
    pub fn process(&mut self, samples: &[f32]) -> Analysis {
        let timestamp = self.stream_time();
        self.process_at(samples, timestamp)
    }

    pub fn process_frame(&mut self, frame: &AudioFrame) -> Analysis {
        if frame.sample_rate != self.config.analysis.sample_rate && !self.rate_warning_logged {
            warn!(
                "Frame sample rate {} Hz differs from configured {} Hz; frequencies will be mislabelled",
                frame.sample_rate, self.config.analysis.sample_rate
            );
            self.rate_warning_logged = true;
        }
        self.process(&frame.samples)
    }

    /// Analyzes a buffer against an explicit clock (seconds).
    pub fn process_at(&mut self, samples: &[f32], timestamp: f64) -> Analysis {
        self.tracker.tick(timestamp);

        let spectral = self.analyzer.analyze(samples);
        let events = self.detector.detect(&spectral, timestamp, &self.tracker);
        for event in events.iter().filter(|e| e.kind == EventKind::Beat) {
            self.tracker.record_beat(event.timestamp);
        }

        let tempo = self.tracker.snapshot();
        let mut features = spectral.features;
        if !spectral.silent {
            features.rhythm_strength = tempo.rhythm_strength;
        }

        let analysis = Analysis {
            frame: self.frames_processed,
            timestamp,
            features,
            mel: spectral.mel,
            events,
            tempo,
        };

        self.samples_seen += samples.len() as u64;
        self.frames_processed += 1;
        analysis
    }

    /// Clears all history; the pipeline behaves as freshly constructed.
    pub fn reset(&mut self) {
        self.detector.reset();
        self.tracker.reset();
        self.samples_seen = 0;
        self.frames_processed = 0;
        self.rate_warning_logged = false;
    }
}
