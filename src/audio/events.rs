use log::trace;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::fft::SpectralFrame;
use super::history::RollingHistory;
use super::pitch::note_name;
use super::tempo::TempoTracker;
use super::SpectralFeatures;
use crate::config::DetectorConfig;

const EPSILON: f32 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Onset,
    Beat,
    HarmonicChange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Number(f64),
    Text(String),
}

impl MetaValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Number(n) => Some(*n),
            MetaValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Text(s) => Some(s),
            MetaValue::Number(_) => None,
        }
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        MetaValue::Number(value)
    }
}

impl From<f32> for MetaValue {
    fn from(value: f32) -> Self {
        MetaValue::Number(value as f64)
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::Text(value)
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Text(value.to_string())
    }
}

/// A discrete occurrence detected in the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    /// Stream time in seconds.
    pub timestamp: f64,
    /// Strength in 0..1.
    pub intensity: f32,
    #[serde(default)]
    pub metadata: BTreeMap<String, MetaValue>,
}

impl Event {
    pub fn new(kind: EventKind, timestamp: f64, intensity: f32) -> Self {
        Self {
            kind,
            timestamp,
            intensity: intensity.clamp(0.0, 1.0),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<MetaValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn meta(&self, key: &str) -> Option<&MetaValue> {
        self.metadata.get(key)
    }
}

/// Spectral-flux onset detection with an adaptive threshold, beat promotion
/// through the tempo tracker, and dominant-note change tracking.
pub struct EventDetector {
    config: DetectorConfig,
    harmonic_analysis: bool,
    flux_history: RollingHistory<f32>,
    previous_magnitudes: Vec<f32>,
    last_onset: Option<f64>,
    last_note: Option<String>,
}

impl EventDetector {
    pub fn new(config: &DetectorConfig, harmonic_analysis: bool) -> Self {
        Self {
            config: config.clone(),
            harmonic_analysis,
            flux_history: RollingHistory::new(config.flux_history),
            previous_magnitudes: Vec::new(),
            last_onset: None,
            last_note: None,
        }
    }

    pub fn reset(&mut self) {
        self.flux_history.clear();
        self.previous_magnitudes.clear();
        self.last_onset = None;
        self.last_note = None;
    }

    /// Current adaptive threshold, before the next flux value is added.
    pub fn threshold(&self) -> f32 {
        let mean = self.flux_history.mean().unwrap_or(0.0);
        (mean * self.config.sensitivity).max(self.config.min_flux)
    }

    /// Half-wave rectified magnitude increase against the previous spectrum.
    fn spectral_flux(&self, magnitudes: &[f32]) -> f32 {
        if self.previous_magnitudes.len() != magnitudes.len() {
            return magnitudes.iter().map(|m| m.max(0.0)).sum();
        }
        magnitudes
            .iter()
            .zip(self.previous_magnitudes.iter())
            .map(|(&current, &previous)| (current - previous).max(0.0))
            .sum()
    }

    pub fn detect(&mut self, frame: &SpectralFrame, timestamp: f64, tempo: &TempoTracker) -> Vec<Event> {
        let flux = self.spectral_flux(&frame.magnitudes);
        let threshold = self.threshold();
        self.flux_history.push(flux);
        self.previous_magnitudes.clear();
        self.previous_magnitudes.extend_from_slice(&frame.magnitudes);

        let mut events = Vec::new();
        if frame.silent {
            self.last_note = None;
            return events;
        }

        if flux > threshold {
            let refractory_secs = self.config.refractory_ms / 1000.0;
            match self.last_onset {
                Some(last) if timestamp - last < refractory_secs => {
                    trace!("Onset at {:.3}s coalesced into {:.3}s", timestamp, last);
                }
                _ => {
                    self.last_onset = Some(timestamp);
                    let intensity = (flux - threshold) / (flux + EPSILON);
                    events.push(
                        Event::new(EventKind::Onset, timestamp, intensity)
                            .with("flux", flux)
                            .with("threshold", threshold),
                    );

                    if tempo.is_beat_candidate(timestamp) {
                        let mut beat = Event::new(EventKind::Beat, timestamp, intensity);
                        if let Some(last) = tempo.last_beat() {
                            beat = beat.with("interval", timestamp - last);
                        }
                        if let Some(bpm) = tempo.bpm() {
                            beat = beat.with("bpm", bpm);
                        }
                        events.push(beat);
                    }
                }
            }
        }

        if self.harmonic_analysis {
            if let Some(event) = self.harmonic_change(&frame.features, frame.magnitudes.len(), timestamp) {
                events.push(event);
            }
        }

        events
    }

    fn harmonic_change(&mut self, features: &SpectralFeatures, bin_count: usize, timestamp: f64) -> Option<Event> {
        if features.intensity < self.config.harmonic_min_intensity || bin_count < 2 {
            return None;
        }

        let max_entropy = (bin_count as f32).log2();
        let tonality = (1.0 - features.spectral_entropy / max_entropy).clamp(0.0, 1.0);
        if tonality < self.config.harmonic_min_tonality {
            return None;
        }

        let note = note_name(features.dominant_frequency)?;
        if self.last_note.as_deref() == Some(note.as_str()) {
            return None;
        }

        let mut event = Event::new(EventKind::HarmonicChange, timestamp, tonality)
            .with("note", note.as_str())
            .with("frequency", features.dominant_frequency)
            .with("confidence", tonality);
        if let Some(previous) = self.last_note.take() {
            event = event.with("previous_note", previous);
        }
        self.last_note = Some(note);
        Some(event)
    }
}
