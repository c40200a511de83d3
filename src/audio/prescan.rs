use anyhow::{anyhow, Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{Analysis, AudioPipeline, Capabilities, EventKind, RhythmPattern, TrackerState};
use crate::config::PipelineConfig;

/// Whole-file analysis summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub file_info: FileInfo,
    pub statistics: AnalysisStatistics,
    /// Per-frame results, present only when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frames: Option<Vec<Analysis>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub source: String,
    pub duration_seconds: f64,
    pub sample_rate: f32,
    pub total_samples: usize,
    pub frame_size: usize,
    /// Analysis frames per second.
    pub frame_rate: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisStatistics {
    pub frame_count: usize,
    pub peak_intensity: f32,
    pub mean_intensity: f32,
    pub mean_centroid: f32,
    pub onset_count: u32,
    pub beat_count: u32,
    pub harmonic_change_count: u32,
    pub final_bpm: Option<f32>,
    pub bpm_range: Option<(f32, f32)>,
    pub final_pattern: RhythmPattern,
    pub final_state: TrackerState,
    /// Band with the highest mean energy over the file.
    pub loudest_band: Option<String>,
}

impl Default for AnalysisStatistics {
    fn default() -> Self {
        Self {
            frame_count: 0,
            peak_intensity: 0.0,
            mean_intensity: 0.0,
            mean_centroid: 0.0,
            onset_count: 0,
            beat_count: 0,
            harmonic_change_count: 0,
            final_bpm: None,
            bpm_range: None,
            final_pattern: RhythmPattern::Unknown,
            final_state: TrackerState::ColdStart,
            loudest_band: None,
        }
    }
}

/// Running totals folded into `AnalysisStatistics` at the end of a pass.
#[derive(Default)]
struct StatisticsBuilder {
    stats: AnalysisStatistics,
    intensity_sum: f64,
    centroid_sum: f64,
    band_sums: Vec<f64>,
}

impl StatisticsBuilder {
    fn update(&mut self, analysis: &Analysis) {
        let features = &analysis.features;
        let stats = &mut self.stats;

        stats.frame_count += 1;
        stats.peak_intensity = stats.peak_intensity.max(features.intensity);
        self.intensity_sum += features.intensity as f64;
        self.centroid_sum += features.spectral_centroid as f64;

        if self.band_sums.len() < features.band_energies.len() {
            self.band_sums.resize(features.band_energies.len(), 0.0);
        }
        for (sum, &energy) in self.band_sums.iter_mut().zip(&features.band_energies) {
            *sum += energy as f64;
        }

        for event in &analysis.events {
            match event.kind {
                EventKind::Onset => stats.onset_count += 1,
                EventKind::Beat => stats.beat_count += 1,
                EventKind::HarmonicChange => stats.harmonic_change_count += 1,
            }
        }

        if let Some(bpm) = analysis.tempo.bpm {
            stats.bpm_range = Some(match stats.bpm_range {
                Some((low, high)) => (low.min(bpm), high.max(bpm)),
                None => (bpm, bpm),
            });
        }
        stats.final_bpm = analysis.tempo.bpm;
        stats.final_pattern = analysis.tempo.pattern;
        stats.final_state = analysis.tempo.state;
    }

    fn finish(mut self, band_names: &[String]) -> AnalysisStatistics {
        let frames = self.stats.frame_count.max(1) as f64;
        self.stats.mean_intensity = (self.intensity_sum / frames) as f32;
        self.stats.mean_centroid = (self.centroid_sum / frames) as f32;
        self.stats.loudest_band = self
            .band_sums
            .iter()
            .enumerate()
            .filter(|(_, &sum)| sum > 0.0)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .and_then(|(i, _)| band_names.get(i).cloned());
        self.stats
    }
}

/// Runs the pipeline over a complete recording in fixed-size frames.
pub struct OfflineAnalyzer {
    config: PipelineConfig,
    capabilities: Capabilities,
    frame_size: usize,
    keep_frames: bool,
}

impl OfflineAnalyzer {
    pub fn new(config: PipelineConfig, capabilities: Capabilities, frame_size: usize) -> Self {
        Self {
            config,
            capabilities,
            frame_size,
            keep_frames: false,
        }
    }

    /// Include every per-frame `Analysis` in the report.
    pub fn keep_frames(mut self, keep: bool) -> Self {
        self.keep_frames = keep;
        self
    }

    pub fn analyze_samples(&self, samples: &[f32], sample_rate: f32, source: &str) -> Result<AnalysisReport> {
        self.analyze_samples_with(samples, sample_rate, source, |_| {})
    }

    /// Like `analyze_samples`, calling `on_frame` with each result as it is produced.
    pub fn analyze_samples_with<F>(
        &self,
        samples: &[f32],
        sample_rate: f32,
        source: &str,
        mut on_frame: F,
    ) -> Result<AnalysisReport>
    where
        F: FnMut(&Analysis),
    {
        if self.frame_size == 0 {
            return Err(anyhow!("Frame size must be positive"));
        }

        let mut config = self.config.clone();
        config.analysis.sample_rate = sample_rate;
        let band_names: Vec<String> = config.analysis.bands.iter().map(|b| b.name.clone()).collect();
        let mut pipeline = AudioPipeline::new(config, self.capabilities)
            .context("Invalid analysis configuration")?;

        let total_samples = samples.len();
        let duration_seconds = total_samples as f64 / sample_rate as f64;
        info!("Analyzing {} samples ({:.2}s) from {}", total_samples, duration_seconds, source);

        let mut builder = StatisticsBuilder::default();
        let mut frames = Vec::new();
        let mut padded = Vec::with_capacity(self.frame_size);

        for chunk in samples.chunks(self.frame_size) {
            let analysis = if chunk.len() == self.frame_size {
                pipeline.process(chunk)
            } else {
                padded.clear();
                padded.extend_from_slice(chunk);
                padded.resize(self.frame_size, 0.0);
                pipeline.process(&padded)
            };

            builder.update(&analysis);
            on_frame(&analysis);

            if builder.stats.frame_count % 1000 == 0 {
                info!(
                    "Analyzed {} frames ({:.1}s of {:.1}s)",
                    builder.stats.frame_count, analysis.timestamp, duration_seconds
                );
            }
            if self.keep_frames {
                frames.push(analysis);
            }
        }

        let statistics = builder.finish(&band_names);
        info!(
            "Analysis complete: {} frames, {} onsets, {} beats, BPM {}",
            statistics.frame_count,
            statistics.onset_count,
            statistics.beat_count,
            statistics
                .final_bpm
                .map(|bpm| format!("{:.1}", bpm))
                .unwrap_or_else(|| "unknown".to_string())
        );

        Ok(AnalysisReport {
            file_info: FileInfo {
                source: source.to_string(),
                duration_seconds,
                sample_rate,
                total_samples,
                frame_size: self.frame_size,
                frame_rate: sample_rate / self.frame_size as f32,
            },
            statistics,
            frames: self.keep_frames.then_some(frames),
        })
    }

    pub fn analyze_wav<P: AsRef<Path>>(&self, path: P) -> Result<AnalysisReport> {
        self.analyze_wav_with(path, |_| {})
    }

    pub fn analyze_wav_with<P, F>(&self, path: P, on_frame: F) -> Result<AnalysisReport>
    where
        P: AsRef<Path>,
        F: FnMut(&Analysis),
    {
        let path = path.as_ref();
        let (samples, sample_rate) = load_wav(path)?;
        self.analyze_samples_with(&samples, sample_rate, &path.to_string_lossy(), on_frame)
    }

    pub fn save_report<P: AsRef<Path>>(report: &AnalysisReport, output_path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(output_path.as_ref(), json)
            .with_context(|| format!("Failed to write report {}", output_path.as_ref().display()))?;
        Ok(())
    }

    pub fn load_report<P: AsRef<Path>>(input_path: P) -> Result<AnalysisReport> {
        let json = std::fs::read_to_string(input_path.as_ref())
            .with_context(|| format!("Failed to read report {}", input_path.as_ref().display()))?;
        let report: AnalysisReport = serde_json::from_str(&json)?;
        Ok(report)
    }
}

/// Decodes a PCM or float WAV file to mono f32 samples plus its sample rate.
pub fn load_wav<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, f32)> {
    let path = path.as_ref();
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file {}", path.display()))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / max_value))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    let channels = spec.channels.max(1) as usize;
    let mono = if channels == 1 {
        samples
    } else {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok((mono, spec.sample_rate as f32))
}
