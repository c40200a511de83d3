pub mod events;
pub mod features;
pub mod fft;
pub mod history;
pub mod mel;
pub mod pipeline;
pub mod pitch;
pub mod prescan;
pub mod processor;
pub mod slot;
pub mod tempo;

pub use events::{Event, EventDetector, EventKind, MetaValue};
pub use features::SpectralFeatures;
pub use fft::{SpectralAnalyzer, SpectralFrame};
pub use history::RollingHistory;
pub use mel::{MelFeatures, MelFilterBank};
pub use pipeline::{Analysis, AudioPipeline, Capabilities};
pub use prescan::{AnalysisReport, OfflineAnalyzer};
pub use processor::{probe_capabilities, spawn_analysis, LiveInput};
pub use slot::LatestSlot;
pub use tempo::{RhythmPattern, TempoSnapshot, TempoTracker, TrackerState};

/// One buffer of mono samples, consumed once per analysis cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: f32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: f32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate <= 0.0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

impl Default for AudioFrame {
    fn default() -> Self {
        Self {
            samples: Vec::new(),
            sample_rate: 44100.0,
        }
    }
}
