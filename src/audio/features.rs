use serde::{Deserialize, Serialize};

/// Per-buffer descriptor produced by the spectral analyzer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpectralFeatures {
    /// RMS amplitude of the input buffer.
    pub intensity: f32,
    /// Centre frequency (Hz) of the loudest non-DC bin.
    pub dominant_frequency: f32,
    /// Magnitude-weighted mean frequency (Hz).
    pub spectral_centroid: f32,
    /// Magnitude-weighted spread (Hz) around the centroid.
    pub spectral_bandwidth: f32,
    /// Frequency (Hz) below which the configured fraction of power lies.
    pub spectral_rolloff: f32,
    /// Sign changes per sample.
    pub zero_crossing_rate: f32,
    /// Shannon entropy of the normalised magnitude spectrum, in bits.
    pub spectral_entropy: f32,
    /// Mean magnitude per configured band, in band order.
    pub band_energies: Vec<f32>,
    /// Regularity of recent beats in 0..1, filled in by the pipeline.
    pub rhythm_strength: f32,
}

impl SpectralFeatures {
    pub fn zeroed(band_count: usize) -> Self {
        Self {
            band_energies: vec![0.0; band_count],
            ..Self::default()
        }
    }

    pub fn is_zero(&self) -> bool {
        self.intensity == 0.0
            && self.dominant_frequency == 0.0
            && self.spectral_centroid == 0.0
            && self.spectral_bandwidth == 0.0
            && self.spectral_rolloff == 0.0
            && self.zero_crossing_rate == 0.0
            && self.spectral_entropy == 0.0
            && self.rhythm_strength == 0.0
            && self.band_energies.iter().all(|&e| e == 0.0)
    }

    /// Index of the band with the highest energy.
    pub fn loudest_band(&self) -> Option<usize> {
        self.band_energies
            .iter()
            .enumerate()
            .filter(|(_, e)| **e > 0.0)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
    }
}
