//! Mel-scale spectrum and cepstral coefficients over the analyzer's
//! magnitude spectrum.

use serde::{Deserialize, Serialize};

const EPSILON: f32 = 1e-10;
/// Dynamic range kept below the loudest mel band.
const TOP_DB: f32 = 80.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MelFeatures {
    /// Mel band power in dB relative to the loudest band, in `-80..=0`.
    pub mel_db: Vec<f32>,
    /// DCT-II (orthonormal) of the absolute mel power in dB.
    pub mfcc: Vec<f32>,
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular filters spaced evenly on the mel scale from 0 Hz to Nyquist.
pub struct MelFilterBank {
    /// Per filter: first bin and the weights from there on.
    filters: Vec<(usize, Vec<f32>)>,
    dct_basis: Vec<Vec<f32>>,
}

impl MelFilterBank {
    pub fn new(mel_bands: usize, mfcc_coefficients: usize, sample_rate: f32, fft_size: usize) -> Self {
        let bin_count = fft_size / 2 + 1;
        let bin_width = sample_rate / fft_size as f32;
        let max_mel = hz_to_mel(sample_rate / 2.0);

        let edges: Vec<f32> = (0..mel_bands + 2)
            .map(|i| mel_to_hz(max_mel * i as f32 / (mel_bands + 1) as f32))
            .collect();

        let filters = edges
            .windows(3)
            .map(|edge| {
                let (low, centre, high) = (edge[0], edge[1], edge[2]);
                let first = ((low / bin_width).floor() as usize).min(bin_count);
                let last = ((high / bin_width).ceil() as usize).min(bin_count);
                let weights = (first..last)
                    .map(|bin| {
                        let freq = bin as f32 * bin_width;
                        let rising = (freq - low) / (centre - low).max(EPSILON);
                        let falling = (high - freq) / (high - centre).max(EPSILON);
                        rising.min(falling).max(0.0)
                    })
                    .collect();
                (first, weights)
            })
            .collect();

        let n = mel_bands as f32;
        let dct_basis = (0..mfcc_coefficients)
            .map(|k| {
                let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
                (0..mel_bands)
                    .map(|m| scale * (std::f32::consts::PI * k as f32 * (m as f32 + 0.5) / n).cos())
                    .collect()
            })
            .collect();

        Self { filters, dct_basis }
    }

    pub fn mel_bands(&self) -> usize {
        self.filters.len()
    }

    /// Power (magnitude squared) collected by each filter.
    pub fn mel_power(&self, magnitudes: &[f32]) -> Vec<f32> {
        self.filters
            .iter()
            .map(|(first, weights)| {
                weights
                    .iter()
                    .zip(magnitudes.iter().skip(*first))
                    .map(|(w, m)| w * m * m)
                    .sum::<f32>()
            })
            .collect()
    }

    pub fn features(&self, magnitudes: &[f32]) -> MelFeatures {
        let power_db: Vec<f32> = self
            .mel_power(magnitudes)
            .iter()
            .map(|&p| 10.0 * p.max(EPSILON).log10())
            .collect();

        let peak = power_db.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        let mel_db = power_db.iter().map(|&db| (db - peak).max(-TOP_DB)).collect();
        let floor = peak - TOP_DB;
        let clipped: Vec<f32> = power_db.iter().map(|&db| db.max(floor)).collect();

        MelFeatures {
            mel_db,
            mfcc: self.dct(&clipped),
        }
    }

    fn dct(&self, values: &[f32]) -> Vec<f32> {
        self.dct_basis
            .iter()
            .map(|basis| basis.iter().zip(values).map(|(b, v)| b * v).sum::<f32>())
            .collect()
    }
}
