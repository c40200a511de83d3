use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use super::mel::{MelFeatures, MelFilterBank};
use super::SpectralFeatures;
use crate::config::AnalysisConfig;

const EPSILON: f32 = 1e-10;

/// Output of one analysis pass: the public feature record plus the
/// magnitude spectrum the event detector needs for flux.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralFrame {
    pub features: SpectralFeatures,
    pub magnitudes: Vec<f32>,
    /// Present when mel features are enabled and the frame is not silent.
    pub mel: Option<MelFeatures>,
    /// Input was empty or carried no signal after sanitising.
    pub silent: bool,
}

/// Stateless per-buffer spectral analysis. The FFT plan and Hann window are
/// built once; `analyze` only reads them.
pub struct SpectralAnalyzer {
    sample_rate: f32,
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    rolloff_fraction: f32,
    band_ranges: Vec<(usize, usize)>,
    mel_bank: Option<MelFilterBank>,
    mel_bands: usize,
    mfcc_coefficients: usize,
}

impl SpectralAnalyzer {
    /// Expects a validated config.
    pub fn new(config: &AnalysisConfig) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(config.fft_size);
        let window = Self::hann_window(config.fft_size);

        let bin_count = config.fft_size / 2 + 1;
        let bin_width = config.sample_rate / config.fft_size as f32;
        let band_ranges = config
            .bands
            .iter()
            .map(|band| {
                let start = ((band.low_hz / bin_width).ceil() as usize).min(bin_count);
                let end = ((band.high_hz / bin_width).ceil() as usize).min(bin_count);
                (start, end.max(start))
            })
            .collect();

        Self {
            sample_rate: config.sample_rate,
            fft_size: config.fft_size,
            fft,
            window,
            rolloff_fraction: config.rolloff_fraction,
            band_ranges,
            mel_bank: None,
            mel_bands: config.mel_bands,
            mfcc_coefficients: config.mfcc_coefficients,
        }
    }

    /// Builds the mel filter bank so every non-silent frame also carries
    /// a mel spectrum and MFCCs.
    pub fn with_mel_features(mut self) -> Self {
        self.mel_bank = Some(MelFilterBank::new(
            self.mel_bands,
            self.mfcc_coefficients,
            self.sample_rate,
            self.fft_size,
        ));
        self
    }

    pub fn mel_enabled(&self) -> bool {
        self.mel_bank.is_some()
    }

    fn hann_window(size: usize) -> Vec<f32> {
        (0..size)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32;
                0.5 * (1.0 - phase.cos())
            })
            .collect()
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2 + 1
    }

    pub fn bin_width(&self) -> f32 {
        self.sample_rate / self.fft_size as f32
    }

    /// Half-open bin index range covered by each configured band.
    pub fn band_ranges(&self) -> &[(usize, usize)] {
        &self.band_ranges
    }

    /// Analyzes one mono buffer. Non-finite samples count as silence, the
    /// spectrum covers the first `fft_size` samples (zero-padded when
    /// shorter) and the time-domain features cover the whole buffer.
    pub fn analyze(&self, samples: &[f32]) -> SpectralFrame {
        let clean: Vec<f32> = samples
            .iter()
            .map(|&s| if s.is_finite() { s } else { 0.0 })
            .collect();

        if clean.iter().all(|&s| s == 0.0) {
            return SpectralFrame {
                features: SpectralFeatures::zeroed(self.band_ranges.len()),
                magnitudes: vec![0.0; self.bin_count()],
                mel: None,
                silent: true,
            };
        }

        let windowed = self.apply_window(&clean);
        let magnitudes = self.compute_fft(&windowed);

        let spectral_centroid = self.spectral_centroid(&magnitudes);
        let features = SpectralFeatures {
            intensity: Self::rms(&clean),
            dominant_frequency: self.dominant_frequency(&magnitudes),
            spectral_centroid,
            spectral_bandwidth: self.spectral_bandwidth(&magnitudes, spectral_centroid),
            spectral_rolloff: self.spectral_rolloff(&magnitudes),
            zero_crossing_rate: Self::zero_crossing_rate(&clean),
            spectral_entropy: Self::spectral_entropy(&magnitudes),
            band_energies: self
                .band_ranges
                .iter()
                .map(|&(start, end)| Self::average_range(&magnitudes, start, end))
                .collect(),
            rhythm_strength: 0.0,
        };

        let mel = self.mel_bank.as_ref().map(|bank| bank.features(&magnitudes));

        SpectralFrame {
            features,
            magnitudes,
            mel,
            silent: false,
        }
    }

    fn apply_window(&self, audio_data: &[f32]) -> Vec<f32> {
        let len = self.fft_size.min(audio_data.len());
        (0..len)
            .map(|i| audio_data[i] * self.window[i])
            .collect()
    }

    fn compute_fft(&self, windowed_data: &[f32]) -> Vec<f32> {
        let mut buffer: Vec<Complex<f32>> = windowed_data
            .iter()
            .map(|&x| Complex::new(x, 0.0))
            .collect();

        if buffer.len() < self.fft_size {
            buffer.resize(self.fft_size, Complex::new(0.0, 0.0));
        }

        self.fft.process(&mut buffer);

        buffer[..self.bin_count()]
            .iter()
            .map(|c| c.norm() * 2.0 / self.fft_size as f32)
            .collect()
    }

    fn average_range(data: &[f32], start: usize, end: usize) -> f32 {
        if start >= end || start >= data.len() {
            return 0.0;
        }

        let end = end.min(data.len());
        let sum: f32 = data[start..end].iter().sum();
        sum / (end - start) as f32
    }

    fn rms(audio_data: &[f32]) -> f32 {
        if audio_data.is_empty() {
            return 0.0;
        }
        (audio_data.iter().map(|x| x * x).sum::<f32>() / audio_data.len() as f32).sqrt()
    }

    fn dominant_frequency(&self, spectrum: &[f32]) -> f32 {
        spectrum
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, &m)| m > EPSILON)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i as f32 * self.bin_width())
            .unwrap_or(0.0)
    }

    fn spectral_centroid(&self, spectrum: &[f32]) -> f32 {
        let total: f32 = spectrum.iter().sum();
        if total < EPSILON {
            return 0.0;
        }

        let weighted_sum: f32 = spectrum
            .iter()
            .enumerate()
            .map(|(i, &magnitude)| i as f32 * magnitude)
            .sum();

        weighted_sum / total * self.bin_width()
    }

    fn spectral_bandwidth(&self, spectrum: &[f32], centroid: f32) -> f32 {
        let total: f32 = spectrum.iter().sum();
        if total < EPSILON || centroid <= 0.0 {
            return 0.0;
        }

        let spread: f32 = spectrum
            .iter()
            .enumerate()
            .map(|(i, &magnitude)| (i as f32 * self.bin_width() - centroid).powi(2) * magnitude)
            .sum();

        (spread / total).sqrt()
    }

    fn spectral_rolloff(&self, spectrum: &[f32]) -> f32 {
        let total_power: f32 = spectrum.iter().map(|m| m * m).sum();
        if total_power < EPSILON {
            return 0.0;
        }
        let threshold = total_power * self.rolloff_fraction;

        let mut cumulative = 0.0;
        for (i, &magnitude) in spectrum.iter().enumerate() {
            cumulative += magnitude * magnitude;
            if cumulative >= threshold {
                return i as f32 * self.bin_width();
            }
        }
        (spectrum.len() - 1) as f32 * self.bin_width()
    }

    fn zero_crossing_rate(audio_data: &[f32]) -> f32 {
        if audio_data.len() < 2 {
            return 0.0;
        }

        let zero_crossings = audio_data
            .windows(2)
            .filter(|window| window[0] * window[1] < 0.0)
            .count();

        zero_crossings as f32 / audio_data.len() as f32
    }

    fn spectral_entropy(spectrum: &[f32]) -> f32 {
        let total: f32 = spectrum.iter().sum();
        if total < EPSILON {
            return 0.0;
        }

        let entropy: f32 = spectrum
            .iter()
            .map(|&m| m / total)
            .filter(|&p| p > EPSILON)
            .map(|p| -p * p.log2())
            .sum();
        entropy.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BandSpec;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sine(freq: f32, amplitude: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn test_silence_is_all_zero() {
        let analyzer = SpectralAnalyzer::new(&AnalysisConfig::default());
        for buffer in [vec![], vec![0.0; 2048], vec![f32::NAN; 512]] {
            let frame = analyzer.analyze(&buffer);
            assert!(frame.silent);
            assert!(frame.features.is_zero());
            assert_eq!(frame.features.band_energies.len(), 6);
            assert_eq!(frame.magnitudes.len(), 1025);
        }
    }

    #[test]
    fn test_sine_dominant_frequency() {
        let analyzer = SpectralAnalyzer::new(&AnalysisConfig::default());
        for freq in [110.0, 440.0, 1000.0, 5000.0] {
            let frame = analyzer.analyze(&sine(freq, 0.5, 44100.0, 2048));
            let error = (frame.features.dominant_frequency - freq).abs();
            assert!(
                error <= analyzer.bin_width(),
                "{} Hz detected as {}",
                freq,
                frame.features.dominant_frequency
            );
        }
    }

    #[test]
    fn test_sine_intensity_is_rms() {
        let analyzer = SpectralAnalyzer::new(&AnalysisConfig::default());
        let frame = analyzer.analyze(&sine(441.0, 1.0, 44100.0, 4410));
        assert!((frame.features.intensity - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.01);
    }

    #[test]
    fn test_band_ranges_follow_bin_frequencies() {
        let config = AnalysisConfig {
            sample_rate: 1000.0,
            fft_size: 100,
            bands: vec![
                BandSpec::new("low", 0.0, 100.0),
                BandSpec::new("mid", 100.0, 250.0),
                BandSpec::new("above_nyquist", 600.0, 900.0),
            ],
            ..AnalysisConfig::default()
        };
        let analyzer = SpectralAnalyzer::new(&config);
        // 10 Hz bins, 51 of them
        assert_eq!(analyzer.band_ranges(), &[(0, 10), (10, 25), (51, 51)]);

        let frame = analyzer.analyze(&sine(150.0, 0.5, 1000.0, 100));
        assert!(frame.features.band_energies[1] > frame.features.band_energies[0]);
        assert_eq!(frame.features.band_energies[2], 0.0);
    }

    #[test]
    fn test_non_negative_for_arbitrary_input() {
        let analyzer = SpectralAnalyzer::new(&AnalysisConfig::default());
        let mut rng = StdRng::seed_from_u64(7);
        for len in [1, 3, 100, 2048, 10_000] {
            let mut buffer: Vec<f32> = (0..len).map(|_| rng.random_range(-1.0..1.0)).collect();
            buffer[0] = f32::INFINITY;
            let features = analyzer.analyze(&buffer).features;
            assert!(features.intensity >= 0.0);
            assert!(features.band_energies.iter().all(|&e| e >= 0.0 && e.is_finite()));
            assert!(features.spectral_entropy.is_finite());
        }
    }

    #[test]
    fn test_noise_has_higher_entropy_than_sine() {
        let analyzer = SpectralAnalyzer::new(&AnalysisConfig::default());
        let mut rng = StdRng::seed_from_u64(42);
        let noise: Vec<f32> = (0..2048).map(|_| rng.random_range(-0.5..0.5)).collect();

        let noise_entropy = analyzer.analyze(&noise).features.spectral_entropy;
        let sine_entropy = analyzer.analyze(&sine(440.0, 0.5, 44100.0, 2048)).features.spectral_entropy;
        let max_entropy = (analyzer.bin_count() as f32).log2();

        assert!(noise_entropy > sine_entropy);
        assert!(noise_entropy <= max_entropy + 1e-3);
    }

    #[test]
    fn test_rolloff_and_centroid_track_content() {
        let analyzer = SpectralAnalyzer::new(&AnalysisConfig::default());
        let low = analyzer.analyze(&sine(200.0, 0.5, 44100.0, 2048)).features;
        let high = analyzer.analyze(&sine(8000.0, 0.5, 44100.0, 2048)).features;

        assert!(high.spectral_centroid > low.spectral_centroid);
        assert!(high.spectral_rolloff > low.spectral_rolloff);
        assert!((low.spectral_rolloff - 200.0).abs() <= 2.0 * analyzer.bin_width());
    }

    #[test]
    fn test_zero_crossing_rate() {
        let analyzer = SpectralAnalyzer::new(&AnalysisConfig::default());
        let alternating: Vec<f32> = (0..1000).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        let zcr = analyzer.analyze(&alternating).features.zero_crossing_rate;
        assert!((zcr - 0.999).abs() < 1e-3);
    }

    #[test]
    fn test_analysis_is_repeatable() {
        let analyzer = SpectralAnalyzer::new(&AnalysisConfig::default());
        let buffer = sine(330.0, 0.3, 44100.0, 3000);
        assert_eq!(analyzer.analyze(&buffer), analyzer.analyze(&buffer));
    }

    fn spectral_fields_match(a: &SpectralFrame, b: &SpectralFrame) {
        assert_eq!(a.magnitudes, b.magnitudes);
        assert_eq!(a.mel, b.mel);
        let (fa, fb) = (&a.features, &b.features);
        assert_eq!(fa.dominant_frequency, fb.dominant_frequency);
        assert_eq!(fa.spectral_centroid, fb.spectral_centroid);
        assert_eq!(fa.spectral_bandwidth, fb.spectral_bandwidth);
        assert_eq!(fa.spectral_rolloff, fb.spectral_rolloff);
        assert_eq!(fa.spectral_entropy, fb.spectral_entropy);
        assert_eq!(fa.band_energies, fb.band_energies);
    }

    #[test]
    fn test_samples_past_fft_size_only_affect_time_domain() {
        let analyzer = SpectralAnalyzer::new(&AnalysisConfig::default()).with_mel_features();
        let mut rng = StdRng::seed_from_u64(11);

        let mut quiet_tail = sine(440.0, 0.5, 44100.0, 2048);
        quiet_tail.extend(std::iter::repeat(0.0).take(2048));
        let mut noisy_tail = sine(440.0, 0.5, 44100.0, 2048);
        noisy_tail.extend((0..2048).map(|_| rng.random_range(-0.9..0.9)));

        let quiet = analyzer.analyze(&quiet_tail);
        let noisy = analyzer.analyze(&noisy_tail);
        spectral_fields_match(&quiet, &noisy);
        assert!(noisy.features.intensity > quiet.features.intensity);
        assert!(noisy.features.zero_crossing_rate > quiet.features.zero_crossing_rate);
    }

    #[test]
    fn test_short_buffer_matches_manual_zero_padding() {
        let analyzer = SpectralAnalyzer::new(&AnalysisConfig::default()).with_mel_features();
        let short = sine(1000.0, 0.5, 44100.0, 700);
        let mut padded = short.clone();
        padded.resize(analyzer.fft_size(), 0.0);

        let a = analyzer.analyze(&short);
        let b = analyzer.analyze(&padded);
        spectral_fields_match(&a, &b);
        assert!(a.features.intensity > b.features.intensity);
    }

    #[test]
    fn test_bandwidth_narrow_for_tone_wide_for_noise() {
        let analyzer = SpectralAnalyzer::new(&AnalysisConfig::default());
        let mut rng = StdRng::seed_from_u64(9);
        let noise: Vec<f32> = (0..2048).map(|_| rng.random_range(-0.5..0.5)).collect();

        let tone = analyzer.analyze(&sine(2000.0, 0.5, 44100.0, 2048)).features;
        let wide = analyzer.analyze(&noise).features;
        assert!(tone.spectral_bandwidth > 0.0);
        assert!(tone.spectral_bandwidth < 1500.0, "tone bandwidth {}", tone.spectral_bandwidth);
        assert!(wide.spectral_bandwidth > 4000.0, "noise bandwidth {}", wide.spectral_bandwidth);
    }

    #[test]
    fn test_mel_features_only_when_enabled() {
        let tone = sine(440.0, 0.5, 44100.0, 2048);

        let plain = SpectralAnalyzer::new(&AnalysisConfig::default());
        assert!(!plain.mel_enabled());
        assert_eq!(plain.analyze(&tone).mel, None);

        let analyzer = SpectralAnalyzer::new(&AnalysisConfig::default()).with_mel_features();
        let mel = analyzer.analyze(&tone).mel.unwrap();
        assert_eq!(mel.mel_db.len(), 128);
        assert_eq!(mel.mfcc.len(), 13);
        assert!(mel.mfcc.iter().all(|c| c.is_finite()));
        assert_eq!(analyzer.analyze(&[0.0; 2048]).mel, None);
    }
}
