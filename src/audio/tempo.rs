use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::history::RollingHistory;
use crate::config::TrackerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerState {
    /// Fewer than two beats; no interval to work from.
    ColdStart,
    /// Collecting beats until the configured warm-up count is exceeded.
    Warming,
    /// Locked onto a period; only on-grid onsets count as beats.
    Tracking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RhythmPattern {
    Steady,
    Syncopated,
    /// Long or irregular gaps between beats.
    Sparse,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoSnapshot {
    pub state: TrackerState,
    pub bpm: Option<f32>,
    pub pattern: RhythmPattern,
    pub beat_count: u64,
    pub rhythm_strength: f32,
    pub last_beat: Option<f64>,
}

/// Median-interval tempo estimate over a bounded window of beat times.
pub struct TempoTracker {
    config: TrackerConfig,
    beats: RollingHistory<f64>,
    beat_count: u64,
    state: TrackerState,
}

impl TempoTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            config: config.clone(),
            beats: RollingHistory::new(config.capacity),
            beat_count: 0,
            state: TrackerState::ColdStart,
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn beat_count(&self) -> u64 {
        self.beat_count
    }

    pub fn last_beat(&self) -> Option<f64> {
        self.beats.last().copied()
    }

    fn min_period(&self) -> f64 {
        60.0 / self.config.max_bpm as f64
    }

    fn max_period(&self) -> f64 {
        60.0 / self.config.min_bpm as f64
    }

    /// Whether an onset at `timestamp` should be promoted to a beat.
    pub fn is_beat_candidate(&self, timestamp: f64) -> bool {
        let Some(last) = self.last_beat() else {
            return true;
        };

        let interval = timestamp - last;
        if interval < self.min_period() {
            return false;
        }

        match (self.state, self.bpm()) {
            (TrackerState::Tracking, Some(bpm)) => {
                // k >= 1 whole periods since the last beat
                let period = 60.0 / bpm as f64;
                let tolerance = self.config.beat_tolerance as f64 * period;
                let k = (interval / period).round().max(1.0);
                (interval - k * period).abs() <= tolerance
            }
            _ => true,
        }
    }

    pub fn record_beat(&mut self, timestamp: f64) {
        if let Some(last) = self.last_beat() {
            if timestamp <= last {
                debug!("Ignoring out-of-order beat at {:.3}s (last {:.3}s)", timestamp, last);
                return;
            }
        }

        self.beats.push(timestamp);
        self.beat_count += 1;
        self.update_state();
    }

    /// Resets to cold start when no beat has arrived within the silence timeout.
    /// This is the only path back to cold start while beats keep arriving.
    /// Returns true if a reset happened.
    pub fn tick(&mut self, now: f64) -> bool {
        match self.last_beat() {
            Some(last) if now - last > self.config.silence_timeout_secs => {
                info!(
                    "No beat for {:.1}s, tempo tracker back to cold start",
                    now - last
                );
                self.reset();
                true
            }
            _ => false,
        }
    }

    pub fn reset(&mut self) {
        self.beats.clear();
        self.beat_count = 0;
        self.state = TrackerState::ColdStart;
    }

    fn update_state(&mut self) {
        let next = if self.beat_count < 2 {
            TrackerState::ColdStart
        } else if self.beat_count > self.config.warmup_beats as u64 {
            TrackerState::Tracking
        } else {
            TrackerState::Warming
        };

        if next != self.state {
            info!(
                "Tempo tracker {:?} -> {:?} after {} beats",
                self.state, next, self.beat_count
            );
            self.state = next;
        }
    }

    /// Inter-beat intervals (seconds) that fall inside the plausible tempo range.
    pub fn intervals(&self) -> Vec<f32> {
        let (min, max) = (self.min_period(), self.max_period());
        let times: Vec<f64> = self.beats.iter().copied().collect();
        times
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .filter(|&interval| interval >= min && interval <= max)
            .map(|interval| interval as f32)
            .collect()
    }

    pub fn bpm(&self) -> Option<f32> {
        let intervals = self.intervals();
        median(&intervals).map(|interval| 60.0 / interval)
    }

    pub fn pattern(&self) -> RhythmPattern {
        let intervals = self.intervals();
        if intervals.len() < 3 {
            return RhythmPattern::Unknown;
        }

        if median(&intervals).is_some_and(|m| m > self.config.sparse_interval_secs) {
            return RhythmPattern::Sparse;
        }

        let (mean, cv) = mean_and_cv(&intervals);
        if cv <= self.config.steady_cv {
            return RhythmPattern::Steady;
        }

        let deviations: Vec<f32> = intervals.iter().map(|&i| i - mean).collect();
        let alternating = deviations
            .windows(2)
            .filter(|pair| pair[0] * pair[1] < 0.0)
            .count();
        let pairs = deviations.len() - 1;

        if alternating as f32 >= 0.75 * pairs as f32 {
            RhythmPattern::Syncopated
        } else {
            RhythmPattern::Sparse
        }
    }

    /// Regularity of recent beats in 0..1; 0 until two intervals exist.
    pub fn rhythm_strength(&self) -> f32 {
        let intervals = self.intervals();
        if intervals.len() < 2 {
            return 0.0;
        }
        let (_, cv) = mean_and_cv(&intervals);
        (1.0 / (1.0 + 5.0 * cv)).clamp(0.0, 1.0)
    }

    pub fn snapshot(&self) -> TempoSnapshot {
        TempoSnapshot {
            state: self.state,
            bpm: self.bpm(),
            pattern: self.pattern(),
            beat_count: self.beat_count,
            rhythm_strength: self.rhythm_strength(),
            last_beat: self.last_beat(),
        }
    }
}

fn median(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

fn mean_and_cv(values: &[f32]) -> (f32, f32) {
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    if mean <= 0.0 {
        return (mean, 0.0);
    }
    let variance = values.iter().map(|&v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32;
    (mean, variance.sqrt() / mean)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with_warmup(warmup_beats: usize) -> TempoTracker {
        TempoTracker::new(&TrackerConfig {
            warmup_beats,
            ..TrackerConfig::default()
        })
    }

    fn feed(tracker: &mut TempoTracker, times: &[f64]) {
        for &t in times {
            tracker.record_beat(t);
        }
    }

    #[test]
    fn test_state_machine_progression() {
        let mut tracker = tracker_with_warmup(3);
        assert_eq!(tracker.state(), TrackerState::ColdStart);

        tracker.record_beat(0.0);
        assert_eq!(tracker.state(), TrackerState::ColdStart);
        tracker.record_beat(0.5);
        assert_eq!(tracker.state(), TrackerState::Warming);
        tracker.record_beat(1.0);
        assert_eq!(tracker.state(), TrackerState::Warming);
        tracker.record_beat(1.5);
        assert_eq!(tracker.state(), TrackerState::Tracking);
    }

    #[test]
    fn test_median_bpm() {
        let mut tracker = tracker_with_warmup(8);
        assert_eq!(tracker.bpm(), None);

        feed(&mut tracker, &[0.0, 0.5, 1.0, 1.5, 2.0]);
        assert!((tracker.bpm().unwrap() - 120.0).abs() < 1e-3);

        // one outlier interval barely moves the median
        tracker.record_beat(2.9);
        assert!((tracker.bpm().unwrap() - 120.0).abs() < 1e-3);
    }

    #[test]
    fn test_median_of_even_count() {
        assert_eq!(median(&[0.4, 0.6]), Some(0.5));
        assert_eq!(median(&[0.6, 0.2, 0.4]), Some(0.4));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_implausible_intervals_ignored() {
        let mut tracker = tracker_with_warmup(8);
        // 0.1s apart is faster than 300 BPM
        feed(&mut tracker, &[0.0, 0.1]);
        assert!(tracker.intervals().is_empty());
        assert_eq!(tracker.bpm(), None);
    }

    #[test]
    fn test_beat_candidate_rules() {
        let mut tracker = tracker_with_warmup(3);
        assert!(tracker.is_beat_candidate(0.0));

        feed(&mut tracker, &[0.0, 0.5, 1.0, 1.5]);
        assert_eq!(tracker.state(), TrackerState::Tracking);

        assert!(!tracker.is_beat_candidate(1.6), "faster than max tempo");
        assert!(tracker.is_beat_candidate(2.0), "on the grid");
        assert!(tracker.is_beat_candidate(2.52), "within tolerance of two periods");
        assert!(!tracker.is_beat_candidate(1.75), "off-beat while tracking");
        assert!(tracker.is_beat_candidate(3.0), "three periods after a dropout");
        assert!(tracker.is_beat_candidate(4.0), "five periods after a dropout");
        assert!(!tracker.is_beat_candidate(3.75), "off-grid after a dropout");
    }

    #[test]
    fn test_warming_accepts_any_plausible_interval() {
        let mut tracker = tracker_with_warmup(8);
        feed(&mut tracker, &[0.0, 0.5, 1.0]);
        assert_eq!(tracker.state(), TrackerState::Warming);
        assert!(tracker.is_beat_candidate(1.3));
    }

    fn steady_to_five_seconds(tracker: &mut TempoTracker) {
        let times: Vec<f64> = (0..=10).map(|i| i as f64 * 0.5).collect();
        feed(tracker, &times);
        assert_eq!(tracker.state(), TrackerState::Tracking);
    }

    #[test]
    fn test_gap_shorter_than_timeout_keeps_lock() {
        let mut tracker = TempoTracker::new(&TrackerConfig {
            silence_timeout_secs: 10.0,
            ..TrackerConfig::default()
        });
        steady_to_five_seconds(&mut tracker);

        assert!(!tracker.tick(7.5));
        assert!(tracker.is_beat_candidate(7.5));
        tracker.record_beat(7.5);

        assert_eq!(tracker.state(), TrackerState::Tracking);
        assert_eq!(tracker.beat_count(), 12);
        assert!((tracker.bpm().unwrap() - 120.0).abs() < 1e-3);
    }

    #[test]
    fn test_missed_beats_stay_on_grid() {
        let mut tracker = TempoTracker::new(&TrackerConfig::default());
        steady_to_five_seconds(&mut tracker);

        // 5.5 and 6.0 missing
        for t in [6.5, 7.0, 7.5] {
            assert!(!tracker.tick(t));
            assert!(tracker.is_beat_candidate(t), "onset at {}", t);
            tracker.record_beat(t);
        }

        assert_eq!(tracker.state(), TrackerState::Tracking);
        assert!((tracker.bpm().unwrap() - 120.0).abs() < 1e-3);
        // the 1.5s gap is plausible on its own and stays in the window
        assert_eq!(tracker.intervals().len(), 13);
    }

    #[test]
    fn test_silence_timeout_resets() {
        let mut tracker = tracker_with_warmup(3);
        feed(&mut tracker, &[0.0, 0.5, 1.0, 1.5]);

        assert!(!tracker.tick(3.0));
        assert_eq!(tracker.state(), TrackerState::Tracking);

        assert!(tracker.tick(4.6));
        assert_eq!(tracker.state(), TrackerState::ColdStart);
        assert_eq!(tracker.beat_count(), 0);
        assert_eq!(tracker.last_beat(), None);
    }

    #[test]
    fn test_pattern_classification() {
        let mut steady = tracker_with_warmup(8);
        feed(&mut steady, &[0.0, 0.5, 1.0, 1.5, 2.0]);
        assert_eq!(steady.pattern(), RhythmPattern::Steady);
        assert!(steady.rhythm_strength() > 0.99);

        let mut swung = tracker_with_warmup(8);
        feed(&mut swung, &[0.0, 0.3, 1.0, 1.3, 2.0, 2.3]);
        assert_eq!(swung.pattern(), RhythmPattern::Syncopated);

        let mut slow = tracker_with_warmup(8);
        feed(&mut slow, &[0.0, 1.8, 3.6, 5.4]);
        assert_eq!(slow.pattern(), RhythmPattern::Sparse);

        let mut few = tracker_with_warmup(8);
        feed(&mut few, &[0.0, 0.5]);
        assert_eq!(few.pattern(), RhythmPattern::Unknown);
        assert_eq!(few.rhythm_strength(), 0.0);
    }

    #[test]
    fn test_irregular_intervals_are_sparse() {
        let mut tracker = tracker_with_warmup(8);
        // deviations: -, -, +, + (no alternation)
        feed(&mut tracker, &[0.0, 0.3, 0.6, 1.4, 2.2]);
        assert_eq!(tracker.pattern(), RhythmPattern::Sparse);
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut tracker = tracker_with_warmup(3);
        feed(&mut tracker, &[0.0, 0.5]);
        let json = serde_json::to_string(&tracker.snapshot()).unwrap();
        assert!(json.contains("\"state\":\"warming\""));
        assert!(json.contains("\"pattern\":\"unknown\""));
    }
}
