//! Compact per-frame payload for visualisation clients.
//!
//! Four coefficients summarise the band energies from low to high, `pmw`
//! carries the rhythm strength. Frames are paced to a fixed rate against
//! stream time.

pub mod server;

use serde::{Deserialize, Serialize};

use crate::audio::Analysis;

const EPSILON: f32 = 1e-10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    /// Band energy summary, each in 0..1, relative to the loudest group.
    pub c: [f32; 4],
    /// Rhythm strength in 0..1.
    pub pmw: f32,
    /// Stream time of the source analysis, in seconds.
    pub timestamp: f64,
    /// Telemetry frame counter.
    pub frame: u64,
}

impl TelemetryFrame {
    pub fn from_analysis(analysis: &Analysis, frame: u64) -> Self {
        Self {
            c: band_coefficients(&analysis.features.band_energies),
            pmw: analysis.features.rhythm_strength.clamp(0.0, 1.0),
            timestamp: analysis.timestamp,
            frame,
        }
    }

    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Splits the bands into four contiguous groups, averages each group and
/// scales so the loudest group is exactly 1.0.
fn band_coefficients(bands: &[f32]) -> [f32; 4] {
    let mut c = [0.0f32; 4];
    let n = bands.len();
    if n == 0 {
        return c;
    }

    for (g, coefficient) in c.iter_mut().enumerate() {
        let start = g * n / 4;
        let end = (g + 1) * n / 4;
        let group = if start < end {
            &bands[start..end]
        } else {
            let nearest = start.min(n - 1);
            &bands[nearest..nearest + 1]
        };
        *coefficient = group.iter().sum::<f32>() / group.len() as f32;
    }

    let peak = c.iter().fold(0.0f32, |a, &b| a.max(b));
    if peak <= EPSILON {
        return [0.0; 4];
    }
    c.map(|mean| (mean / peak).clamp(0.0, 1.0))
}

/// Limits telemetry emission to `rate_hz` measured on analysis timestamps.
#[derive(Debug, Clone)]
pub struct TelemetryPacer {
    interval: f64,
    next_due: Option<f64>,
    emitted: u64,
}

impl TelemetryPacer {
    pub fn new(rate_hz: f32) -> Self {
        Self {
            interval: 1.0 / rate_hz.max(f32::MIN_POSITIVE) as f64,
            next_due: None,
            emitted: 0,
        }
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn offer(&mut self, analysis: &Analysis) -> Option<TelemetryFrame> {
        let now = analysis.timestamp;
        let due = self.next_due.unwrap_or(now);
        if now + 1e-9 < due {
            return None;
        }

        let mut next = due + self.interval;
        if next <= now {
            next = now + self.interval;
        }
        self.next_due = Some(next);

        let frame = TelemetryFrame::from_analysis(analysis, self.emitted);
        self.emitted += 1;
        Some(frame)
    }

    pub fn reset(&mut self) {
        self.next_due = None;
        self.emitted = 0;
    }
}
