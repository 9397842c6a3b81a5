//! Wake pattern detection
//!
//! Recognizes a wake phrase from energy statistics alone: sustained loudness
//! across the window plus at least a couple of distinct spikes (one per
//! syllable or word of a short phrase like "hey navi").

use super::segment::{RollingWindow, WindowStats};

/// Thresholds for the energy-based wake test
#[derive(Debug, Clone, Copy)]
pub struct WakePattern {
    threshold: f32,
    min_samples: usize,
    min_spikes: usize,
}

impl WakePattern {
    /// Create a wake test around a voice threshold
    #[must_use]
    pub const fn new(threshold: f32, min_samples: usize, min_spikes: usize) -> Self {
        Self {
            threshold,
            min_samples,
            min_spikes,
        }
    }

    /// Energy a sample must exceed to count as a spike
    #[must_use]
    pub fn spike_level(&self) -> f32 {
        self.threshold * 2.0
    }

    /// Evaluate the window
    ///
    /// Returns the statistics when the window holds a wake pattern.
    #[must_use]
    pub fn matches(&self, window: &RollingWindow) -> Option<WindowStats> {
        if window.len() < self.min_samples {
            return None;
        }

        let stats = window.stats(self.spike_level());
        let triggered = stats.average > self.threshold
            && stats.peak > self.spike_level()
            && stats.spikes >= self.min_spikes;

        tracing::trace!(
            average = stats.average,
            peak = stats.peak,
            spikes = stats.spikes,
            triggered,
            "wake test"
        );

        triggered.then_some(stats)
    }
}
