//! Per-frame energy and voice activity decision

use std::time::Duration;

use super::frame::AudioFrame;

/// Energy of one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergySample {
    /// Stream time of the frame this sample was computed from
    pub timestamp: Duration,
    /// RMS amplitude on the 16-bit scale (0 to 32768)
    pub energy: f32,
}

/// Computes frame energy and classifies it against a voice threshold
#[derive(Debug, Clone, Copy)]
pub struct ActivityDetector {
    threshold: f32,
}

impl ActivityDetector {
    /// Create a detector with the given voice threshold
    #[must_use]
    pub const fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Compute the energy sample for a frame
    #[must_use]
    pub fn detect(&self, frame: &AudioFrame) -> EnergySample {
        EnergySample {
            timestamp: frame.timestamp(),
            energy: calculate_rms(frame.samples()),
        }
    }

    /// Whether a sample counts as voice
    #[must_use]
    pub fn is_voice(&self, sample: &EnergySample) -> bool {
        sample.energy > self.threshold
    }

    /// Configured voice threshold
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }
}

/// Calculate RMS energy of 16-bit samples
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let s = f64::from(s);
            s * s
        })
        .sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}
