//! Audio frames and fixed-size frame assembly

use std::sync::Arc;
use std::time::Duration;

/// A timestamped block of mono 16-bit PCM samples
///
/// Cloning is cheap: the sample data is shared and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    timestamp: Duration,
    sample_rate: u32,
    samples: Arc<[i16]>,
}

impl AudioFrame {
    /// Create a frame starting at `timestamp` (stream time)
    #[must_use]
    pub fn new(timestamp: Duration, sample_rate: u32, samples: impl Into<Arc<[i16]>>) -> Self {
        Self {
            timestamp,
            sample_rate,
            samples: samples.into(),
        }
    }

    /// Stream time of the first sample
    #[must_use]
    pub const fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// Stream time just after the last sample
    #[must_use]
    pub fn end(&self) -> Duration {
        self.timestamp + self.duration()
    }

    /// Playback length of the frame
    #[must_use]
    pub fn duration(&self) -> Duration {
        samples_duration(self.samples.len(), self.sample_rate)
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// PCM samples
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Duration covered by `samples` at `sample_rate`
#[must_use]
pub fn samples_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = (samples as u128) * 1_000_000_000 / u128::from(sample_rate);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Regroups variable-size device chunks into fixed-size frames
///
/// Frames are stamped with stream time: the session start offset plus the
/// number of samples already emitted.
#[derive(Debug)]
pub struct FrameAssembler {
    sample_rate: u32,
    frame_samples: usize,
    origin: Duration,
    emitted: usize,
    pending: Vec<i16>,
}

impl FrameAssembler {
    /// Create an assembler whose first frame starts at `origin`
    #[must_use]
    pub fn new(sample_rate: u32, frame_samples: usize, origin: Duration) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            sample_rate,
            frame_samples,
            origin,
            emitted: 0,
            pending: Vec::with_capacity(frame_samples),
        }
    }

    /// Add a chunk of samples, returning every frame it completes
    pub fn push(&mut self, chunk: &[i16]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        let mut rest = chunk;

        while !rest.is_empty() {
            let needed = self.frame_samples - self.pending.len();
            let take = needed.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.frame_samples {
                frames.push(self.emit());
            }
        }

        frames
    }

    /// Emit any partial frame still pending
    pub fn flush(&mut self) -> Option<AudioFrame> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.emit())
        }
    }

    /// Stream time at which the next frame will start
    #[must_use]
    pub fn position(&self) -> Duration {
        self.origin + samples_duration(self.emitted, self.sample_rate)
    }

    /// Drop pending samples and restart timestamps at `origin`
    pub fn reset(&mut self, origin: Duration) {
        self.origin = origin;
        self.emitted = 0;
        self.pending.clear();
    }

    fn emit(&mut self) -> AudioFrame {
        let timestamp = self.position();
        let samples = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_samples));
        self.emitted += samples.len();
        AudioFrame::new(timestamp, self.sample_rate, samples)
    }
}
