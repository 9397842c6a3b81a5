//! Bounded energy window and utterance accumulation
//!
//! Two buffers with different policies live here:
//! - [`RollingWindow`] keeps recent energy samples for wake detection and
//!   evicts by age
//! - [`UtteranceBuffer`] keeps every frame of the command being recorded and
//!   never evicts; its size is bounded by the max-duration cap instead

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use super::activity::EnergySample;
use super::frame::{AudioFrame, samples_duration};

/// Energy samples no older than a fixed horizon
#[derive(Debug)]
pub struct RollingWindow {
    horizon: Duration,
    samples: VecDeque<EnergySample>,
}

/// Summary statistics over a [`RollingWindow`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    /// Samples in the window
    pub count: usize,
    /// Mean energy
    pub average: f32,
    /// Highest energy
    pub peak: f32,
    /// Samples above the spike level
    pub spikes: usize,
}

impl RollingWindow {
    /// Create an empty window
    #[must_use]
    pub fn new(horizon: Duration) -> Self {
        Self {
            horizon,
            samples: VecDeque::new(),
        }
    }

    /// Append a sample, then evict everything older than the horizon
    ///
    /// A sample stamped earlier than the newest one is clamped forward so
    /// timestamps stay non-decreasing.
    pub fn push(&mut self, mut sample: EnergySample) {
        if let Some(last) = self.samples.back() {
            if sample.timestamp < last.timestamp {
                tracing::trace!(
                    timestamp = ?sample.timestamp,
                    newest = ?last.timestamp,
                    "out of order energy sample"
                );
                sample.timestamp = last.timestamp;
            }
        }

        let newest = sample.timestamp;
        self.samples.push_back(sample);

        while let Some(front) = self.samples.front() {
            if newest.saturating_sub(front.timestamp) > self.horizon {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Statistics over the window, counting samples above `spike_level`
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self, spike_level: f32) -> WindowStats {
        if self.samples.is_empty() {
            return WindowStats {
                count: 0,
                average: 0.0,
                peak: 0.0,
                spikes: 0,
            };
        }

        let mut sum = 0.0f64;
        let mut peak = 0.0f32;
        let mut spikes = 0;
        for sample in &self.samples {
            sum += f64::from(sample.energy);
            peak = peak.max(sample.energy);
            if sample.energy > spike_level {
                spikes += 1;
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        let average = (sum / self.samples.len() as f64) as f32;

        WindowStats {
            count: self.samples.len(),
            average,
            peak,
            spikes,
        }
    }

    /// Number of samples held
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the window is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Configured age horizon
    #[must_use]
    pub const fn horizon(&self) -> Duration {
        self.horizon
    }

    /// Iterate samples oldest first
    pub fn iter(&self) -> impl Iterator<Item = &EnergySample> {
        self.samples.iter()
    }

    /// Drop all samples
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Frames of the command currently being recorded
#[derive(Debug)]
pub struct UtteranceBuffer {
    frames: Vec<AudioFrame>,
    samples: usize,
    voice_frames: usize,
    cap_samples: usize,
}

impl UtteranceBuffer {
    /// Create an empty buffer that reports overrun past `cap_samples`
    #[must_use]
    pub const fn new(cap_samples: usize) -> Self {
        Self {
            frames: Vec::new(),
            samples: 0,
            voice_frames: 0,
            cap_samples,
        }
    }

    /// Append a frame
    ///
    /// Returns `false` once the sanity cap has been exceeded.
    pub fn push(&mut self, frame: AudioFrame, is_voice: bool) -> bool {
        self.samples += frame.len();
        if is_voice {
            self.voice_frames += 1;
        }
        self.frames.push(frame);
        self.samples <= self.cap_samples
    }

    /// Move the contents out, leaving the buffer empty
    pub fn take(&mut self) -> Vec<AudioFrame> {
        self.samples = 0;
        self.voice_frames = 0;
        std::mem::take(&mut self.frames)
    }

    /// Drop all frames
    pub fn clear(&mut self) {
        self.frames.clear();
        self.samples = 0;
        self.voice_frames = 0;
    }

    /// Frames held
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frames are held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Total samples held
    #[must_use]
    pub const fn sample_count(&self) -> usize {
        self.samples
    }

    /// Frames that were classified as voice
    #[must_use]
    pub const fn voice_frames(&self) -> usize {
        self.voice_frames
    }

    /// Sanity cap in samples
    #[must_use]
    pub const fn cap_samples(&self) -> usize {
        self.cap_samples
    }
}

/// Why a recording was finalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeReason {
    /// Silence outlasted the silence timeout
    Silence,
    /// Recording reached the max command duration
    MaxDuration,
    /// Buffer passed its sanity cap before the duration timer fired
    Overrun,
    /// Frame source ended while recording
    EndOfStream,
}

/// An immutable snapshot of one recorded command
#[derive(Debug, Clone)]
pub struct Segment {
    epoch: u64,
    reason: FinalizeReason,
    voice_frames: usize,
    frames: Arc<[AudioFrame]>,
}

impl Segment {
    /// Wrap frames finalized during `epoch`
    #[must_use]
    pub fn new(
        epoch: u64,
        reason: FinalizeReason,
        voice_frames: usize,
        frames: Vec<AudioFrame>,
    ) -> Self {
        Self {
            epoch,
            reason,
            voice_frames,
            frames: frames.into(),
        }
    }

    /// Activation epoch the segment was recorded in
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Why recording stopped
    #[must_use]
    pub const fn reason(&self) -> FinalizeReason {
        self.reason
    }

    /// Frames in arrival order
    #[must_use]
    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    /// Frames classified as voice while recording
    #[must_use]
    pub const fn voice_frames(&self) -> usize {
        self.voice_frames
    }

    /// Sample rate of the recorded audio
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.frames
            .first()
            .map_or(crate::config::DEFAULT_SAMPLE_RATE, AudioFrame::sample_rate)
    }

    /// All samples concatenated
    #[must_use]
    pub fn samples(&self) -> Vec<i16> {
        let total = self.frames.iter().map(AudioFrame::len).sum();
        let mut out = Vec::with_capacity(total);
        for frame in self.frames.iter() {
            out.extend_from_slice(frame.samples());
        }
        out
    }

    /// Audio length
    #[must_use]
    pub fn duration(&self) -> Duration {
        let total = self.frames.iter().map(AudioFrame::len).sum();
        samples_duration(total, self.sample_rate())
    }

    /// Whether the segment holds no audio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.iter().all(AudioFrame::is_empty)
    }
}

/// The window and utterance buffers owned by the state machine
#[derive(Debug)]
pub struct SegmentBuffer {
    /// Pre-activation energy history
    pub window: RollingWindow,
    /// In-progress command audio
    pub utterance: UtteranceBuffer,
}

impl SegmentBuffer {
    /// Create empty buffers
    #[must_use]
    pub fn new(horizon: Duration, cap_samples: usize) -> Self {
        Self {
            window: RollingWindow::new(horizon),
            utterance: UtteranceBuffer::new(cap_samples),
        }
    }

    /// Drop everything held in both buffers
    pub fn clear(&mut self) {
        self.window.clear();
        self.utterance.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn energy(ms: u64, energy: f32) -> EnergySample {
        EnergySample {
            timestamp: Duration::from_millis(ms),
            energy,
        }
    }

    #[test]
    fn test_window_evicts_by_age() {
        let mut window = RollingWindow::new(Duration::from_millis(2000));
        for i in 0..50 {
            window.push(energy(i * 100, 10.0));
        }

        // newest at 4900ms, oldest kept at 2900ms
        assert_eq!(window.len(), 21);
        let oldest = window.iter().next().unwrap();
        assert_eq!(oldest.timestamp, Duration::from_millis(2900));
    }

    #[test]
    fn test_window_clamps_out_of_order() {
        let mut window = RollingWindow::new(Duration::from_secs(2));
        window.push(energy(500, 1.0));
        window.push(energy(300, 2.0));

        let stamps: Vec<_> = window.iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![Duration::from_millis(500); 2]);
    }

    #[test]
    fn test_window_stats() {
        let mut window = RollingWindow::new(Duration::from_secs(3));
        for (i, e) in [100.0, 700.0, 900.0, 300.0].into_iter().enumerate() {
            window.push(energy(i as u64 * 100, e));
        }

        let stats = window.stats(600.0);
        assert_eq!(stats.count, 4);
        assert!((stats.average - 500.0).abs() < 0.01);
        assert!((stats.peak - 900.0).abs() < f32::EPSILON);
        assert_eq!(stats.spikes, 2);
    }

    #[test]
    fn test_empty_stats() {
        let window = RollingWindow::new(Duration::from_secs(1));
        assert_eq!(window.stats(1.0).count, 0);
    }

    #[test]
    fn test_utterance_cap() {
        let mut buffer = UtteranceBuffer::new(3200);
        let frame = |ms| AudioFrame::new(Duration::from_millis(ms), 16000, vec![0i16; 1600]);

        assert!(buffer.push(frame(0), true));
        assert!(buffer.push(frame(100), false));
        assert!(!buffer.push(frame(200), false));
        assert_eq!(buffer.voice_frames(), 1);

        let frames = buffer.take();
        assert_eq!(frames.len(), 3);
        assert!(buffer.is_empty());
        assert_eq!(buffer.sample_count(), 0);
    }

    #[test]
    fn test_segment_samples_in_order() {
        let frames = vec![
            AudioFrame::new(Duration::ZERO, 16000, vec![1i16, 2]),
            AudioFrame::new(Duration::from_micros(125), 16000, vec![3i16]),
        ];
        let segment = Segment::new(4, FinalizeReason::Silence, 1, frames);

        assert_eq!(segment.samples(), vec![1, 2, 3]);
        assert_eq!(segment.epoch(), 4);
        assert_eq!(segment.duration(), Duration::from_nanos(187_500));
        assert!(!segment.is_empty());
    }
}
