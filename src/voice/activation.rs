//! Activation state machine
//!
//! Consumes frames, decides when the wake pattern occurred, records the
//! following command and emits it as an immutable [`Segment`].
//!
//! ```text
//!   Idle ──wake pattern──▶ WakeCandidate ──▶ RecordingCommand
//!    ▲                                          │
//!    │                          silence / max duration / overrun
//!    │                                          ▼
//!    └──────── processing complete ─────── Processing
//! ```
//!
//! All timing is in stream time. Timers are tagged with the activation epoch
//! and an arming sequence number, so a timer cancelled or left over from an
//! earlier recording can never finalize a later one.

use std::time::Duration;

use crate::config::SegmentationConfig;

use super::activity::ActivityDetector;
use super::frame::AudioFrame;
use super::segment::{FinalizeReason, Segment, SegmentBuffer};
use super::wake_word::WakePattern;

/// Phase of the activation cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    /// Passive listening for the wake pattern
    Idle,
    /// Wake pattern seen; collapses into `RecordingCommand` within one step
    WakeCandidate,
    /// Accumulating the command utterance
    RecordingCommand,
    /// Segment handed off for transcription
    Processing,
}

/// Timers owned by a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Ends the recording after contiguous silence
    Silence,
    /// Hard cap on recording length
    MaxDuration,
}

/// Identity of one armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken {
    /// Activation epoch the timer belongs to
    pub epoch: u64,
    /// Which timer
    pub kind: TimerKind,
    seq: u64,
}

/// An armed timer and its stream-time deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedTimer {
    /// Token to pass back when the deadline passes
    pub token: TimerToken,
    /// Stream time at which the timer fires
    pub deadline: Duration,
}

/// Result of feeding the machine one event
#[derive(Debug, Clone)]
pub enum Step {
    /// Nothing externally visible happened
    Continue,
    /// Wake pattern accepted; recording started
    Activated {
        /// New activation epoch
        epoch: u64,
    },
    /// Recording finished; the segment must be processed
    Finalized(Segment),
}

/// Drives wake detection and command segmentation
#[derive(Debug)]
pub struct ActivationStateMachine {
    state: ActivationState,
    epoch: u64,
    timer_seq: u64,
    detector: ActivityDetector,
    wake: WakePattern,
    buffers: SegmentBuffer,
    silence_timeout: Duration,
    max_duration: Duration,
    silence_timer: Option<ArmedTimer>,
    max_timer: Option<ArmedTimer>,
    dropped_frames: u64,
}

impl ActivationStateMachine {
    /// Create a machine in the `Idle` state
    #[must_use]
    pub fn new(config: &SegmentationConfig) -> Self {
        Self {
            state: ActivationState::Idle,
            epoch: 0,
            timer_seq: 0,
            detector: ActivityDetector::new(config.voice_threshold),
            wake: WakePattern::new(
                config.voice_threshold,
                config.min_wake_samples,
                config.min_wake_spikes,
            ),
            buffers: SegmentBuffer::new(config.wake_window, config.overrun_cap_samples()),
            silence_timeout: config.silence_timeout,
            max_duration: config.max_command_duration,
            silence_timer: None,
            max_timer: None,
            dropped_frames: 0,
        }
    }

    /// Feed one captured frame
    pub fn on_frame(&mut self, frame: AudioFrame) -> Step {
        match self.state {
            ActivationState::Idle => self.idle_frame(&frame),
            ActivationState::RecordingCommand => self.recording_frame(frame),
            ActivationState::Processing => {
                // Segmentation is paused until the segment has been handled
                self.dropped_frames += 1;
                tracing::trace!(timestamp = ?frame.timestamp(), "frame dropped while processing");
                Step::Continue
            }
            ActivationState::WakeCandidate => {
                // Unreachable between steps; treat like a recording frame
                self.state = ActivationState::RecordingCommand;
                self.recording_frame(frame)
            }
        }
    }

    /// Fire a timer whose deadline has passed
    ///
    /// Tokens that are no longer armed (cancelled, or from an earlier epoch)
    /// are ignored.
    pub fn on_timer(&mut self, token: TimerToken) -> Step {
        if self.state != ActivationState::RecordingCommand || token.epoch != self.epoch {
            tracing::trace!(
                epoch = token.epoch,
                current = self.epoch,
                kind = ?token.kind,
                "stale timer ignored"
            );
            return Step::Continue;
        }

        let armed = match token.kind {
            TimerKind::Silence => self.silence_timer,
            TimerKind::MaxDuration => self.max_timer,
        };

        match armed {
            Some(timer) if timer.token == token => {
                let reason = match token.kind {
                    TimerKind::Silence => FinalizeReason::Silence,
                    TimerKind::MaxDuration => FinalizeReason::MaxDuration,
                };
                self.finalize(reason)
            }
            _ => {
                tracing::trace!(kind = ?token.kind, "cancelled timer ignored");
                Step::Continue
            }
        }
    }

    /// Mark the in-flight segment of `epoch` as handled and return to `Idle`
    ///
    /// Returns `false` if the machine was not processing that epoch.
    pub fn finish_processing(&mut self, epoch: u64) -> bool {
        if self.state != ActivationState::Processing || epoch != self.epoch {
            tracing::debug!(epoch, current = self.epoch, state = ?self.state, "stale processing completion");
            return false;
        }

        self.state = ActivationState::Idle;
        // Energy from before the command must not feed the next wake decision
        self.buffers.window.clear();
        tracing::debug!(epoch, "back to idle");
        true
    }

    /// Abandon whatever is in progress after a device fault
    ///
    /// Discards both buffers, disarms timers and starts a new epoch so any
    /// outstanding timer or processing completion becomes stale.
    pub fn abort(&mut self) {
        if self.state != ActivationState::Idle || !self.buffers.utterance.is_empty() {
            tracing::warn!(
                state = ?self.state,
                frames = self.buffers.utterance.len(),
                "aborting activation"
            );
        }

        self.state = ActivationState::Idle;
        self.buffers.clear();
        self.silence_timer = None;
        self.max_timer = None;
        self.epoch += 1;
    }

    /// Finalize an in-progress recording because the source ended
    pub fn flush(&mut self) -> Step {
        if self.state == ActivationState::RecordingCommand {
            self.finalize(FinalizeReason::EndOfStream)
        } else {
            Step::Continue
        }
    }

    /// Earliest armed deadline
    #[must_use]
    pub fn next_deadline(&self) -> Option<ArmedTimer> {
        match (self.silence_timer, self.max_timer) {
            (Some(s), Some(m)) => Some(if m.deadline < s.deadline { m } else { s }),
            (s, m) => s.or(m),
        }
    }

    /// Current phase
    #[must_use]
    pub const fn state(&self) -> ActivationState {
        self.state
    }

    /// Current activation epoch
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Frames held in the utterance buffer
    #[must_use]
    pub fn utterance_len(&self) -> usize {
        self.buffers.utterance.len()
    }

    /// Samples held in the wake window
    #[must_use]
    pub fn window_len(&self) -> usize {
        self.buffers.window.len()
    }

    /// Whether a silence timer is armed
    #[must_use]
    pub const fn silence_armed(&self) -> bool {
        self.silence_timer.is_some()
    }

    /// Frames dropped while processing
    #[must_use]
    pub const fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    fn idle_frame(&mut self, frame: &AudioFrame) -> Step {
        let sample = self.detector.detect(frame);
        self.buffers.window.push(sample);

        let Some(stats) = self.wake.matches(&self.buffers.window) else {
            return Step::Continue;
        };

        self.state = ActivationState::WakeCandidate;
        self.epoch += 1;
        tracing::info!(
            epoch = self.epoch,
            average = stats.average,
            peak = stats.peak,
            spikes = stats.spikes,
            "wake pattern detected"
        );
        self.start_recording(frame.end());
        Step::Activated { epoch: self.epoch }
    }

    fn start_recording(&mut self, now: Duration) {
        self.buffers.utterance.clear();
        self.silence_timer = None;
        self.max_timer = Some(self.arm(TimerKind::MaxDuration, now + self.max_duration));
        self.state = ActivationState::RecordingCommand;
        tracing::debug!(epoch = self.epoch, "recording command");
    }

    fn recording_frame(&mut self, frame: AudioFrame) -> Step {
        // A deadline that passed before this frame began excludes the frame
        if let Some(step) = self.fire_due(frame.timestamp()) {
            self.dropped_frames += 1;
            return step;
        }

        let sample = self.detector.detect(&frame);
        let is_voice = self.detector.is_voice(&sample);
        let start = frame.timestamp();
        let end = frame.end();

        let within_cap = self.buffers.utterance.push(frame, is_voice);

        if is_voice {
            if self.silence_timer.take().is_some() {
                tracing::trace!(epoch = self.epoch, "silence timer cancelled");
            }
        } else if self.silence_timer.is_none() {
            let timer = self.arm(TimerKind::Silence, start + self.silence_timeout);
            tracing::trace!(epoch = self.epoch, deadline = ?timer.deadline, "silence timer armed");
            self.silence_timer = Some(timer);
        }

        if !within_cap {
            let error = crate::Error::BufferOverrun {
                samples: self.buffers.utterance.sample_count(),
                cap: self.buffers.utterance.cap_samples(),
            };
            tracing::error!(epoch = self.epoch, %error, "forcing finalize");
            return self.finalize(FinalizeReason::Overrun);
        }

        self.fire_due(end).unwrap_or(Step::Continue)
    }

    /// Finalize if any armed deadline is at or before `now`
    fn fire_due(&mut self, now: Duration) -> Option<Step> {
        let timer = self.next_deadline()?;
        (timer.deadline <= now).then(|| self.on_timer(timer.token))
    }

    fn arm(&mut self, kind: TimerKind, deadline: Duration) -> ArmedTimer {
        self.timer_seq += 1;
        ArmedTimer {
            token: TimerToken {
                epoch: self.epoch,
                kind,
                seq: self.timer_seq,
            },
            deadline,
        }
    }

    fn finalize(&mut self, reason: FinalizeReason) -> Step {
        self.silence_timer = None;
        self.max_timer = None;
        self.state = ActivationState::Processing;

        let voice_frames = self.buffers.utterance.voice_frames();
        let frames = self.buffers.utterance.take();
        let segment = Segment::new(self.epoch, reason, voice_frames, frames);

        tracing::info!(
            epoch = self.epoch,
            ?reason,
            frames = segment.frames().len(),
            voice_frames,
            duration_ms = u64::try_from(segment.duration().as_millis()).unwrap_or(u64::MAX),
            "command segment finalized"
        );

        Step::Finalized(segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SegmentationConfig {
        SegmentationConfig {
            voice_threshold: 300.0,
            silence_timeout: Duration::from_millis(500),
            max_command_duration: Duration::from_millis(2000),
            wake_window: Duration::from_millis(2500),
            min_wake_samples: 10,
            min_wake_spikes: 2,
            sample_rate: 16000,
        }
    }

    fn frame(index: u64, level: i16) -> AudioFrame {
        AudioFrame::new(Duration::from_millis(index * 100), 16000, vec![level; 1600])
    }

    /// Feed frames starting at `start`, returning the index after the last one
    fn feed(machine: &mut ActivationStateMachine, start: u64, levels: &[i16]) -> (u64, Vec<Step>) {
        let mut steps = Vec::new();
        for (i, &level) in levels.iter().enumerate() {
            steps.push(machine.on_frame(frame(start + i as u64, level)));
        }
        (start + levels.len() as u64, steps)
    }

    const WAKE: [i16; 10] = [400, 900, 700, 400, 400, 800, 400, 400, 400, 400];

    fn activate(machine: &mut ActivationStateMachine) -> u64 {
        let (next, _) = feed(machine, 0, &WAKE);
        assert_eq!(machine.state(), ActivationState::RecordingCommand);
        next
    }

    #[test]
    fn test_starts_idle() {
        let machine = ActivationStateMachine::new(&config());
        assert_eq!(machine.state(), ActivationState::Idle);
        assert_eq!(machine.epoch(), 0);
        assert!(machine.next_deadline().is_none());
    }

    #[test]
    fn test_activation_arms_max_duration() {
        let mut machine = ActivationStateMachine::new(&config());
        let (_, steps) = feed(&mut machine, 0, &WAKE);

        assert!(matches!(steps.last(), Some(Step::Activated { epoch: 1 })));
        assert_eq!(machine.utterance_len(), 0);

        let timer = machine.next_deadline().unwrap();
        assert_eq!(timer.token.kind, TimerKind::MaxDuration);
        // Activated at the end of frame 9 (1000ms) plus 2000ms cap
        assert_eq!(timer.deadline, Duration::from_millis(3000));
    }

    #[test]
    fn test_silence_timer_arm_and_cancel() {
        let mut machine = ActivationStateMachine::new(&config());
        let next = activate(&mut machine);

        feed(&mut machine, next, &[0]);
        assert!(machine.silence_armed());

        feed(&mut machine, next + 1, &[800]);
        assert!(!machine.silence_armed());
        assert_eq!(machine.utterance_len(), 2);
    }

    #[test]
    fn test_cancelled_timer_token_is_ignored() {
        let mut machine = ActivationStateMachine::new(&config());
        let next = activate(&mut machine);

        feed(&mut machine, next, &[0]);
        let silence = machine.next_deadline().unwrap();
        assert_eq!(silence.token.kind, TimerKind::Silence);

        // Voice cancels, fresh silence re-arms with a new token
        feed(&mut machine, next + 1, &[800, 0]);
        assert!(matches!(machine.on_timer(silence.token), Step::Continue));
        assert_eq!(machine.state(), ActivationState::RecordingCommand);
    }

    #[test]
    fn test_timer_fired_by_loop() {
        let mut machine = ActivationStateMachine::new(&config());
        let next = activate(&mut machine);
        feed(&mut machine, next, &[800, 0]);

        let timer = machine.next_deadline().unwrap();
        let Step::Finalized(segment) = machine.on_timer(timer.token) else {
            panic!("expected finalize");
        };
        assert_eq!(segment.reason(), FinalizeReason::Silence);
        assert_eq!(segment.frames().len(), 2);
        assert_eq!(machine.state(), ActivationState::Processing);

        // Firing the same token again is a no-op
        assert!(matches!(machine.on_timer(timer.token), Step::Continue));
    }

    #[test]
    fn test_processing_drops_frames() {
        let mut machine = ActivationStateMachine::new(&config());
        let next = activate(&mut machine);
        let (next, _) = feed(&mut machine, next, &[800, 0, 0, 0, 0, 0]);
        assert_eq!(machine.state(), ActivationState::Processing);

        let (_, steps) = feed(&mut machine, next, &WAKE);
        assert!(steps.iter().all(|s| matches!(s, Step::Continue)));
        assert_eq!(machine.dropped_frames(), 10);
        assert_eq!(machine.epoch(), 1);
    }

    #[test]
    fn test_finish_processing_clears_window() {
        let mut machine = ActivationStateMachine::new(&config());
        let next = activate(&mut machine);
        feed(&mut machine, next, &[800, 0, 0, 0, 0, 0]);

        assert!(!machine.finish_processing(7));
        assert!(machine.finish_processing(1));
        assert_eq!(machine.state(), ActivationState::Idle);
        assert_eq!(machine.window_len(), 0);
    }

    #[test]
    fn test_abort_discards_and_invalidates() {
        let mut machine = ActivationStateMachine::new(&config());
        let next = activate(&mut machine);
        feed(&mut machine, next, &[800, 0]);
        let timer = machine.next_deadline().unwrap();

        machine.abort();
        assert_eq!(machine.state(), ActivationState::Idle);
        assert_eq!(machine.utterance_len(), 0);
        assert_eq!(machine.window_len(), 0);
        assert!(machine.next_deadline().is_none());
        assert!(matches!(machine.on_timer(timer.token), Step::Continue));
        assert!(!machine.finish_processing(1));
    }

    #[test]
    fn test_overrun_forces_finalize() {
        let mut cfg = config();
        cfg.max_command_duration = Duration::from_millis(200);
        cfg.silence_timeout = Duration::from_millis(100);
        // Cap is 1.5x of 200ms = 4800 samples; a single 9600 sample frame overruns
        let mut machine = ActivationStateMachine::new(&cfg);
        activate(&mut machine);

        let big = AudioFrame::new(Duration::from_millis(1000), 16000, vec![800i16; 9600]);
        let Step::Finalized(segment) = machine.on_frame(big) else {
            panic!("expected finalize");
        };
        assert_eq!(segment.reason(), FinalizeReason::Overrun);
    }

    #[test]
    fn test_flush_finalizes_recording() {
        let mut machine = ActivationStateMachine::new(&config());
        assert!(matches!(machine.flush(), Step::Continue));

        let next = activate(&mut machine);
        feed(&mut machine, next, &[800]);
        let Step::Finalized(segment) = machine.flush() else {
            panic!("expected finalize");
        };
        assert_eq!(segment.reason(), FinalizeReason::EndOfStream);
        assert_eq!(segment.frames().len(), 1);
    }
}
