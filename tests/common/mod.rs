//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use navi_voice::config::SegmentationConfig;
use navi_voice::voice::{
    AudioFrame, EventSender, FinalizeReason, FrameSource, ResponseSink, Segment, SourceEvent,
    TranscriptionGateway,
};
use navi_voice::{Config, Error, Result};
use tokio::task::JoinHandle;

/// Samples per 100ms frame at 16kHz
pub const FRAME_SAMPLES: usize = 1600;

/// Energy levels of a wake phrase: average 600, peak 900, three samples above 600
///
/// After a run of silence the default 2000ms window holds 21 samples of 100ms
/// frames. The first eleven levels then average exactly the threshold, so
/// only the last frame completes the pattern.
pub const WAKE_LEVELS: [i16; 12] = [550, 550, 550, 550, 550, 550, 550, 550, 550, 700, 650, 900];

/// Default segmentation with a 500ms silence timeout
#[must_use]
pub fn segmentation() -> SegmentationConfig {
    SegmentationConfig {
        silence_timeout: Duration::from_millis(500),
        ..SegmentationConfig::default()
    }
}

/// Full configuration for pipeline tests
#[must_use]
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.segmentation = segmentation();
    config.recovery.restart_backoff = Duration::from_millis(10);
    config.stt.timeout = Duration::from_secs(2);
    config.tts.enabled = false;
    config
}

/// A 100ms frame of constant amplitude, whose RMS energy equals `level`
#[must_use]
pub fn frame(index: u64, level: i16) -> AudioFrame {
    AudioFrame::new(
        Duration::from_millis(index * 100),
        16000,
        vec![level; FRAME_SAMPLES],
    )
}

/// Frames for `levels`, numbered from `start`
#[must_use]
pub fn frames(start: u64, levels: &[i16]) -> Vec<AudioFrame> {
    levels
        .iter()
        .zip(start..)
        .map(|(&level, index)| frame(index, level))
        .collect()
}

/// Raw samples for `levels`, one frame per level
#[must_use]
pub fn samples(levels: &[i16]) -> Vec<i16> {
    levels
        .iter()
        .flat_map(|&level| std::iter::repeat_n(level, FRAME_SAMPLES))
        .collect()
}

/// The round trip: 50 silent frames, the wake phrase, 3 voice frames, 600ms silence
#[must_use]
pub fn round_trip_levels() -> Vec<i16> {
    let mut levels = vec![0i16; 50];
    levels.extend_from_slice(&WAKE_LEVELS);
    levels.extend_from_slice(&[800, 800, 800]);
    levels.extend_from_slice(&[0; 6]);
    levels
}

/// Split samples into device-sized chunks that do not line up with frames
#[must_use]
pub fn chunk_events(samples: &[i16], chunk: usize) -> Vec<SourceEvent> {
    samples
        .chunks(chunk)
        .map(|c| SourceEvent::Chunk(c.to_vec()))
        .collect()
}

/// What the scripted source does on one `start` call
#[derive(Debug, Clone)]
pub enum StartScript {
    /// Start succeeds and the events are delivered in order
    Deliver(Vec<SourceEvent>),
    /// Start succeeds and the events trickle in like a live device
    ///
    /// Nothing arrives for `lead_in`, then one event per `interval`.
    Paced {
        lead_in: Duration,
        interval: Duration,
        events: Vec<SourceEvent>,
    },
    /// Start fails
    Fail(String),
}

/// Frame source that plays back scripted events, one script per start
pub struct ScriptedSource {
    scripts: VecDeque<StartScript>,
    starts: Arc<AtomicUsize>,
    task: Option<JoinHandle<()>>,
}

impl ScriptedSource {
    #[must_use]
    pub fn new(scripts: Vec<StartScript>) -> Self {
        Self {
            scripts: scripts.into(),
            starts: Arc::new(AtomicUsize::new(0)),
            task: None,
        }
    }

    /// Source that delivers `events` once
    #[must_use]
    pub fn once(events: Vec<SourceEvent>) -> Self {
        Self::new(vec![StartScript::Deliver(events)])
    }

    /// Shared count of `start` calls
    #[must_use]
    pub fn starts(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.starts)
    }
}

impl FrameSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn start(&mut self, events: EventSender) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        match self.scripts.pop_front() {
            Some(StartScript::Deliver(script)) => {
                self.task = Some(tokio::spawn(async move {
                    for event in script {
                        if events.send(event).await.is_err() {
                            return;
                        }
                    }
                    // Stay open like a live device
                    std::future::pending::<()>().await;
                }));
                Ok(())
            }
            Some(StartScript::Paced {
                lead_in,
                interval,
                events: script,
            }) => {
                self.task = Some(tokio::spawn(async move {
                    tokio::time::sleep(lead_in).await;
                    for event in script {
                        if events.send(event).await.is_err() {
                            return;
                        }
                        tokio::time::sleep(interval).await;
                    }
                    std::future::pending::<()>().await;
                }));
                Ok(())
            }
            Some(StartScript::Fail(reason)) => Err(Error::Audio(reason)),
            None => Err(Error::Audio("no more scripts".to_string())),
        }
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

/// Summary of a segment seen by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenSegment {
    pub epoch: u64,
    pub reason: FinalizeReason,
    pub frames: usize,
    pub voice_frames: usize,
}

impl From<&Segment> for SeenSegment {
    fn from(segment: &Segment) -> Self {
        Self {
            epoch: segment.epoch(),
            reason: segment.reason(),
            frames: segment.frames().len(),
            voice_frames: segment.voice_frames(),
        }
    }
}

/// Gateway returning scripted replies and recording what it was given
#[derive(Default)]
pub struct ScriptedGateway {
    replies: Mutex<VecDeque<Result<String>>>,
    seen: Mutex<Vec<SeenSegment>>,
    delay: Duration,
}

impl ScriptedGateway {
    #[must_use]
    pub fn new(replies: Vec<Result<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Gateway that always answers `text`
    #[must_use]
    pub fn answering(text: &str) -> Self {
        Self::new(vec![Ok(text.to_string())])
    }

    /// Wait this long before answering
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn seen(&self) -> Vec<SeenSegment> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranscriptionGateway for ScriptedGateway {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn transcribe(&self, segment: &Segment) -> Result<String> {
        self.seen.lock().unwrap().push(SeenSegment::from(segment));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Transcription("no scripted reply".to_string())))
    }
}

/// Sink that records every response
#[derive(Default)]
pub struct RecordingSink {
    rendered: Mutex<Vec<String>>,
}

impl RecordingSink {
    #[must_use]
    pub fn rendered(&self) -> Vec<String> {
        self.rendered.lock().unwrap().clone()
    }
}

impl ResponseSink for RecordingSink {
    fn render(&self, text: &str) {
        self.rendered.lock().unwrap().push(text.to_string());
    }
}
