//! Frame sources
//!
//! A source pushes raw PCM chunks and faults into a bounded queue owned by
//! the event loop. It never touches segmentation state itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::frame::samples_duration;
use super::wav::read_wav_mono;
use crate::Result;

/// Capacity of the capture queue in chunks
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Something a frame source reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// Mono 16-bit samples at the source's sample rate
    Chunk(Vec<i16>),
    /// The device failed; the source must be restarted
    Fault(String),
    /// A finite source has delivered everything
    Finished,
}

/// Sending half of the capture queue
pub type EventSender = mpsc::Sender<SourceEvent>;

/// Receiving half of the capture queue
pub type EventReceiver = mpsc::Receiver<SourceEvent>;

/// Create the bounded capture queue
#[must_use]
pub fn event_queue() -> (EventSender, EventReceiver) {
    mpsc::channel(EVENT_QUEUE_CAPACITY)
}

/// A producer of PCM chunks
///
/// Implementations may hold handles that are not `Send` (audio streams), so
/// sources are driven from the event loop's own task.
pub trait FrameSource {
    /// Source name for logging
    fn name(&self) -> &'static str;

    /// Start producing into `events`
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    fn start(&mut self, events: EventSender) -> Result<()>;

    /// Stop producing; safe to call when already stopped
    fn stop(&mut self);

    /// Whether the source is currently producing
    fn is_running(&self) -> bool;

    /// Silence on the queue after which a running source is presumed dead
    fn stall_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Replays a WAV file through the pipeline
pub struct WavFileSource {
    path: PathBuf,
    sample_rate: u32,
    chunk_samples: usize,
    realtime: bool,
    task: Option<JoinHandle<()>>,
}

impl WavFileSource {
    /// Create a source for `path`; the file must be recorded at `sample_rate`
    #[must_use]
    pub fn new(path: impl AsRef<Path>, sample_rate: u32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            sample_rate,
            chunk_samples: 1024,
            realtime: false,
            task: None,
        }
    }

    /// Pace chunks at the rate they would arrive from a microphone
    #[must_use]
    pub const fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }
}

impl FrameSource for WavFileSource {
    fn name(&self) -> &'static str {
        "wav-file"
    }

    fn start(&mut self, events: EventSender) -> Result<()> {
        if self.task.is_some() {
            return Ok(());
        }

        let samples = read_wav_mono(&self.path, self.sample_rate)?;
        tracing::debug!(
            path = %self.path.display(),
            samples = samples.len(),
            realtime = self.realtime,
            "replaying wav file"
        );

        let chunk_samples = self.chunk_samples;
        let pace = self
            .realtime
            .then(|| samples_duration(chunk_samples, self.sample_rate));

        self.task = Some(tokio::spawn(async move {
            for chunk in samples.chunks(chunk_samples) {
                if events.send(SourceEvent::Chunk(chunk.to_vec())).await.is_err() {
                    return;
                }
                if let Some(pace) = pace {
                    tokio::time::sleep(pace).await;
                }
            }
            let _ = events.send(SourceEvent::Finished).await;
        }));

        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for WavFileSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::samples_to_wav;

    #[tokio::test]
    async fn test_wav_source_replays_then_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        let samples: Vec<i16> = (0..3000).map(|i| (i % 100) as i16).collect();
        std::fs::write(&path, samples_to_wav(&samples, 16000).unwrap()).unwrap();

        let (tx, mut rx) = event_queue();
        let mut source = WavFileSource::new(&path, 16000);
        source.start(tx).unwrap();

        let mut received = Vec::new();
        loop {
            match rx.recv().await.unwrap() {
                SourceEvent::Chunk(chunk) => received.extend(chunk),
                SourceEvent::Finished => break,
                SourceEvent::Fault(e) => panic!("unexpected fault: {e}"),
            }
        }
        assert_eq!(received, samples);
    }

    #[tokio::test]
    async fn test_wav_source_rejects_wrong_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        std::fs::write(&path, samples_to_wav(&[0; 100], 8000).unwrap()).unwrap();

        let (tx, _rx) = event_queue();
        let mut source = WavFileSource::new(&path, 16000);
        assert!(source.start(tx).is_err());
        assert!(!source.is_running());
    }
}
