//! Response rendering
//!
//! A sink is the last hop of the pipeline. Rendering never blocks the event
//! loop: the speaker owns its device on a worker thread and `render` only
//! enqueues.

use std::sync::mpsc;
use std::thread::JoinHandle;

use super::playback::AudioPlayback;
use super::tts::TextToSpeech;
use crate::config::{Config, TtsConfig};
use crate::{Error, Result};

/// Delivers a response to the user
pub trait ResponseSink: Send + Sync {
    /// Render `text`, returning as soon as it has been accepted
    fn render(&self, text: &str);
}

/// Writes responses to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ResponseSink for LogSink {
    fn render(&self, text: &str) {
        tracing::info!(response = %text, "response");
    }
}

enum SpeakerJob {
    Speak(String),
    Shutdown,
}

/// Speaks responses through the default output device
pub struct SpeakerSink {
    jobs: mpsc::Sender<SpeakerJob>,
    worker: Option<JoinHandle<()>>,
}

impl SpeakerSink {
    /// Spawn the speaker worker
    ///
    /// The blocking HTTP client is built on the worker so it never lives
    /// inside the async runtime.
    ///
    /// # Errors
    ///
    /// Returns error if TTS is not configured or the thread cannot be spawned
    pub fn new(config: &TtsConfig, api_key: Option<String>) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Config("OpenAI API key required for TTS".to_string()))?;
        let config = config.clone();
        let (jobs, rx) = mpsc::channel();

        let worker = std::thread::Builder::new()
            .name("navi-speaker".to_string())
            .spawn(move || match TextToSpeech::from_config(&config, Some(api_key)) {
                Ok(tts) => speaker_worker(&tts, &rx),
                Err(e) => tracing::error!(error = %e, "speaker worker failed to start"),
            })?;

        Ok(Self {
            jobs,
            worker: Some(worker),
        })
    }
}

impl ResponseSink for SpeakerSink {
    fn render(&self, text: &str) {
        if self.jobs.send(SpeakerJob::Speak(text.to_string())).is_err() {
            tracing::warn!(response = %text, "speaker worker gone, response dropped");
        }
    }
}

impl Drop for SpeakerSink {
    fn drop(&mut self) {
        let _ = self.jobs.send(SpeakerJob::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn speaker_worker(tts: &TextToSpeech, jobs: &mpsc::Receiver<SpeakerJob>) {
    // The device is opened lazily so a headless start still logs responses
    let mut playback: Option<AudioPlayback> = None;

    while let Ok(SpeakerJob::Speak(text)) = jobs.recv() {
        tracing::info!(response = %text, "speaking");

        if playback.is_none() {
            match AudioPlayback::new() {
                Ok(p) => playback = Some(p),
                Err(e) => {
                    tracing::error!(error = %e, "failed to open output device");
                    continue;
                }
            }
        }

        let result = tts
            .synthesize(&text)
            .and_then(|mp3| match &playback {
                Some(p) => p.play_mp3(&mp3),
                None => Err(Error::Audio("no output device".to_string())),
            });

        if let Err(e) = result {
            tracing::error!(error = %e, "failed to speak response");
        }
    }

    tracing::debug!("speaker worker stopped");
}

/// Build the sink selected by the configuration
///
/// Speech needs TTS enabled and an `OpenAI` key; without them responses are
/// logged.
///
/// # Errors
///
/// Returns error if the speaker worker cannot be started
pub fn sink_from_config(config: &Config, speak: bool) -> Result<Box<dyn ResponseSink>> {
    if !(speak && config.tts.enabled) {
        return Ok(Box::new(LogSink));
    }

    match SpeakerSink::new(&config.tts, config.api_keys.openai.clone()) {
        Ok(sink) => Ok(Box::new(sink)),
        Err(e @ Error::Config(_)) => {
            tracing::warn!(error = %e, "speech disabled, logging responses");
            Ok(Box::new(LogSink))
        }
        Err(e) => Err(e),
    }
}
