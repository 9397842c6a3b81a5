//! Speech-to-text (STT) processing
//!
//! Every backend implements [`TranscriptionGateway`]: a finalized segment in,
//! recognized text out.

use std::process::Stdio;

use async_trait::async_trait;

use super::segment::Segment;
use super::wav::{SegmentFile, samples_to_wav};
use crate::config::{Config, SttProvider};
use crate::{Error, Result};

/// Turns a recorded command into text
#[async_trait]
pub trait TranscriptionGateway: Send + Sync {
    /// Gateway name for logging
    fn name(&self) -> &'static str;

    /// Transcribe a finalized segment
    ///
    /// # Errors
    ///
    /// Returns error if recognition fails or yields no text
    async fn transcribe(&self, segment: &Segment) -> Result<String>;
}

/// Build the gateway selected in the configuration
///
/// # Errors
///
/// Returns `Error::Config` if a required credential or command is missing
pub fn gateway_from_config(config: &Config) -> Result<Box<dyn TranscriptionGateway>> {
    let stt = &config.stt;
    match stt.provider {
        SttProvider::Whisper => Ok(Box::new(SpeechToText::new_whisper(
            config.api_keys.openai.clone().unwrap_or_default(),
            stt.model.clone(),
        )?)),
        SttProvider::Deepgram => Ok(Box::new(SpeechToText::new_deepgram(
            config.api_keys.deepgram.clone().unwrap_or_default(),
            stt.model.clone(),
        )?)),
        SttProvider::Command => Ok(Box::new(CommandTranscriber::new(stt.command.clone())?)),
    }
}

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Hosted STT backend
#[derive(Clone, Copy, Debug)]
enum HostedProvider {
    Whisper,
    Deepgram,
}

/// Transcribes speech through a hosted API
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: String,
    model: String,
    provider: HostedProvider,
}

impl SpeechToText {
    /// Create a new STT instance using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider: HostedProvider::Whisper,
        })
    }

    /// Create a new STT instance using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("Deepgram API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider: HostedProvider::Deepgram,
        })
    }

    /// Transcribe using OpenAI Whisper
    async fn transcribe_whisper(&self, audio: Vec<u8>) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let body = response.text().await?;
        parse_whisper(&body).inspect_err(|e| {
            tracing::error!(error = %e, body = %body, "failed to parse Whisper response");
        })
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, audio: Vec<u8>) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let url = format!(
            "https://api.deepgram.com/v1/listen?model={}&punctuate=true",
            self.model
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(audio)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let body = response.text().await?;
        parse_deepgram(&body).inspect_err(|e| {
            tracing::error!(error = %e, body = %body, "failed to parse Deepgram response");
        })
    }
}

/// Text of a Whisper transcription response body
fn parse_whisper(body: &str) -> Result<String> {
    let result: WhisperResponse = serde_json::from_str(body)?;
    Ok(result.text)
}

/// First alternative of the first channel of a Deepgram response body
///
/// A response without alternatives is an empty transcript.
fn parse_deepgram(body: &str) -> Result<String> {
    let result: DeepgramResponse = serde_json::from_str(body)?;
    Ok(result
        .results
        .channels
        .into_iter()
        .next()
        .and_then(|c| c.alternatives.into_iter().next())
        .map(|a| a.transcript)
        .unwrap_or_default())
}

#[async_trait]
impl TranscriptionGateway for SpeechToText {
    fn name(&self) -> &'static str {
        match self.provider {
            HostedProvider::Whisper => "whisper",
            HostedProvider::Deepgram => "deepgram",
        }
    }

    async fn transcribe(&self, segment: &Segment) -> Result<String> {
        let audio = samples_to_wav(&segment.samples(), segment.sample_rate())?;
        let text = match self.provider {
            HostedProvider::Whisper => self.transcribe_whisper(audio).await?,
            HostedProvider::Deepgram => self.transcribe_deepgram(audio).await?,
        };
        non_empty(text)
    }
}

/// Runs a local transcriber program on a transient WAV file
///
/// The program gets the file path in place of a `{file}` argument, or as a
/// trailing argument when no placeholder is present. Trimmed stdout is the
/// transcript.
pub struct CommandTranscriber {
    program: String,
    args: Vec<String>,
}

impl CommandTranscriber {
    /// Placeholder replaced by the segment file path
    pub const FILE_PLACEHOLDER: &'static str = "{file}";

    /// Create a transcriber from a program and its arguments
    ///
    /// # Errors
    ///
    /// Returns error if no program is given
    pub fn new(command: Vec<String>) -> Result<Self> {
        let mut parts = command.into_iter();
        let program = parts
            .next()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| Error::Config("stt.command required for command provider".to_string()))?;

        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    fn args_for(&self, path: &str) -> Vec<String> {
        let mut substituted = false;
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                if arg.contains(Self::FILE_PLACEHOLDER) {
                    substituted = true;
                    arg.replace(Self::FILE_PLACEHOLDER, path)
                } else {
                    arg.clone()
                }
            })
            .collect();

        if !substituted {
            args.push(path.to_string());
        }
        args
    }
}

#[async_trait]
impl TranscriptionGateway for CommandTranscriber {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn transcribe(&self, segment: &Segment) -> Result<String> {
        // Deleted when `file` drops at the end of this call
        let file = SegmentFile::write(segment)?;
        let path = file.path().display().to_string();

        tracing::debug!(program = %self.program, path = %path, "running transcriber");

        let output = tokio::process::Command::new(&self.program)
            .args(self.args_for(&path))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Stt(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Stt(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        non_empty(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Reject blank transcripts
fn non_empty(text: String) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Err(Error::Transcription("empty transcript".to_string()))
    } else {
        tracing::info!(transcript = %trimmed, "transcription complete");
        Ok(trimmed.to_string())
    }
}
