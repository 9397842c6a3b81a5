//! Navi - always-on voice command front end
//!
//! This library provides the pieces of the Navi listener:
//! - Frame sources (microphone via cpal, WAV replay)
//! - Energy-based voice activity and wake-pattern detection
//! - The activation state machine that segments command utterances
//! - Transcription gateways, the command router and response sinks
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   FrameSource                        │
//! │        CpalSource  │  WavFileSource                  │
//! └────────────────────┬────────────────────────────────┘
//!                      │ bounded queue
//! ┌────────────────────▼────────────────────────────────┐
//! │                     Daemon                           │
//! │   FrameAssembler → ActivationStateMachine → Segment  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Collaborators                        │
//! │  TranscriptionGateway → CommandRouter → ResponseSink │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod commands;
pub mod config;
pub mod daemon;
pub mod error;
pub mod recovery;
pub mod voice;

pub use commands::{CommandRouter, DIDNT_UNDERSTAND, Intent, IntentRouter};
pub use config::Config;
pub use daemon::{Daemon, Outcome, RunSummary};
pub use error::{Error, Result};
pub use recovery::RestartPolicy;
