//! Voice processing module
//!
//! Audio flows one way through this module:
//!
//! ```text
//! FrameSource -> FrameAssembler -> ActivationStateMachine -> Segment
//!                                   (ActivityDetector,
//!                                    SegmentBuffer, WakePattern)
//! ```
//!
//! Finalized segments go to a [`TranscriptionGateway`]; responses come back
//! out through a [`ResponseSink`].

mod activation;
mod activity;
mod capture;
mod frame;
mod playback;
mod segment;
mod sink;
mod source;
mod stt;
mod tts;
mod wake_word;
mod wav;

pub use activation::{
    ActivationState, ActivationStateMachine, ArmedTimer, Step, TimerKind, TimerToken,
};
pub use activity::{ActivityDetector, EnergySample, calculate_rms};
pub use capture::{CpalSource, InputConverter};
pub use frame::{AudioFrame, FrameAssembler, samples_duration};
pub use playback::{AudioPlayback, DecodedAudio, decode_mp3};
pub use segment::{
    FinalizeReason, RollingWindow, Segment, SegmentBuffer, UtteranceBuffer, WindowStats,
};
pub use sink::{LogSink, ResponseSink, SpeakerSink, sink_from_config};
pub use source::{
    EVENT_QUEUE_CAPACITY, EventReceiver, EventSender, FrameSource, SourceEvent, WavFileSource,
    event_queue,
};
pub use stt::{CommandTranscriber, SpeechToText, TranscriptionGateway, gateway_from_config};
pub use tts::TextToSpeech;
pub use wake_word::WakePattern;
pub use wav::{SegmentFile, read_wav_mono, samples_to_wav};
