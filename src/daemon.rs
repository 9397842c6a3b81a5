//! Daemon - the voice command service
//!
//! Owns the frame source, the activation state machine and the collaborators,
//! and drives them from a single event loop. Frames, timers, processing
//! completions and restarts are all handled on this loop, so every state
//! transition is atomic with respect to the others.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::Instant;

use crate::commands::{CommandRouter, DIDNT_UNDERSTAND, IntentRouter};
use crate::recovery::RestartPolicy;
use crate::voice::{
    ActivationStateMachine, ArmedTimer, EventReceiver, FrameAssembler, FrameSource,
    ResponseSink, Segment, SourceEvent, Step, TranscriptionGateway, event_queue,
    gateway_from_config, sink_from_config,
};
use crate::{Config, Result};

/// What happened to one finalized segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Activation epoch of the segment
    pub epoch: u64,
    /// Recognized text, `None` if transcription failed
    pub transcript: Option<String>,
    /// Response handed to the sink
    pub response: String,
}

/// Counters reported when the loop exits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Wake patterns accepted
    pub activations: u64,
    /// Segments that reached the gateway
    pub segments: u64,
    /// Segments whose transcription failed or timed out
    pub transcription_failures: u64,
    /// Successful source restarts after a fault
    pub restarts: u32,
    /// Frames dropped while a segment was processing
    pub dropped_frames: u64,
}

/// The Navi daemon - listens, segments, transcribes and responds
pub struct Daemon {
    config: Config,
    source: Box<dyn FrameSource>,
    gateway: Arc<dyn TranscriptionGateway>,
    router: Arc<dyn CommandRouter>,
    sink: Arc<dyn ResponseSink>,
}

impl Daemon {
    /// Create a daemon from explicit collaborators
    #[must_use]
    pub fn new(
        config: Config,
        source: Box<dyn FrameSource>,
        gateway: Arc<dyn TranscriptionGateway>,
        router: Arc<dyn CommandRouter>,
        sink: Arc<dyn ResponseSink>,
    ) -> Self {
        Self {
            config,
            source,
            gateway,
            router,
            sink,
        }
    }

    /// Create a daemon with the collaborators selected by `config`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a required credential is missing
    pub fn from_config(config: Config, source: Box<dyn FrameSource>, speak: bool) -> Result<Self> {
        config.validate()?;
        let gateway: Arc<dyn TranscriptionGateway> = Arc::from(gateway_from_config(&config)?);
        let router = Arc::new(IntentRouter::default());
        let sink: Arc<dyn ResponseSink> = Arc::from(sink_from_config(&config, speak)?);

        tracing::debug!(
            source = source.name(),
            gateway = gateway.name(),
            "daemon configured"
        );

        Ok(Self::new(config, source, gateway, router, sink))
    }

    /// Run until `shutdown` resolves or a finite source finishes
    ///
    /// # Errors
    ///
    /// Returns `Error::DeviceFault` if the source repeatedly fails to restart
    #[allow(clippy::future_not_send, clippy::too_many_lines)]
    pub async fn run<F>(mut self, shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        let mut session = Session::new(&self.config);
        let mut policy = RestartPolicy::new(&self.config.recovery);
        let (events, mut rx) = event_queue();

        let stall_timeout = self.source.stall_timeout();
        let mut last_activity = Instant::now();
        let mut restart_at: Option<Instant> = None;

        if let Err(e) = self.source.start(events.clone()) {
            policy.record_failure(&e)?;
            restart_at = Some(Instant::now() + policy.next_delay());
        }

        tracing::info!(
            source = self.source.name(),
            threshold = self.config.segmentation.voice_threshold,
            "listening for wake pattern"
        );

        tokio::pin!(shutdown);

        loop {
            let next_timer = session.machine.next_deadline();
            let timer_at = next_timer.map(|t| session.anchor.instant_for(t.deadline));
            let stall_at = stall_timeout
                .filter(|_| restart_at.is_none() && self.source.is_running())
                .map(|t| last_activity + t);

            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }

                event = rx.recv() => {
                    match event {
                        Some(SourceEvent::Chunk(chunk)) => {
                            last_activity = Instant::now();
                            policy.record_success();
                            session.ingest(&chunk, &self);
                        }
                        Some(SourceEvent::Fault(reason)) if restart_at.is_none() => {
                            restart_at = Some(self.fault(&reason, &mut session, &mut rx, &policy));
                        }
                        Some(SourceEvent::Fault(reason)) => {
                            tracing::debug!(reason, "fault while restart pending");
                        }
                        Some(SourceEvent::Finished) | None => {
                            tracing::info!("source finished");
                            session.drain(&self).await;
                            self.source.stop();
                            return Ok(session.summary());
                        }
                    }
                }

                () = sleep_until(timer_at), if timer_at.is_some() => {
                    if let Some(ArmedTimer { token, .. }) = next_timer {
                        let step = session.machine.on_timer(token);
                        session.apply(step, &self);
                    }
                }

                outcome = poll_processing(&mut session.processing), if session.processing.is_some() => {
                    session.processing = None;
                    session.complete(&outcome);
                }

                () = sleep_until(restart_at), if restart_at.is_some() => {
                    restart_at = None;
                    match self.source.start(events.clone()) {
                        Ok(()) => {
                            session.restarts += 1;
                            session.resync();
                            last_activity = Instant::now();
                            tracing::info!(source = self.source.name(), "capture restarted");
                        }
                        Err(e) => {
                            policy.record_failure(&e)?;
                            restart_at = Some(Instant::now() + policy.next_delay());
                        }
                    }
                }

                () = sleep_until(stall_at), if stall_at.is_some() => {
                    let reason = format!(
                        "no audio from {} for {}ms",
                        self.source.name(),
                        stall_timeout.map_or(0, |t| t.as_millis())
                    );
                    restart_at = Some(self.fault(&reason, &mut session, &mut rx, &policy));
                }
            }
        }

        self.source.stop();
        Ok(session.summary())
    }

    /// Abandon the current activation and schedule a restart
    fn fault(
        &mut self,
        reason: &str,
        session: &mut Session,
        rx: &mut EventReceiver,
        policy: &RestartPolicy,
    ) -> Instant {
        tracing::warn!(source = self.source.name(), reason, "capture fault");

        session.machine.abort();
        if session.processing.take().is_some() {
            tracing::debug!("in-flight processing dropped");
        }
        self.source.stop();

        // Chunks queued before the fault belong to the dead stream
        while rx.try_recv().is_ok() {}

        let delay = policy.next_delay();
        tracing::info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "capture restart scheduled"
        );
        Instant::now() + delay
    }

    /// Transcribe, route and render one segment
    fn process(&self, segment: Segment) -> BoxFuture<'static, Outcome> {
        let gateway = Arc::clone(&self.gateway);
        let router = Arc::clone(&self.router);
        let sink = Arc::clone(&self.sink);
        let timeout = self.config.stt.timeout;

        Box::pin(async move {
            let epoch = segment.epoch();
            tracing::debug!(
                epoch,
                gateway = gateway.name(),
                samples = segment.frames().iter().map(|f| f.len()).sum::<usize>(),
                "transcribing command"
            );

            let transcript = match tokio::time::timeout(timeout, gateway.transcribe(&segment)).await
            {
                Ok(Ok(text)) => Some(text),
                Ok(Err(e)) => {
                    tracing::warn!(epoch, error = %e, "transcription failed");
                    None
                }
                Err(_) => {
                    tracing::warn!(
                        epoch,
                        timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        "transcription timed out"
                    );
                    None
                }
            };

            let response = match &transcript {
                Some(text) => {
                    tracing::info!(epoch, command = %text, "command received");
                    router.route(text)
                }
                None => DIDNT_UNDERSTAND.to_string(),
            };

            sink.render(&response);

            Outcome {
                epoch,
                transcript,
                response,
            }
        })
    }
}

/// Loop-owned segmentation state
struct Session {
    machine: ActivationStateMachine,
    assembler: FrameAssembler,
    processing: Option<BoxFuture<'static, Outcome>>,
    anchor: ClockAnchor,
    activations: u64,
    segments: u64,
    transcription_failures: u64,
    restarts: u32,
}

impl Session {
    fn new(config: &Config) -> Self {
        Self {
            machine: ActivationStateMachine::new(&config.segmentation),
            assembler: FrameAssembler::new(
                config.audio.sample_rate,
                config.audio.frame_samples(),
                Duration::ZERO,
            ),
            processing: None,
            anchor: ClockAnchor::new(Duration::ZERO),
            activations: 0,
            segments: 0,
            transcription_failures: 0,
            restarts: 0,
        }
    }

    /// Regroup a chunk into frames and feed them to the machine
    fn ingest(&mut self, chunk: &[i16], daemon: &Daemon) {
        let frames = self.assembler.push(chunk);
        if let Some(last) = frames.last() {
            self.anchor = ClockAnchor::new(last.end());
        }

        for frame in frames {
            let step = self.machine.on_frame(frame);
            self.apply(step, daemon);
        }
    }

    fn apply(&mut self, step: Step, daemon: &Daemon) {
        match step {
            Step::Continue => {}
            Step::Activated { epoch } => {
                self.activations += 1;
                tracing::debug!(epoch, "activation");
            }
            Step::Finalized(segment) => {
                self.segments += 1;
                self.processing = Some(daemon.process(segment));
            }
        }
    }

    fn complete(&mut self, outcome: &Outcome) {
        if outcome.transcript.is_none() {
            self.transcription_failures += 1;
        }
        tracing::debug!(epoch = outcome.epoch, response = %outcome.response, "segment handled");
        self.machine.finish_processing(outcome.epoch);
    }

    /// Finish everything in flight after the source ended
    #[allow(clippy::future_not_send)]
    async fn drain(&mut self, daemon: &Daemon) {
        if let Some(frame) = self.assembler.flush() {
            self.anchor = ClockAnchor::new(frame.end());
            let step = self.machine.on_frame(frame);
            self.apply(step, daemon);
        }

        // Any in-flight segment must finish before a new one can be flushed
        if let Some(processing) = self.processing.take() {
            let outcome = processing.await;
            self.complete(&outcome);
        }

        let step = self.machine.flush();
        self.apply(step, daemon);

        if let Some(processing) = self.processing.take() {
            let outcome = processing.await;
            self.complete(&outcome);
        }
    }

    /// Continue stream time after a restart
    ///
    /// Stream time never moves backwards, even if a finite source ran ahead
    /// of the wall clock.
    fn resync(&mut self) {
        let now = self.anchor.stream_now().max(self.assembler.position());
        self.assembler.reset(now);
    }

    fn summary(&self) -> RunSummary {
        RunSummary {
            activations: self.activations,
            segments: self.segments,
            transcription_failures: self.transcription_failures,
            restarts: self.restarts,
            dropped_frames: self.machine.dropped_frames(),
        }
    }
}

/// Maps stream time onto the tokio clock
///
/// Pinned to the arrival of the newest frame rather than to the moment the
/// source was started. Device latency, callback buffering, dropped chunks and
/// sample-clock drift all shift when audio arrives, so a deadline is only
/// due on the tokio clock once the audio before it has had time to arrive.
#[derive(Debug, Clone, Copy)]
struct ClockAnchor {
    /// When the frame ending at `stream` was ingested
    arrival: Instant,
    stream: Duration,
}

impl ClockAnchor {
    fn new(stream: Duration) -> Self {
        Self {
            arrival: Instant::now(),
            stream,
        }
    }

    /// Tokio instant at which stream time `at` is due
    ///
    /// Deadlines at or before the anchor are due immediately.
    fn instant_for(&self, at: Duration) -> Instant {
        self.arrival + at.saturating_sub(self.stream)
    }

    /// Stream time now, extrapolated from the newest frame
    fn stream_now(&self) -> Duration {
        self.stream + self.arrival.elapsed()
    }
}

/// Sleep until `at`, or forever when there is nothing to wait for
async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn poll_processing(processing: &mut Option<BoxFuture<'static, Outcome>>) -> Outcome {
    match processing.as_mut() {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}
