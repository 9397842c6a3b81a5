//! End-to-end tests of the daemon event loop with scripted collaborators

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use navi_voice::voice::{FinalizeReason, SourceEvent, WavFileSource, samples_to_wav};
use navi_voice::{Config, DIDNT_UNDERSTAND, Daemon, Error, IntentRouter};

mod common;
use common::{
    RecordingSink, ScriptedGateway, ScriptedSource, SeenSegment, StartScript, chunk_events,
    round_trip_levels, samples, test_config,
};

/// Round trip audio followed by end of stream
fn round_trip_events() -> Vec<SourceEvent> {
    let mut events = chunk_events(&samples(&round_trip_levels()), 1024);
    events.push(SourceEvent::Finished);
    events
}

fn daemon(
    config: Config,
    source: ScriptedSource,
    gateway: &Arc<ScriptedGateway>,
    sink: &Arc<RecordingSink>,
) -> Daemon {
    Daemon::new(
        config,
        Box::new(source),
        Arc::clone(gateway) as _,
        Arc::new(IntentRouter::default()),
        Arc::clone(sink) as _,
    )
}

/// A shutdown future that never fires
async fn never() {
    std::future::pending::<()>().await;
}

#[tokio::test]
async fn test_round_trip_through_daemon() {
    let gateway = Arc::new(ScriptedGateway::answering("hey navi this is a test"));
    let sink = Arc::new(RecordingSink::default());
    let source = ScriptedSource::once(round_trip_events());

    let summary = daemon(test_config(), source, &gateway, &sink)
        .run(never())
        .await
        .unwrap();

    assert_eq!(summary.activations, 1);
    assert_eq!(summary.segments, 1);
    assert_eq!(summary.transcription_failures, 0);
    assert_eq!(
        gateway.seen(),
        vec![SeenSegment {
            epoch: 1,
            reason: FinalizeReason::Silence,
            frames: 8,
            voice_frames: 3,
        }]
    );
    assert_eq!(sink.rendered(), vec!["Test successful."]);
}

#[tokio::test(start_paused = true)]
async fn test_late_device_keeps_full_silence_timeout() {
    let gateway = Arc::new(ScriptedGateway::answering("testing"));
    let sink = Arc::new(RecordingSink::default());

    // A pause shorter than the silence timeout sits between two bursts
    let mut levels = vec![0i16; 50];
    levels.extend_from_slice(&common::WAKE_LEVELS);
    levels.extend_from_slice(&[800, 800, 800, 0, 0, 0, 800, 800, 800]);
    levels.extend_from_slice(&[0; 6]);
    let mut events = chunk_events(&samples(&levels), 1600);
    events.push(SourceEvent::Finished);

    // The device opens a second late, then delivers a frame every 95ms
    let source = ScriptedSource::new(vec![StartScript::Paced {
        lead_in: Duration::from_secs(1),
        interval: Duration::from_millis(95),
        events,
    }]);

    let summary = daemon(test_config(), source, &gateway, &sink)
        .run(never())
        .await
        .unwrap();

    assert_eq!(summary.segments, 1);
    assert_eq!(
        gateway.seen(),
        vec![SeenSegment {
            epoch: 1,
            reason: FinalizeReason::Silence,
            frames: 14,
            voice_frames: 6,
        }]
    );
    assert_eq!(sink.rendered(), vec!["Test successful."]);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_device_still_finalizes() {
    let gateway = Arc::new(ScriptedGateway::answering("what time is it"));
    let sink = Arc::new(RecordingSink::default());

    // Wake phrase, one voice frame, one silent frame, then nothing at all
    let mut levels = vec![0i16; 50];
    levels.extend_from_slice(&common::WAKE_LEVELS);
    levels.extend_from_slice(&[800, 0]);

    let source = ScriptedSource::new(vec![StartScript::Paced {
        lead_in: Duration::from_millis(300),
        interval: Duration::from_millis(100),
        events: chunk_events(&samples(&levels), 1600),
    }]);

    let summary = daemon(test_config(), source, &gateway, &sink)
        .run(tokio::time::sleep(Duration::from_secs(30)))
        .await
        .unwrap();

    assert_eq!(summary.segments, 1);
    let seen = gateway.seen();
    assert_eq!(seen[0].reason, FinalizeReason::Silence);
    assert_eq!(seen[0].frames, 2);
    assert_eq!(sink.rendered().len(), 1);
}

#[tokio::test]
async fn test_transcription_failure_speaks_fallback() {
    let gateway = Arc::new(ScriptedGateway::new(vec![Err(Error::Transcription(
        "empty transcript".to_string(),
    ))]));
    let sink = Arc::new(RecordingSink::default());
    let source = ScriptedSource::once(round_trip_events());

    let summary = daemon(test_config(), source, &gateway, &sink)
        .run(never())
        .await
        .unwrap();

    assert_eq!(summary.segments, 1);
    assert_eq!(summary.transcription_failures, 1);
    assert_eq!(sink.rendered(), vec![DIDNT_UNDERSTAND]);
}

#[tokio::test]
async fn test_transcription_timeout_is_a_failure() {
    let gateway = Arc::new(
        ScriptedGateway::answering("test").with_delay(Duration::from_secs(30)),
    );
    let sink = Arc::new(RecordingSink::default());
    let source = ScriptedSource::once(round_trip_events());

    let mut config = test_config();
    config.stt.timeout = Duration::from_millis(50);

    let summary = daemon(config, source, &gateway, &sink)
        .run(never())
        .await
        .unwrap();

    assert_eq!(summary.transcription_failures, 1);
    assert_eq!(sink.rendered(), vec![DIDNT_UNDERSTAND]);
}

#[tokio::test]
async fn test_end_of_stream_finalizes_recording() {
    let gateway = Arc::new(ScriptedGateway::answering("hello"));
    let sink = Arc::new(RecordingSink::default());

    // Wake phrase and two voice frames, then the file ends
    let mut levels = vec![0i16; 50];
    levels.extend_from_slice(&common::WAKE_LEVELS);
    levels.extend_from_slice(&[800, 800]);
    let mut events = chunk_events(&samples(&levels), 1600);
    events.push(SourceEvent::Finished);

    let summary = daemon(test_config(), ScriptedSource::once(events), &gateway, &sink)
        .run(never())
        .await
        .unwrap();

    assert_eq!(summary.segments, 1);
    let seen = gateway.seen();
    assert_eq!(seen[0].reason, FinalizeReason::EndOfStream);
    assert_eq!(seen[0].frames, 2);
    assert_eq!(sink.rendered(), vec!["Hello! How can I help?"]);
}

#[tokio::test]
async fn test_fault_aborts_and_restarts() {
    let gateway = Arc::new(ScriptedGateway::answering("stop"));
    let sink = Arc::new(RecordingSink::default());

    // First run faults in the middle of a command
    let mut levels = vec![0i16; 50];
    levels.extend_from_slice(&common::WAKE_LEVELS);
    levels.extend_from_slice(&[800, 800]);
    let mut faulty = chunk_events(&samples(&levels), 1600);
    faulty.push(SourceEvent::Fault("device unplugged".to_string()));

    let source = ScriptedSource::new(vec![
        StartScript::Deliver(faulty),
        StartScript::Deliver(round_trip_events()),
    ]);
    let starts = source.starts();

    let summary = daemon(test_config(), source, &gateway, &sink)
        .run(never())
        .await
        .unwrap();

    assert_eq!(starts.load(Ordering::SeqCst), 2);
    assert_eq!(summary.restarts, 1);
    // The interrupted command was discarded, not transcribed
    assert_eq!(summary.activations, 2);
    assert_eq!(summary.segments, 1);
    assert_eq!(gateway.seen()[0].epoch, 3);
    assert_eq!(sink.rendered(), vec!["Okay."]);
}

#[tokio::test]
async fn test_failed_restarts_recover() {
    let gateway = Arc::new(ScriptedGateway::answering("hi"));
    let sink = Arc::new(RecordingSink::default());

    let source = ScriptedSource::new(vec![
        StartScript::Fail("device busy".to_string()),
        StartScript::Fail("device busy".to_string()),
        StartScript::Deliver(round_trip_events()),
    ]);
    let starts = source.starts();

    let summary = daemon(test_config(), source, &gateway, &sink)
        .run(never())
        .await
        .unwrap();

    assert_eq!(starts.load(Ordering::SeqCst), 3);
    assert_eq!(summary.segments, 1);
    assert_eq!(sink.rendered(), vec!["Hello! How can I help?"]);
}

#[tokio::test]
async fn test_repeated_restart_failure_is_fatal() {
    let gateway = Arc::new(ScriptedGateway::default());
    let sink = Arc::new(RecordingSink::default());

    let source = ScriptedSource::new(vec![
        StartScript::Deliver(vec![SourceEvent::Fault("device lost".to_string())]),
        StartScript::Fail("no input device".to_string()),
        StartScript::Fail("no input device".to_string()),
        StartScript::Fail("no input device".to_string()),
    ]);

    let mut config = test_config();
    config.recovery.max_restart_failures = 3;

    let result = daemon(config, source, &gateway, &sink).run(never()).await;

    assert!(matches!(result, Err(Error::DeviceFault(_))));
    assert!(sink.rendered().is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_the_loop() {
    let gateway = Arc::new(ScriptedGateway::default());
    let sink = Arc::new(RecordingSink::default());

    // Silence forever, as from an idle room
    let source = ScriptedSource::once(chunk_events(&samples(&[0; 20]), 1600));

    let summary = daemon(test_config(), source, &gateway, &sink)
        .run(tokio::time::sleep(Duration::from_millis(50)))
        .await
        .unwrap();

    assert_eq!(summary.activations, 0);
    assert!(gateway.seen().is_empty());
}

#[tokio::test]
async fn test_wav_replay() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("command.wav");
    std::fs::write(
        &path,
        samples_to_wav(&samples(&round_trip_levels()), 16000).unwrap(),
    )
    .unwrap();

    let gateway = Arc::new(ScriptedGateway::answering("testing"));
    let sink = Arc::new(RecordingSink::default());

    let summary = Daemon::new(
        test_config(),
        Box::new(WavFileSource::new(&path, 16000)),
        Arc::clone(&gateway) as _,
        Arc::new(IntentRouter::default()),
        Arc::clone(&sink) as _,
    )
    .run(never())
    .await
    .unwrap();

    assert_eq!(summary.segments, 1);
    assert_eq!(gateway.seen()[0].frames, 8);
    assert_eq!(sink.rendered(), vec!["Test successful."]);
}
