//! Unit tests for the dispatch loop.
//!
//! Covers:
//! - events reach every listener in wire order and registration order
//! - bad frames are skipped without ending the loop, except a malformed
//!   `version` handshake
//! - the loop runs while any listener handles events
//! - `events_processing_finished` fires exactly once on every exit path
//! - listener failures surface as protocol errors

use std::sync::Arc;

use robot_agent_server::agent::dispatcher::EventDispatcher;
use robot_agent_server::agent::listener::{ExecutionEventListener, NoopListener};
use robot_agent_server::AppError;

use super::test_helpers::{client_pair, entries, journal, listeners, RecordingListener};

async fn run(frames: &str, registered: Vec<Arc<dyn ExecutionEventListener>>) -> robot_agent_server::Result<()> {
    run_bytes(frames.as_bytes(), registered).await
}

async fn run_bytes(frames: &[u8], registered: Vec<Arc<dyn ExecutionEventListener>>) -> robot_agent_server::Result<()> {
    let (client, _wire) = client_pair();
    EventDispatcher::new(client, registered)
        .run_events_loop(frames)
        .await
}

fn finished_count(log: &[String], name: &str) -> usize {
    log.iter()
        .filter(|entry| *entry == &format!("{name}:finished"))
        .count()
}

// ── Ordering ─────────────────────────────────────────────────────────────────

/// Every frame is delivered to both listeners, first listener first, in the
/// order the frames were written.
#[tokio::test]
async fn events_are_delivered_in_wire_and_registration_order() {
    let log = journal();
    let registered = listeners([
        Arc::new(RecordingListener::new("a", &log)) as Arc<dyn ExecutionEventListener>,
        Arc::new(RecordingListener::new("b", &log)),
    ]);

    let frames = concat!(
        "{\"agent_initializing\": []}\n",
        "{\"paused\": []}\n",
        "{\"resumed\": []}\n",
    );
    run(frames, registered).await.expect("stream end is a clean exit");

    assert_eq!(
        entries(&log),
        vec![
            "a:about_to_start",
            "b:about_to_start",
            "a:agent_initializing",
            "b:agent_initializing",
            "a:paused",
            "b:paused",
            "a:resumed",
            "b:resumed",
            "a:finished",
            "b:finished",
        ],
        "events must arrive in order without gaps or duplicates"
    );
}

// ── Skipped frames ───────────────────────────────────────────────────────────

/// Blank lines, malformed JSON, non-objects, unknown tags, payload shape
/// mismatches of non-handshake events and over-long lines are skipped; the frames after them are
/// still delivered.
#[tokio::test]
async fn bad_frames_are_skipped() {
    let log = journal();
    let registered = listeners([
        Arc::new(RecordingListener::new("r", &log)) as Arc<dyn ExecutionEventListener>
    ]);

    let long = format!("{{\"message\": \"{}\"}}\n", "x".repeat(4096));
    let frames = format!(
        "\n   \n{{broken\nnull\n42\n{{}}\n{{\"some_event\": \"val\"}}\n{{\"end_test\": [\"t1\"]}}\n{long}{{\"paused\": 0}}\n"
    );

    let (client, _wire) = client_pair();
    EventDispatcher::new(client, registered)
        .with_max_frame_bytes(1024)
        .run_events_loop(frames.as_bytes())
        .await
        .expect("bad frames must not fail the loop");

    assert_eq!(entries(&log), vec!["r:about_to_start", "r:paused", "r:finished"]);
}

/// Bytes that are not valid UTF-8 do not end the session; the frame is
/// decoded lossily and the frames after it are still delivered.
#[tokio::test]
async fn invalid_utf8_frame_does_not_end_the_loop() {
    let log = journal();
    let registered = listeners([
        Arc::new(RecordingListener::new("r", &log)) as Arc<dyn ExecutionEventListener>
    ]);

    let frames: &[u8] = b"{\"paused\": []}\n{\"log_message\": [{\"message\": \"caf\xe9\", \"level\": \"INFO\"}]}\n{\"close\": []}\n";
    run_bytes(frames, registered)
        .await
        .expect("invalid UTF-8 must not fail the loop");

    assert_eq!(
        entries(&log),
        vec!["r:about_to_start", "r:paused", "r:close", "r:finished"]
    );
}

/// A `version` frame that cannot be decoded ends the session as a protocol
/// error instead of leaving the agent waiting for a verdict.
#[tokio::test]
async fn malformed_version_handshake_aborts_loop() {
    let log = journal();
    let registered = listeners([
        Arc::new(RecordingListener::new("r", &log)) as Arc<dyn ExecutionEventListener>
    ]);

    let frames = concat!(
        "{\"version\": [{\"python\": \"3\", \"robot\": \"3.1\"}]}\n",
        "{\"paused\": []}\n",
    );
    let err = run(frames, registered)
        .await
        .expect_err("a malformed handshake must fail the loop");

    assert!(err.is_protocol_fatal(), "got {err:?}");
    assert!(err.to_string().contains("version"), "got {err}");
    assert_eq!(entries(&log), vec!["r:about_to_start", "r:finished"]);
}

// ── Loop condition ───────────────────────────────────────────────────────────

/// With no listener handling events the loop does not read at all.
#[tokio::test]
async fn loop_does_not_start_when_nobody_handles_events() {
    let log = journal();
    let registered = listeners([
        Arc::new(RecordingListener::new("r", &log).idle()) as Arc<dyn ExecutionEventListener>
    ]);

    run("{\"paused\": []}\n", registered).await.expect("clean exit");

    assert_eq!(entries(&log), vec!["r:about_to_start", "r:finished"]);
}

/// The loop keeps going while any listener handles events and stops as soon
/// as the last one withdraws, even if more frames follow.
#[tokio::test]
async fn loop_stops_once_every_listener_stopped_handling() {
    let log = journal();
    let registered = listeners([
        Arc::new(RecordingListener::new("idle", &log).idle()) as Arc<dyn ExecutionEventListener>,
        Arc::new(RecordingListener::new("busy", &log)),
    ]);

    let frames = concat!(
        "{\"paused\": []}\n",
        "{\"close\": []}\n",
        "{\"resumed\": []}\n",
    );
    run(frames, registered).await.expect("clean exit");

    let log = entries(&log);
    assert!(log.contains(&"idle:paused".to_owned()), "idle listeners still receive events");
    assert!(log.contains(&"busy:close".to_owned()));
    assert!(
        !log.iter().any(|e| e.ends_with(":resumed")),
        "frames after the last listener stopped must not be read: {log:?}"
    );
}

/// A no-op listener keeps the loop alive until the stream ends.
#[tokio::test]
async fn noop_listener_runs_until_end_of_stream() {
    let log = journal();
    let registered = listeners([
        Arc::new(NoopListener) as Arc<dyn ExecutionEventListener>,
        Arc::new(RecordingListener::new("r", &log).idle()),
    ]);

    run("{\"paused\": []}\n{\"close\": []}\n{\"resumed\": []}\n", registered)
        .await
        .expect("clean exit");

    assert!(entries(&log).contains(&"r:resumed".to_owned()));
}

// ── Failure semantics ────────────────────────────────────────────────────────

/// A failing listener aborts the loop with a protocol error; later
/// listeners do not see the event, and everyone is still told the loop
/// finished exactly once.
#[tokio::test]
async fn listener_failure_aborts_loop_and_still_notifies_finish() {
    let log = journal();
    let registered = listeners([
        Arc::new(RecordingListener::new("a", &log).failing_on("paused"))
            as Arc<dyn ExecutionEventListener>,
        Arc::new(RecordingListener::new("b", &log)),
    ]);

    let err = run("{\"paused\": []}\n{\"resumed\": []}\n", registered)
        .await
        .expect_err("listener failure must abort the loop");
    assert!(matches!(err, AppError::Protocol(ref msg) if msg.contains("a rejected paused")), "got {err:?}");

    let log = entries(&log);
    assert!(!log.contains(&"b:paused".to_owned()), "later listeners must not see the failed event");
    assert!(!log.iter().any(|e| e.ends_with(":resumed")));
    assert_eq!(finished_count(&log, "a"), 1);
    assert_eq!(finished_count(&log, "b"), 1);
}

/// A panicking listener still leads to exactly one finish notification.
#[tokio::test]
async fn listener_panic_still_notifies_finish_once() {
    let log = journal();
    let registered = listeners([
        Arc::new(RecordingListener::new("a", &log).panicking_on("paused"))
            as Arc<dyn ExecutionEventListener>,
        Arc::new(RecordingListener::new("b", &log)),
    ]);

    let handle = tokio::spawn(async move { run("{\"paused\": []}\n", registered).await });
    let joined = handle.await;
    assert!(joined.is_err(), "panic must propagate out of the loop");

    let log = entries(&log);
    assert_eq!(finished_count(&log, "a"), 1);
    assert_eq!(finished_count(&log, "b"), 1);
}

/// Dropping the loop future mid-stream counts as an exit too.
#[tokio::test]
async fn cancelled_loop_notifies_finish_once() {
    let log = journal();
    let registered = listeners([
        Arc::new(RecordingListener::new("r", &log)) as Arc<dyn ExecutionEventListener>
    ]);

    let (client, _wire) = client_pair();
    let (_agent_side, server_side) = tokio::io::duplex(1024);
    let dispatcher = EventDispatcher::new(client, registered);

    let outcome = tokio::time::timeout(
        std::time::Duration::from_millis(50),
        dispatcher.run_events_loop(server_side),
    )
    .await;
    assert!(outcome.is_err(), "an idle stream must keep the loop waiting");

    assert_eq!(entries(&log), vec!["r:about_to_start", "r:finished"]);
}
